//! Well addressing for 24, 96 and 384 position labware.
//!
//! Labels are a row letter followed by a 1-based column number (`"A1"`, `"H12"`,
//! `"P24"`). Internally rows and columns are 0-based. The canonical linear index,
//! the one handed to the device driver, is column-major: `A1 = 0`, `B1 = 1`, ...
//! Row-major enumeration is available through [`Order::RowMajor`].
//!
//! ```text
//!          col 0  col 1  col 2
//! row A      0      8     16     (96 format, column-major)
//! row B      1      9     17
//! ...
//! ```
//!
//! Every conversion fails with [`DeckError::Format`] when the row, column or index
//! falls outside the format. Nothing wraps or clamps.

use crate::error::{DeckError, DeckResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position count and shape of a labware item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Format {
    /// 4 x 6 tube carrier / reservoir grid.
    Wells24,
    /// 8 x 12 plate or tip rack.
    Wells96,
    /// 16 x 24 plate.
    Wells384,
}

/// Enumeration order for linear indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Walk down a column, then advance to the next column.
    #[default]
    ColumnMajor,
    /// Walk along a row, then advance to the next row.
    RowMajor,
}

/// A (row, column) cell inside a format, both 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

impl Format {
    /// All supported formats, smallest first.
    pub const ALL: [Format; 3] = [Format::Wells24, Format::Wells96, Format::Wells384];

    pub fn rows(self) -> usize {
        match self {
            Format::Wells24 => 4,
            Format::Wells96 => 8,
            Format::Wells384 => 16,
        }
    }

    pub fn columns(self) -> usize {
        match self {
            Format::Wells24 => 6,
            Format::Wells96 => 12,
            Format::Wells384 => 24,
        }
    }

    /// Total number of positions.
    pub fn capacity(self) -> usize {
        self.rows() * self.columns()
    }

    /// Smallest index distance two probes of the 2-channel head may share.
    pub fn default_separation(self) -> usize {
        match self {
            Format::Wells384 => 4,
            Format::Wells96 | Format::Wells24 => 1,
        }
    }

    /// Looks up a format by its position count.
    pub fn from_capacity(capacity: usize) -> DeckResult<Self> {
        match capacity {
            24 => Ok(Format::Wells24),
            96 => Ok(Format::Wells96),
            384 => Ok(Format::Wells384),
            other => Err(DeckError::format(format!(
                "unsupported labware format {other} (expected 24, 96 or 384)"
            ))),
        }
    }

    /// Checks that `pos` lies inside this format.
    pub fn check(self, pos: Position) -> DeckResult<Position> {
        if pos.row >= self.rows() || pos.column >= self.columns() {
            return Err(DeckError::format(format!(
                "position (row {}, column {}) outside {}-well format",
                pos.row,
                pos.column,
                self.capacity()
            )));
        }
        Ok(pos)
    }

    /// Linear index of `pos` in the given order.
    pub fn index(self, pos: Position, order: Order) -> DeckResult<usize> {
        let pos = self.check(pos)?;
        Ok(match order {
            Order::ColumnMajor => pos.column * self.rows() + pos.row,
            Order::RowMajor => pos.row * self.columns() + pos.column,
        })
    }

    /// Position at linear `index` in the given order.
    pub fn position(self, index: usize, order: Order) -> DeckResult<Position> {
        if index >= self.capacity() {
            return Err(DeckError::format(format!(
                "index {index} outside {}-well format",
                self.capacity()
            )));
        }
        Ok(match order {
            Order::ColumnMajor => Position::new(index % self.rows(), index / self.rows()),
            Order::RowMajor => Position::new(index / self.columns(), index % self.columns()),
        })
    }

    /// Every position of the format exactly once, in `order`.
    pub fn positions(self, order: Order) -> impl Iterator<Item = Position> {
        let (rows, columns) = (self.rows(), self.columns());
        (0..rows * columns).map(move |i| match order {
            Order::ColumnMajor => Position::new(i % rows, i / rows),
            Order::RowMajor => Position::new(i / columns, i % columns),
        })
    }

    /// Human label (`"B7"`) of `pos`.
    pub fn label(self, pos: Position) -> DeckResult<String> {
        let pos = self.check(pos)?;
        // rows() never exceeds 16, so the letter stays within A..=P
        let letter = char::from(b'A' + pos.row as u8);
        Ok(format!("{letter}{}", pos.column + 1))
    }

    /// Parses a label such as `"p24"` or `"A01"` into a position.
    pub fn parse_label(self, label: &str) -> DeckResult<Position> {
        let label = label.trim();
        let mut chars = label.chars();
        let letter = chars
            .next()
            .filter(char::is_ascii_alphabetic)
            .ok_or_else(|| DeckError::format(format!("label '{label}' must start with a row letter")))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DeckError::format(format!("label '{label}' has no column number")));
        }
        let number: usize = digits
            .parse()
            .map_err(|_| DeckError::format(format!("label '{label}' column out of range")))?;
        if number == 0 {
            return Err(DeckError::format(format!(
                "label '{label}': columns are numbered from 1"
            )));
        }
        let row = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
        self.check(Position::new(row, number - 1))
            .map_err(|_| DeckError::format(format!("label '{label}' outside {}-well format", self.capacity())))
    }
}

impl TryFrom<u16> for Format {
    type Error = DeckError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Format::from_capacity(value as usize)
    }
}

impl From<Format> for u16 {
    fn from(format: Format) -> Self {
        format.capacity() as u16
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-well", self.capacity())
    }
}

/// Column-major index of `label` in `format`.
pub fn label_to_index(label: &str, format: Format) -> DeckResult<usize> {
    let pos = format.parse_label(label)?;
    format.index(pos, Order::ColumnMajor)
}

/// Label of the column-major `index` in `format`.
pub fn index_to_label(index: usize, format: Format) -> DeckResult<String> {
    let pos = format.position(index, Order::ColumnMajor)?;
    format.label(pos)
}
