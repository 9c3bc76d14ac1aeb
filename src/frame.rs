//! Resource frames: occupancy tracking and channel allocation for one labware item.
//!
//! A [`ResourceFrame`] wraps a [`LabwareInstance`] with an occupancy grid of the
//! same shape as the labware. `true` marks a position that can still be handed
//! out, `false` one that is consumed or was never part of the fill set.
//!
//! # Allocation shapes
//!
//! | Operation | Head | Consumes |
//! |---|---|---|
//! | [`ResourceFrame::two_channel`] | 2-probe head, one column at a time | yes |
//! | [`ResourceFrame::multi_probe`] | 96/384 head, contiguous window | yes |
//! | [`ResourceFrame::quadrant`] | 96 head over a 384 grid | yes |
//! | [`ResourceFrame::static_wells`] | fixed reagent wells | no |
//! | [`ResourceFrame::all`] | read-only enumeration | no |
//!
//! Consuming operations accept [`Take::Peek`] to answer "would this succeed, and
//! with which positions" without touching the occupancy.
//!
//! # Baseline
//!
//! [`ResourceFrame::reset`] restores the fill set captured by the last
//! [`ResourceFrame::fill`], or the whole format when the frame was never filled.
//! A full consume after a reset therefore always yields exactly the fill-set size.

use crate::error::{DeckError, DeckResult};
use crate::labware::{LabwareId, LabwareInstance};
use crate::pairing::pair_order;
use crate::position::{Format, Order, Position};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Whether an allocation marks its positions as consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Take {
    #[default]
    Consume,
    Peek,
}

/// Direction the 2-probe head spans on this labware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Probes sit in one column and differ by row.
    #[default]
    Column,
    /// Probes sit in one row and differ by column.
    Row,
}

/// One labware item plus its occupancy bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFrame {
    labware: LabwareInstance,
    /// Column-major, one entry per position.
    occupancy: Vec<bool>,
    /// Fill set restored by `reset()`.
    baseline: Vec<bool>,
    #[serde(default)]
    axis: Axis,
    separation: usize,
}

impl ResourceFrame {
    /// Frame with every position of the labware available.
    pub fn new(labware: LabwareInstance) -> Self {
        let capacity = labware.capacity();
        let separation = labware.format.default_separation();
        Self {
            labware,
            occupancy: vec![true; capacity],
            baseline: vec![true; capacity],
            axis: Axis::Column,
            separation,
        }
    }

    /// Overrides the minimum 2-probe separation.
    pub fn with_separation(mut self, separation: usize) -> Self {
        self.separation = separation.max(1);
        self
    }

    /// Overrides the 2-probe axis.
    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = axis;
        self
    }

    pub fn labware(&self) -> &LabwareInstance {
        &self.labware
    }

    pub fn id(&self) -> &LabwareId {
        &self.labware.id
    }

    pub fn format(&self) -> Format {
        self.labware.format
    }

    pub fn separation(&self) -> usize {
        self.separation
    }

    /// Checks the grid still matches the labware format (after deserialisation).
    pub fn validate(&self) -> DeckResult<()> {
        let capacity = self.format().capacity();
        if self.occupancy.len() != capacity || self.baseline.len() != capacity {
            return Err(DeckError::format(format!(
                "frame '{}' occupancy has {} cells, {} expects {}",
                self.id(),
                self.occupancy.len(),
                self.format(),
                capacity
            )));
        }
        Ok(())
    }

    fn slot(&self, pos: Position) -> DeckResult<usize> {
        self.format().index(pos, Order::ColumnMajor)
    }

    fn cell(&self, row: usize, column: usize) -> bool {
        self.occupancy[column * self.format().rows() + row]
    }

    /// Restricts allocation to exactly `positions` and makes that the new baseline.
    pub fn fill(&mut self, positions: &[Position]) -> DeckResult<()> {
        let mut baseline = vec![false; self.format().capacity()];
        for pos in positions {
            baseline[self.slot(*pos)?] = true;
        }
        debug!(labware = %self.id(), fill = positions.len(), "frame filled");
        self.occupancy = baseline.clone();
        self.baseline = baseline;
        Ok(())
    }

    /// [`ResourceFrame::fill`] from well labels.
    pub fn fill_labels<S: AsRef<str>>(&mut self, labels: &[S]) -> DeckResult<()> {
        let positions = labels
            .iter()
            .map(|l| self.format().parse_label(l.as_ref()))
            .collect::<DeckResult<Vec<_>>>()?;
        self.fill(&positions)
    }

    /// Restores the baseline captured by the last fill.
    pub fn reset(&mut self) {
        self.occupancy.clone_from(&self.baseline);
    }

    /// Positions still available.
    pub fn remaining_count(&self) -> usize {
        self.occupancy.iter().filter(|o| **o).count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_count() == 0
    }

    pub fn is_occupied(&self, pos: Position) -> bool {
        self.slot(pos).map(|i| self.occupancy[i]).unwrap_or(false)
    }

    /// Available positions in column-major order.
    pub fn occupied(&self) -> Vec<Position> {
        self.format()
            .positions(Order::ColumnMajor)
            .zip(&self.occupancy)
            .filter_map(|(pos, occupied)| occupied.then_some(pos))
            .collect()
    }

    /// Column-major indices of `positions`, as the device driver expects them.
    pub fn indices(&self, positions: &[Position]) -> DeckResult<Vec<usize>> {
        positions.iter().map(|p| self.slot(*p)).collect()
    }

    fn mark(&mut self, positions: &[Position], take: Take) -> DeckResult<()> {
        if take == Take::Consume {
            for pos in positions {
                let i = self.slot(*pos)?;
                self.occupancy[i] = false;
            }
        }
        Ok(())
    }

    fn exhausted(&self, request: impl Into<String>) -> DeckError {
        DeckError::exhausted(self.id().as_str(), request)
    }

    /// Occupied positions grouped by the 2-probe axis, in deck order.
    fn lines(&self) -> Vec<Vec<Position>> {
        let format = self.format();
        match self.axis {
            Axis::Column => (0..format.columns())
                .map(|c| {
                    (0..format.rows())
                        .filter(|&r| self.cell(r, c))
                        .map(|r| Position::new(r, c))
                        .collect()
                })
                .collect(),
            Axis::Row => (0..format.rows())
                .map(|r| {
                    (0..format.columns())
                        .filter(|&c| self.cell(r, c))
                        .map(|c| Position::new(r, c))
                        .collect()
                })
                .collect(),
        }
    }

    /// Up to `n` positions for the 2-probe head, all from one column (or row).
    ///
    /// The first line holding at least `n` occupied positions is used. When no
    /// line has `n`, the request shrinks one at a time until some line can serve
    /// it, so an unevenly consumed frame still makes progress. Inside the chosen
    /// line the positions follow the greedy pairing order.
    ///
    /// Fails with [`DeckError::AllocationExhausted`] only when nothing is left.
    pub fn two_channel(&mut self, n: usize, take: Take) -> DeckResult<Vec<Position>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let lines = self.lines();
        for want in (1..=n).rev() {
            let Some(line) = lines.iter().find(|l| l.len() >= want) else {
                continue;
            };
            let along: Vec<usize> = line
                .iter()
                .map(|p| match self.axis {
                    Axis::Column => p.row,
                    Axis::Row => p.column,
                })
                .collect();
            let picked: Vec<Position> = pair_order(&along, self.separation)
                .into_iter()
                .take(want)
                .map(|i| match self.axis {
                    Axis::Column => Position::new(i, line[0].column),
                    Axis::Row => Position::new(line[0].row, i),
                })
                .collect();
            if want < n {
                debug!(labware = %self.id(), requested = n, granted = want, "two_channel fell back to a shorter line");
            }
            self.mark(&picked, take)?;
            return Ok(picked);
        }
        Err(self.exhausted(format!("two_channel({n})")))
    }

    /// A fully occupied `rows x columns` window for a multi-probe head.
    ///
    /// Running occupied counts per row and column (a summed-area table) filter the
    /// candidate origins; the first origin in column-major order whose window is
    /// completely occupied wins. Positions come back column-major.
    pub fn multi_probe(&mut self, rows: usize, columns: usize, take: Take) -> DeckResult<Vec<Position>> {
        let format = self.format();
        if rows == 0 || columns == 0 || rows > format.rows() || columns > format.columns() {
            return Err(DeckError::format(format!(
                "multi_probe({rows}x{columns}) does not fit {format}"
            )));
        }

        let (h, w) = (format.rows(), format.columns());
        // sat[r][c] = occupied count in rows 0..r, columns 0..c
        let mut sat = vec![vec![0usize; w + 1]; h + 1];
        for r in 0..h {
            for c in 0..w {
                sat[r + 1][c + 1] = usize::from(self.cell(r, c)) + sat[r][c + 1] + sat[r + 1][c] - sat[r][c];
            }
        }
        let window = |r0: usize, c0: usize| {
            let (r1, c1) = (r0 + rows, c0 + columns);
            sat[r1][c1] + sat[r0][c0] - sat[r0][c1] - sat[r1][c0]
        };

        let origin = (0..=w - columns)
            .flat_map(|c0| (0..=h - rows).map(move |r0| (r0, c0)))
            .find(|&(r0, c0)| window(r0, c0) == rows * columns);

        let Some((r0, c0)) = origin else {
            return Err(self.exhausted(format!("multi_probe({rows}x{columns})")));
        };
        let picked: Vec<Position> = (c0..c0 + columns)
            .flat_map(|c| (r0..r0 + rows).map(move |r| Position::new(r, c)))
            .collect();
        debug!(labware = %self.id(), row = r0, column = c0, rows, columns, "multi_probe window");
        self.mark(&picked, take)?;
        Ok(picked)
    }

    /// Positions of quadrant `q` (0..4) of a 384 grid, column-major.
    ///
    /// Quadrants interleave rows and columns: 0 starts at A1, 1 at B1, 2 at A2, 3 at B2.
    pub fn quadrant_positions(q: usize) -> Vec<Position> {
        let format = Format::Wells384;
        let (row_off, col_off) = (q % 2, q / 2);
        (col_off..format.columns())
            .step_by(2)
            .flat_map(|c| (row_off..format.rows()).step_by(2).map(move |r| Position::new(r, c)))
            .collect()
    }

    /// The first fully occupied 96-position quadrant of a 384 frame.
    pub fn quadrant(&mut self, take: Take) -> DeckResult<Vec<Position>> {
        if self.format() != Format::Wells384 {
            return Err(DeckError::format(format!(
                "quadrant() needs a 384-well frame, '{}' is {}",
                self.id(),
                self.format()
            )));
        }
        let found = (0..4)
            .map(Self::quadrant_positions)
            .enumerate()
            .find(|(_, positions)| positions.iter().all(|p| self.cell(p.row, p.column)));
        let Some((q, picked)) = found else {
            return Err(self.exhausted("quadrant()"));
        };
        debug!(labware = %self.id(), quadrant = q, "quadrant allocated");
        self.mark(&picked, take)?;
        Ok(picked)
    }

    /// Exactly the named wells, ignoring occupancy. Never consumes.
    pub fn static_wells<S: AsRef<str>>(&self, labels: &[S]) -> DeckResult<Vec<Position>> {
        labels
            .iter()
            .map(|l| self.format().parse_label(l.as_ref()))
            .collect()
    }

    /// Every position of the format, column-major. Never consumes.
    pub fn all(&self) -> Vec<Position> {
        self.format().positions(Order::ColumnMajor).collect()
    }
}
