//! Well maps: tabular source-to-target well assignments.
//!
//! A well map is a CSV file with a required header row:
//!
//! ```text
//! source_plate,source_well,target_plate,target_well
//! src,A1,dst,A1
//! src,C3,dst,B1
//! ```
//!
//! The source wells for one plate feed [`ResourceFrame::fill`](crate::frame::ResourceFrame::fill).
//! Reading the file needs the `storage_csv` feature.

use crate::error::{DeckError, DeckResult};
use crate::position::{Format, Position};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Columns a well map must carry, in order.
pub const WELLMAP_HEADER: [&str; 4] = ["source_plate", "source_well", "target_plate", "target_well"];

/// One row of a well map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellMapping {
    pub source_plate: String,
    pub source_well: String,
    pub target_plate: String,
    pub target_well: String,
}

/// Parsed well map, rows in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WellMap {
    rows: Vec<WellMapping>,
}

impl WellMap {
    pub fn new(rows: Vec<WellMapping>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[WellMapping] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reads a well map file.
    pub fn from_path(path: &Path) -> DeckResult<Self> {
        read_wellmap(path)
    }

    /// Distinct source positions listed for `plate`, in file order.
    pub fn source_positions(&self, plate: &str, format: Format) -> DeckResult<Vec<Position>> {
        let mut positions: Vec<Position> = Vec::new();
        for row in self.rows.iter().filter(|r| r.source_plate == plate) {
            let pos = format.parse_label(&row.source_well).map_err(|e| {
                DeckError::Mapping(format!("source well '{}' of plate '{plate}': {e}", row.source_well))
            })?;
            if !positions.contains(&pos) {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    /// Target position for each source position of `plate`, in the same order.
    ///
    /// When a source well is listed more than once the first row wins.
    pub fn targets(
        &self,
        plate: &str,
        source_format: Format,
        sources: &[Position],
        target_format: Format,
    ) -> DeckResult<Vec<Position>> {
        sources
            .iter()
            .map(|pos| {
                let label = source_format.label(*pos)?;
                let row = self
                    .rows
                    .iter()
                    .find(|r| {
                        r.source_plate == plate
                            && source_format.parse_label(&r.source_well).ok() == Some(*pos)
                    })
                    .ok_or_else(|| DeckError::Mapping(format!("no target for {plate}:{label}")))?;
                target_format.parse_label(&row.target_well).map_err(|e| {
                    DeckError::Mapping(format!("target well '{}' for {plate}:{label}: {e}", row.target_well))
                })
            })
            .collect()
    }
}

// ============================================================================
// CSV Reader
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::io::Read;
    use tracing::info;

    pub fn read_wellmap(path: &Path) -> DeckResult<WellMap> {
        let file = std::fs::File::open(path)?;
        let map = parse_wellmap(file)
            .map_err(|e| DeckError::Mapping(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), rows = map.len(), "well map loaded");
        Ok(map)
    }

    pub fn parse_wellmap<R: Read>(reader: R) -> Result<WellMap, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers().map_err(|e| e.to_string())?.clone();
        let found: Vec<&str> = headers.iter().collect();
        if found != WELLMAP_HEADER {
            return Err(format!(
                "expected header '{}', found '{}'",
                WELLMAP_HEADER.join(","),
                found.join(",")
            ));
        }

        let rows = reader
            .deserialize::<WellMapping>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(WellMap::new(rows))
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub fn read_wellmap(_path: &Path) -> DeckResult<WellMap> {
        Err(DeckError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
use csv_enabled::read_wellmap;

#[cfg(feature = "storage_csv")]
pub use csv_enabled::parse_wellmap;

#[cfg(not(feature = "storage_csv"))]
use csv_disabled::read_wellmap;
