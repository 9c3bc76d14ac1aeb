//! Labware instances placed on the deck.

use crate::position::Format;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a piece of consumable hardware is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabwareKind {
    Plate,
    TipRack,
    Lid,
    Reservoir,
    TubeCarrier,
}

impl LabwareKind {
    /// Whether the robot pipettes into this kind of labware (lids only get moved).
    pub fn is_addressable(self) -> bool {
        !matches!(self, LabwareKind::Lid)
    }
}

impl FromStr for LabwareKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "plate" => Ok(LabwareKind::Plate),
            "tip_rack" | "tips" => Ok(LabwareKind::TipRack),
            "lid" => Ok(LabwareKind::Lid),
            "reservoir" => Ok(LabwareKind::Reservoir),
            "tube_carrier" | "tubes" => Ok(LabwareKind::TubeCarrier),
            other => Err(format!("unknown labware kind '{other}'")),
        }
    }
}

/// Opaque handle naming one physical labware item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabwareId(String);

impl LabwareId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A piece of consumable hardware: handle, kind and format.
///
/// Identity is by [`LabwareId`]; the deck never holds two instances with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabwareInstance {
    pub id: LabwareId,
    pub kind: LabwareKind,
    pub format: Format,
}

impl LabwareInstance {
    pub fn new(id: impl Into<String>, kind: LabwareKind, format: Format) -> Self {
        Self {
            id: LabwareId::new(id),
            kind,
            format,
        }
    }

    /// Linear position count.
    pub fn capacity(&self) -> usize {
        self.format.capacity()
    }
}
