//! Deck layout files.
//!
//! A layout is a TOML list of labware entries, one per deck slot:
//!
//! ```toml
//! [[labware]]
//! slot = "A1"
//! kind = "plate"
//! format = 96
//! name = "source"
//! depth = 4                     # a stack of four source plates: source_1 .. source_4
//!
//! [[labware]]
//! slot = "B1"
//! kind = "tip_rack"
//! format = 96
//! name = "tips"
//! levels = ["tips_0001", "tips_0002", "tips_2"]   # explicit levels reported by the layout tool
//! ```
//!
//! When a layout reports explicit `levels`, the tool also reports placeholder
//! entries for levels that are not physically loaded. Real stack levels carry
//! more than two zero digits in their label, so the rest are pruned as ghosts.

use crate::config::AllocationConfig;
use crate::deck::{Deck, DeckAddress};
use crate::error::{DeckError, DeckResult};
use crate::frame::{Axis, ResourceFrame};
use crate::labware::{LabwareInstance, LabwareKind};
use crate::position::Format;
use crate::stack::Stack;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Parsed layout file.
#[derive(Debug, Clone, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub labware: Vec<LayoutEntry>,
}

/// One slot of a layout file.
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutEntry {
    pub slot: String,
    pub kind: String,
    pub format: Format,
    pub name: String,
    /// Declared stack depth; defaults to the number of levels.
    #[serde(default)]
    pub depth: Option<usize>,
    /// Explicit level labels, bottom first.
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub axis: Axis,
    /// Per-slot override of the configured separation.
    #[serde(default)]
    pub separation: Option<usize>,
    /// Wells to fill instead of the whole format.
    #[serde(default)]
    pub fill: Vec<String>,
}

/// Whether a layout label names a real stack level rather than a placeholder.
pub fn is_stack_level(label: &str) -> bool {
    label.chars().filter(|c| *c == '0').count() > 2
}

impl Layout {
    pub fn from_toml(text: &str) -> DeckResult<Self> {
        toml::from_str(text).map_err(|e| DeckError::Layout(e.to_string()))
    }

    pub fn from_path(path: &Path) -> DeckResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Builds the initial deck inventory.
    pub fn build(&self, allocation: &AllocationConfig) -> DeckResult<Deck> {
        let mut deck = Deck::new();
        for entry in &self.labware {
            let addr: DeckAddress = entry.slot.parse()?;
            if !deck.stack(addr).is_empty() {
                return Err(DeckError::Layout(format!("slot {addr} listed twice")));
            }
            let stack = entry.build_stack(addr, allocation)?;
            deck.set_stack(addr, stack)?;
        }
        info!(
            slots = deck.occupied_slots().len(),
            items = deck.item_count(),
            "deck built from layout"
        );
        Ok(deck)
    }
}

impl LayoutEntry {
    fn labels(&self) -> Vec<String> {
        if !self.levels.is_empty() {
            return self.levels.clone();
        }
        match self.depth {
            Some(depth) if depth > 1 => (1..=depth).map(|i| format!("{}_{i}", self.name)).collect(),
            _ => vec![self.name.clone()],
        }
    }

    fn build_stack(&self, addr: DeckAddress, allocation: &AllocationConfig) -> DeckResult<Stack<ResourceFrame>> {
        let kind: LabwareKind = self.kind.parse().map_err(DeckError::Layout)?;
        let separation = self
            .separation
            .unwrap_or_else(|| allocation.separation_for(self.format));

        let mut frames = Vec::new();
        for label in self.labels() {
            let mut frame = ResourceFrame::new(LabwareInstance::new(label, kind, self.format))
                .with_axis(self.axis)
                .with_separation(separation);
            if !self.fill.is_empty() {
                frame.fill_labels(&self.fill)?;
            }
            frames.push(frame);
        }

        let declared = self.depth.unwrap_or(frames.len());
        if frames.len() > declared {
            return Err(DeckError::Layout(format!(
                "slot {addr}: {} levels listed but depth is {declared}",
                frames.len()
            )));
        }

        let mut stack = Stack::new(addr.to_string(), declared);
        for frame in frames {
            stack.push(frame)?;
        }
        if !self.levels.is_empty() && self.levels.len() > 1 {
            stack.prune_ghosts(|frame| is_stack_level(frame.id().as_str()));
        }
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labware::LabwareId;

    const LAYOUT: &str = r#"
        [[labware]]
        slot = "A1"
        kind = "plate"
        format = 96
        name = "source"
        depth = 3

        [[labware]]
        slot = "B1"
        kind = "tip_rack"
        format = 96
        name = "tips"
        levels = ["tips_0001", "tips_0002", "tips_2"]

        [[labware]]
        slot = "C2"
        kind = "reservoir"
        format = 24
        name = "buffer"
        fill = ["A1", "B1"]

        [[labware]]
        slot = "D1"
        kind = "plate"
        format = 384
        name = "pcr"
        separation = 6
    "#;

    #[test]
    fn test_build_deck_from_layout() {
        let layout = Layout::from_toml(LAYOUT).unwrap();
        let deck = layout.build(&AllocationConfig::default()).unwrap();

        let source = deck.stack("A1".parse().unwrap());
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.peek().unwrap().id(), &LabwareId::new("source_3"));

        let tips = deck.stack("B1".parse().unwrap());
        assert_eq!(tips.remaining(), 2);
        assert_eq!(tips.max_depth(), 3);

        let buffer = deck.stack("C2".parse().unwrap()).peek().unwrap();
        assert_eq!(buffer.remaining_count(), 2);

        let (_, pcr) = deck.find(&LabwareId::new("pcr")).unwrap();
        assert_eq!(pcr.separation(), 6);
        assert_eq!(deck.item_count(), 7);
    }

    #[test]
    fn test_ghost_heuristic() {
        assert!(is_stack_level("P1_000"));
        assert!(is_stack_level("tips_0001"));
        assert!(!is_stack_level("tips_2"));
        assert!(!is_stack_level("P100"));
    }

    #[test]
    fn test_layout_errors() {
        let dup = r#"
            [[labware]]
            slot = "A1"
            kind = "plate"
            format = 96
            name = "x"

            [[labware]]
            slot = "A1"
            kind = "plate"
            format = 96
            name = "y"
        "#;
        let layout = Layout::from_toml(dup).unwrap();
        assert!(matches!(layout.build(&AllocationConfig::default()), Err(DeckError::Layout(_))));

        let bad_kind = r#"
            [[labware]]
            slot = "A1"
            kind = "bucket"
            format = 96
            name = "x"
        "#;
        let layout = Layout::from_toml(bad_kind).unwrap();
        assert!(layout.build(&AllocationConfig::default()).is_err());

        assert!(Layout::from_toml("[[labware]]\nslot = \"A1\"\nkind = \"plate\"\nformat = 48\nname = \"x\"").is_err());
    }
}
