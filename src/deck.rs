//! The robot deck: a fixed grid of slots, each holding a stack of resource frames.
//!
//! ```text
//!        A     B     C     D     E     F
//!   1  [   ] [   ] [   ] [   ] [   ] [   ]
//!   2  [   ] [   ] [   ] [   ] [   ] [   ]
//!   3  [   ] [   ] [   ] [   ] [   ] [   ]
//!   4  [   ] [   ] [   ] [   ] [   ] [   ]
//!   5  [   ] [   ] [   ] [   ] [   ] [   ]
//! ```
//!
//! The shape is fixed at compile time. Slots are addressed as column letter plus
//! row number (`"C2"`). The inventory is persisted once per run as JSON and read
//! back on every resume.

use crate::error::{DeckError, DeckResult};
use crate::frame::ResourceFrame;
use crate::labware::LabwareId;
use crate::operator::{HumanInTheLoop, Notification};
use crate::persist::write_atomic;
use crate::stack::Stack;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Deck columns, lettered A..F.
pub const DECK_COLUMNS: usize = 6;
/// Deck rows, numbered 1..=5.
pub const DECK_ROWS: usize = 5;
/// Stack depth assumed when a layout does not declare one.
pub const DEFAULT_STACK_DEPTH: usize = 1;

/// A slot on the deck, 0-based internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeckAddress {
    column: usize,
    row: usize,
}

impl DeckAddress {
    pub fn new(column: usize, row: usize) -> DeckResult<Self> {
        if column >= DECK_COLUMNS || row >= DECK_ROWS {
            return Err(DeckError::Layout(format!(
                "deck slot (column {column}, row {row}) outside the {DECK_COLUMNS}x{DECK_ROWS} deck"
            )));
        }
        Ok(Self { column, row })
    }

    pub fn column(self) -> usize {
        self.column
    }

    pub fn row(self) -> usize {
        self.row
    }

    /// Every slot, column by column.
    pub fn all() -> impl Iterator<Item = DeckAddress> {
        (0..DECK_COLUMNS).flat_map(|column| (0..DECK_ROWS).map(move |row| DeckAddress { column, row }))
    }
}

impl FromStr for DeckAddress {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || DeckError::Layout(format!("invalid deck slot '{s}'"));
        let mut chars = s.chars();
        let letter = chars.next().filter(char::is_ascii_alphabetic).ok_or_else(bad)?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let row: usize = digits.parse().map_err(|_| bad())?;
        if row == 0 {
            return Err(bad());
        }
        let column = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
        DeckAddress::new(column, row - 1)
    }
}

impl fmt::Display for DeckAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'A' + self.column as u8), self.row + 1)
    }
}

/// `id` is `name` itself or a numbered level of it (`name_2`, `name_0001`).
fn is_named(id: &str, name: &str) -> bool {
    match id.strip_prefix(name) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|level| !level.is_empty() && level.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

/// Loaded count for one stacked slot; an empty answer means fully loaded.
fn ask_loaded(operator: &dyn HumanInTheLoop, addr: DeckAddress, name: &str, depth: usize) -> DeckResult<usize> {
    loop {
        let answer = operator.ask(&format!(
            "How many items are loaded at {addr} ({name}, up to {depth})? Empty for all"
        ))?;
        if answer.is_empty() {
            return Ok(depth);
        }
        match answer.parse::<usize>() {
            Ok(n) if n <= depth && answer.bytes().all(|b| b.is_ascii_digit()) => return Ok(n),
            _ => operator.notify(&Notification::warning(
                "Invalid count",
                format!("'{answer}' is not a number between 0 and {depth}"),
            )),
        }
    }
}

/// Fixed grid of stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    /// `cells[column][row]`
    cells: [[Stack<ResourceFrame>; DECK_ROWS]; DECK_COLUMNS],
}

impl Default for Deck {
    fn default() -> Self {
        Self::new()
    }
}

impl Deck {
    /// Deck with an empty stack of the default depth at every slot.
    pub fn new() -> Self {
        let cells = std::array::from_fn(|column| {
            std::array::from_fn(|row| {
                let addr = DeckAddress { column, row };
                Stack::new(addr.to_string(), DEFAULT_STACK_DEPTH)
            })
        });
        Self { cells }
    }

    pub fn stack(&self, addr: DeckAddress) -> &Stack<ResourceFrame> {
        &self.cells[addr.column][addr.row]
    }

    pub fn stack_mut(&mut self, addr: DeckAddress) -> &mut Stack<ResourceFrame> {
        &mut self.cells[addr.column][addr.row]
    }

    /// Replaces the stack at `addr`, e.g. with a deeper one from the layout.
    pub fn set_stack(&mut self, addr: DeckAddress, stack: Stack<ResourceFrame>) -> DeckResult<()> {
        for frame in stack.iter() {
            if let Some((other, _)) = self.find(frame.id()) {
                if other != addr {
                    return Err(DeckError::Layout(format!(
                        "labware '{}' already placed at {other}",
                        frame.id()
                    )));
                }
            }
        }
        self.cells[addr.column][addr.row] = stack;
        Ok(())
    }

    /// Places a frame on top of the stack at `addr`.
    pub fn place(&mut self, addr: DeckAddress, frame: ResourceFrame) -> DeckResult<()> {
        if let Some((other, _)) = self.find(frame.id()) {
            return Err(DeckError::Layout(format!(
                "labware '{}' already placed at {other}",
                frame.id()
            )));
        }
        self.stack_mut(addr).push(frame)
    }

    /// Locates a labware item anywhere on the deck.
    pub fn find(&self, id: &LabwareId) -> Option<(DeckAddress, &ResourceFrame)> {
        DeckAddress::all().find_map(|addr| {
            self.stack(addr)
                .iter()
                .find(|frame| frame.id() == id)
                .map(|frame| (addr, frame))
        })
    }

    /// Slot holding the labware called `name`, or a stack of `name_<n>` levels.
    ///
    /// Fails when no slot matches or when more than one does.
    pub fn slot_named(&self, name: &str) -> DeckResult<DeckAddress> {
        let mut slots = DeckAddress::all().filter(|addr| {
            self.stack(*addr)
                .iter()
                .any(|frame| is_named(frame.id().as_str(), name))
        });
        let found = slots
            .next()
            .ok_or_else(|| DeckError::Layout(format!("no labware named '{name}' on the deck")))?;
        if let Some(other) = slots.next() {
            return Err(DeckError::Layout(format!(
                "labware name '{name}' is ambiguous: found at {found} and {other}"
            )));
        }
        Ok(found)
    }

    /// Asks the operator how many items are physically loaded at every
    /// stacked slot and trims the unused top levels. Ends with one
    /// confirmation of the resulting deck; a "no" aborts. Returns how many
    /// levels were trimmed.
    pub fn confirm_loaded(&mut self, operator: &dyn HumanInTheLoop) -> DeckResult<usize> {
        let mut trimmed = 0;
        let mut summary = Vec::new();
        for addr in DeckAddress::all() {
            let stack = self.stack(addr);
            let depth = stack.remaining();
            if depth < 2 {
                continue;
            }
            let name = stack.iter().next().map(|f| f.id().to_string()).unwrap_or_default();
            let loaded = ask_loaded(operator, addr, &name, depth)?;
            trimmed += self.stack_mut(addr).trim_unused(depth - loaded)?.len();
            summary.push(format!("{addr} {loaded}/{depth}"));
        }
        if !summary.is_empty() {
            operator.require_confirmation(&format!("Start with stacks {}?", summary.join(", ")))?;
            info!(trimmed, "stack depths confirmed by the operator");
        }
        Ok(trimmed)
    }

    /// Slots with at least one item.
    pub fn occupied_slots(&self) -> Vec<DeckAddress> {
        DeckAddress::all().filter(|a| !self.stack(*a).is_empty()).collect()
    }

    /// Number of labware items on the deck.
    pub fn item_count(&self) -> usize {
        DeckAddress::all().map(|a| self.stack(a).remaining()).sum()
    }

    fn validate(&self) -> DeckResult<()> {
        let mut ids = HashSet::new();
        for addr in DeckAddress::all() {
            for frame in self.stack(addr).iter() {
                frame.validate()?;
                if !ids.insert(frame.id().clone()) {
                    return Err(DeckError::Layout(format!(
                        "labware '{}' appears twice on the deck",
                        frame.id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Writes the inventory to `path` atomically.
    pub fn save(&self, path: &Path) -> DeckResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        write_atomic(path, json.as_bytes())?;
        info!(path = %path.display(), items = self.item_count(), "deck inventory saved");
        Ok(())
    }

    /// Reads an inventory written by [`Deck::save`].
    pub fn load(path: &Path) -> DeckResult<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeckError::StateNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| DeckError::StateCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let deck: Deck = serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?;
        deck.validate().map_err(|e| corrupt(e.to_string()))?;
        Ok(deck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labware::{LabwareInstance, LabwareKind};
    use crate::operator::ScriptedOperator;
    use crate::position::Format;

    fn plate(name: &str) -> ResourceFrame {
        ResourceFrame::new(LabwareInstance::new(name, LabwareKind::Plate, Format::Wells96))
    }

    #[test]
    fn test_address_parse_and_display() {
        let addr: DeckAddress = "c2".parse().unwrap();
        assert_eq!((addr.column(), addr.row()), (2, 1));
        assert_eq!(addr.to_string(), "C2");
        assert!("G1".parse::<DeckAddress>().is_err());
        assert!("A6".parse::<DeckAddress>().is_err());
        assert!("A0".parse::<DeckAddress>().is_err());
        assert!("C+2".parse::<DeckAddress>().is_err());
        assert!("C".parse::<DeckAddress>().is_err());
        assert_eq!(DeckAddress::all().count(), DECK_COLUMNS * DECK_ROWS);
    }

    #[test]
    fn test_place_and_find() {
        let mut deck = Deck::new();
        let addr: DeckAddress = "B3".parse().unwrap();
        deck.place(addr, plate("src")).unwrap();
        let (found, frame) = deck.find(&LabwareId::new("src")).unwrap();
        assert_eq!(found, addr);
        assert_eq!(frame.format(), Format::Wells96);
        assert!(matches!(
            deck.place("A1".parse().unwrap(), plate("src")),
            Err(DeckError::Layout(_))
        ));
        assert_eq!(deck.occupied_slots(), vec![addr]);
        assert_eq!(deck.slot_named("src").unwrap(), addr);
        assert!(deck.slot_named("tips").is_err());
    }

    #[test]
    fn test_slot_named_ignores_shared_prefixes() {
        let mut deck = Deck::new();
        deck.place("A1".parse().unwrap(), plate("source_lid")).unwrap();
        deck.place("B1".parse().unwrap(), plate("source")).unwrap();
        deck.set_stack(
            "C1".parse().unwrap(),
            Stack::from_items("C1", vec![plate("tips_0001"), plate("tips_0002")]),
        )
        .unwrap();

        assert_eq!(deck.slot_named("source").unwrap(), "B1".parse().unwrap());
        assert_eq!(deck.slot_named("source_lid").unwrap(), "A1".parse().unwrap());
        assert_eq!(deck.slot_named("tips").unwrap(), "C1".parse().unwrap());
        assert!(deck.slot_named("sour").is_err());
    }

    #[test]
    fn test_slot_named_rejects_ambiguous_names() {
        let mut deck = Deck::new();
        deck.place("A1".parse().unwrap(), plate("target")).unwrap();
        deck.place("A2".parse().unwrap(), plate("target_2")).unwrap();
        assert!(matches!(deck.slot_named("target"), Err(DeckError::Layout(msg)) if msg.contains("ambiguous")));
    }

    #[test]
    fn test_confirm_loaded_trims_stacks() {
        let mut deck = Deck::new();
        deck.set_stack(
            "A1".parse().unwrap(),
            Stack::from_items("A1", vec![plate("p1"), plate("p2"), plate("p3"), plate("p4")]),
        )
        .unwrap();
        deck.place("B1".parse().unwrap(), plate("single")).unwrap();
        deck.set_stack(
            "C1".parse().unwrap(),
            Stack::from_items("C1", vec![plate("t1"), plate("t2"), plate("t3")]),
        )
        .unwrap();

        let op = ScriptedOperator::new(["2", "lots", "5", "", "y"]);
        assert_eq!(deck.confirm_loaded(&op).unwrap(), 2);

        let a1 = deck.stack("A1".parse().unwrap());
        let ids: Vec<&str> = a1.iter().map(|f| f.id().as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(a1.max_depth(), 2);
        assert_eq!(deck.stack("C1".parse().unwrap()).remaining(), 3);
        assert_eq!(deck.stack("B1".parse().unwrap()).remaining(), 1);
        assert_eq!(op.titles(), vec!["Invalid count", "Invalid count"]);
    }

    #[test]
    fn test_confirm_loaded_declined_aborts() {
        let mut deck = Deck::new();
        deck.set_stack(
            "A1".parse().unwrap(),
            Stack::from_items("A1", vec![plate("p1"), plate("p2")]),
        )
        .unwrap();
        let op = ScriptedOperator::new(["1", "n"]);
        assert!(matches!(deck.confirm_loaded(&op), Err(DeckError::Aborted(_))));
        assert_eq!(op.titles(), vec!["Run aborted"]);

        // single-item slots need no answers
        let mut flat = Deck::new();
        flat.place("A1".parse().unwrap(), plate("only")).unwrap();
        assert_eq!(flat.confirm_loaded(&ScriptedOperator::default()).unwrap(), 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.json");
        let mut deck = Deck::new();
        deck.set_stack(
            "A1".parse().unwrap(),
            Stack::from_items("A1", vec![plate("p1"), plate("p2")]),
        )
        .unwrap();
        deck.save(&path).unwrap();
        let loaded = Deck::load(&path).unwrap();
        assert_eq!(loaded, deck);
        assert_eq!(loaded.item_count(), 2);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.json");
        assert!(matches!(Deck::load(&path), Err(DeckError::StateNotFound(_))));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Deck::load(&path), Err(DeckError::StateCorrupt { .. })));
    }
}
