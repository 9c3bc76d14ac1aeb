//! Physical stacks of labware at one deck slot.
//!
//! Items are stored bottom-to-top. The robot reaches the top first, so
//! [`Stack::take_next`] pops from the top and [`Stack::return_item`] puts finished
//! items back at the bottom, the "done" end.

use crate::error::{DeckError, DeckResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// An ordered pile of items at one slot, with a declared maximum depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack<T> {
    slot: String,
    max_depth: usize,
    /// Bottom first.
    items: Vec<T>,
}

impl<T> Stack<T> {
    /// Empty stack at `slot` that holds at most `max_depth` items.
    pub fn new(slot: impl Into<String>, max_depth: usize) -> Self {
        Self {
            slot: slot.into(),
            max_depth,
            items: Vec::new(),
        }
    }

    /// Stack pre-loaded with `items` (bottom first); the depth is the item count.
    pub fn from_items(slot: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            slot: slot.into(),
            max_depth: items.len(),
            items,
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Current depth.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item `take_next` would return.
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.last_mut()
    }

    /// Items bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Places an item on top while building the deck.
    pub fn push(&mut self, item: T) -> DeckResult<()> {
        if self.items.len() >= self.max_depth {
            return Err(DeckError::Layout(format!(
                "stack at {} is full ({} levels)",
                self.slot, self.max_depth
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Removes and returns the top item.
    pub fn take_next(&mut self) -> DeckResult<T> {
        let item = self.items.pop().ok_or_else(|| DeckError::StackEmpty {
            slot: self.slot.clone(),
        })?;
        debug!(slot = %self.slot, remaining = self.items.len(), "took item from stack");
        Ok(item)
    }

    /// Puts a finished item at the bottom of the stack.
    pub fn return_item(&mut self, item: T) {
        self.items.insert(0, item);
        self.max_depth = self.max_depth.max(self.items.len());
        debug!(slot = %self.slot, depth = self.items.len(), "returned item to stack");
    }

    /// Moves the top `n` items to the bottom, in the order they were taken.
    ///
    /// Replays consumption of a resumed run: items finished before the
    /// interruption already sit at the done end.
    pub fn advance(&mut self, n: usize) -> DeckResult<()> {
        if n > self.items.len() {
            return Err(DeckError::StackEmpty {
                slot: self.slot.clone(),
            });
        }
        for _ in 0..n {
            if let Some(item) = self.items.pop() {
                self.items.insert(0, item);
            }
        }
        debug!(slot = %self.slot, advanced = n, "stack advanced past finished items");
        Ok(())
    }

    /// Keeps only the entries `is_stack_level` accepts; returns how many were dropped.
    ///
    /// Used while building the deck, to drop placeholder levels that layout
    /// files report for slots that are not physically loaded.
    pub fn prune_ghosts<F>(&mut self, mut is_stack_level: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|item| is_stack_level(item));
        let pruned = before - self.items.len();
        if pruned > 0 {
            info!(slot = %self.slot, pruned, "pruned ghost stack entries");
        }
        pruned
    }

    /// Discards `n` levels from the top before a run, matching the plate count
    /// the operator actually loaded.
    pub fn trim_unused(&mut self, n: usize) -> DeckResult<Vec<T>> {
        if n > self.items.len() {
            return Err(DeckError::StackEmpty {
                slot: self.slot.clone(),
            });
        }
        let dropped = self.items.split_off(self.items.len() - n);
        self.max_depth = self.max_depth.saturating_sub(n);
        info!(slot = %self.slot, trimmed = n, depth = self.items.len(), "trimmed unused stack levels");
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_next_in_stack_order_then_empty() {
        let mut stack = Stack::from_items("A1", vec!["p1", "p2", "p3", "p4"]);
        let mut taken = Vec::new();
        for _ in 0..4 {
            taken.push(stack.take_next().unwrap());
        }
        assert_eq!(taken, vec!["p4", "p3", "p2", "p1"]);
        assert!(matches!(stack.take_next(), Err(DeckError::StackEmpty { slot }) if slot == "A1"));
    }

    #[test]
    fn test_consumption_strictly_decreases_depth() {
        let mut stack = Stack::from_items("B2", vec![1, 2, 3]);
        let mut last = stack.remaining();
        while stack.take_next().is_ok() {
            assert!(stack.remaining() < last);
            last = stack.remaining();
        }
    }

    #[test]
    fn test_return_item_goes_to_done_end() {
        let mut stack = Stack::from_items("C1", vec!["a", "b"]);
        let top = stack.take_next().unwrap();
        stack.return_item(top);
        assert_eq!(stack.iter().copied().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(stack.peek(), Some(&"a"));
    }

    #[test]
    fn test_push_respects_depth() {
        let mut stack = Stack::new("D3", 2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert!(matches!(stack.push(3), Err(DeckError::Layout(_))));
    }

    #[test]
    fn test_prune_ghosts() {
        let mut stack = Stack::from_items("E1", vec!["lvl_1", "ghost", "lvl_2"]);
        let pruned = stack.prune_ghosts(|s| s.starts_with("lvl"));
        assert_eq!(pruned, 1);
        assert_eq!(stack.remaining(), 2);
    }

    #[test]
    fn test_trim_unused_drops_top_levels() {
        let mut stack = Stack::from_items("F4", vec![1, 2, 3, 4, 5]);
        let dropped = stack.trim_unused(2).unwrap();
        assert_eq!(dropped, vec![4, 5]);
        assert_eq!(stack.remaining(), 3);
        assert_eq!(stack.max_depth(), 3);
        assert!(stack.trim_unused(4).is_err());
        assert!(stack.trim_unused(0).unwrap().is_empty());
    }

    #[test]
    fn test_advance_matches_take_and_return() {
        let mut replayed = Stack::from_items("A2", vec!["p1", "p2", "p3", "p4"]);
        let mut live = replayed.clone();
        for _ in 0..2 {
            let item = live.take_next().unwrap();
            live.return_item(item);
        }
        replayed.advance(2).unwrap();
        assert_eq!(replayed, live);
        assert!(replayed.advance(5).is_err());
    }
}
