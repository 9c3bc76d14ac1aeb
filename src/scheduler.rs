//! Guarded step execution.
//!
//! Every protocol is a linear sequence of named steps, each gated by its flag
//! in the run state:
//!
//! ```text
//! if !done(step) { do_work(); set(step, 1) }
//! ```
//!
//! The flag is persisted right after the body succeeds, so a resumed run skips
//! every step that completed before the interruption. A step interrupted half
//! way is re-run from the top; step bodies must be safe to repeat.
//!
//! Async protocol code uses the [`StepScheduler::should_run`] /
//! [`StepScheduler::complete`] pair around the body; synchronous bodies can go
//! through [`StepScheduler::step`].

use crate::error::{DeckError, DeckResult};
use crate::operator::HumanInTheLoop;
use crate::state::StateStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs guarded steps against a [`StateStore`].
pub struct StepScheduler {
    store: StateStore,
    operator: Arc<dyn HumanInTheLoop>,
}

impl StepScheduler {
    pub fn new(store: StateStore, operator: Arc<dyn HumanInTheLoop>) -> Self {
        Self { store, operator }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn operator(&self) -> &dyn HumanInTheLoop {
        self.operator.as_ref()
    }

    /// Registers the protocol's step names; existing values are kept.
    pub fn declare(&mut self, steps: &[&str]) -> DeckResult<()> {
        self.store.declare(steps)?;
        Ok(())
    }

    /// Whether `step` still has to run. Logs the skip otherwise.
    pub fn should_run(&self, step: &str) -> bool {
        if self.store.is_done(step) {
            info!(step, "step already completed, skipping");
            false
        } else {
            info!(step, "running step");
            true
        }
    }

    /// Marks `step` done and persists before returning.
    pub fn complete(&mut self, step: &str) -> DeckResult<()> {
        self.store.set(step, 1)?;
        info!(step, "step completed");
        Ok(())
    }

    /// Runs `body` unless `step` is already done. Returns whether it ran.
    pub fn step<F>(&mut self, step: &str, body: F) -> DeckResult<bool>
    where
        F: FnOnce() -> DeckResult<()>,
    {
        if !self.should_run(step) {
            return Ok(false);
        }
        body()?;
        self.complete(step)?;
        Ok(true)
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.store.is_done(step)
    }

    /// Re-arms looped steps for the next iteration.
    pub fn rearm(&mut self, steps: &[&str]) -> DeckResult<()> {
        let changes: Vec<(&str, u64)> = steps.iter().map(|s| (*s, 0)).collect();
        self.store.update(&changes)?;
        debug!(?steps, "steps re-armed");
        Ok(())
    }

    /// Closes one loop iteration: bumps `counter` and re-arms `steps` in a
    /// single write, so a crash leaves either the old iteration or the new one.
    pub fn next_iteration(&mut self, counter: &str, steps: &[&str]) -> DeckResult<u64> {
        let next = self.incremented(counter)?;
        let mut changes: Vec<(&str, u64)> = steps.iter().map(|s| (*s, 0)).collect();
        changes.push((counter, next));
        self.store.update(&changes)?;
        info!(counter, value = next, "loop iteration closed");
        Ok(next)
    }

    /// Current value of a counter flag.
    pub fn counter(&self, name: &str) -> u64 {
        self.store.get(name)
    }

    /// Increments a counter flag and persists it.
    pub fn bump(&mut self, name: &str) -> DeckResult<u64> {
        let next = self.incremented(name)?;
        self.store.set(name, next)?;
        Ok(next)
    }

    /// `name` plus one. A counter at `u64::MAX` can only come from a bad
    /// manual override and is reported as corrupt state.
    fn incremented(&self, name: &str) -> DeckResult<u64> {
        self.store
            .get(name)
            .checked_add(1)
            .ok_or_else(|| DeckError::StateCorrupt {
                path: self.store.path().to_path_buf(),
                reason: format!("counter '{name}' cannot be incremented past {}", u64::MAX),
            })
    }
}
