//! Durable run state: one integer flag per protocol step.
//!
//! Each flag follows `unset (0) -> done (1)`. Looping steps re-arm their flag to 0
//! before repeating, and counters may climb above 1. The whole record lives in a
//! single pretty-printed JSON file per (run, protocol) and is rewritten
//! atomically after every mutation, so after a crash the file reflects every
//! flag set before the crash and no others.
//!
//! Keys are kept sorted, which makes save -> load -> save byte-identical.

use crate::error::{DeckError, DeckResult};
use crate::operator::{HumanInTheLoop, Notification};
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Step name -> flag value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunState {
    flags: BTreeMap<String, u64>,
}

impl RunState {
    /// State with every listed step unset.
    pub fn fresh<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: steps.into_iter().map(|s| (s.into(), 0)).collect(),
        }
    }

    /// Flag value; unknown steps read as 0.
    pub fn get(&self, step: &str) -> u64 {
        self.flags.get(step).copied().unwrap_or(0)
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.get(step) != 0
    }

    pub fn contains(&self, step: &str) -> bool {
        self.flags.contains_key(step)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Canonical on-disk form.
    pub fn to_json(&self) -> DeckResult<String> {
        let mut json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        json.push('\n');
        Ok(json)
    }

    fn insert(&mut self, step: &str, value: u64) {
        self.flags.insert(step.to_string(), value);
    }
}

impl fmt::Display for RunState {
    /// Operator-facing table of every flag.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.flags.keys().map(String::len).max().unwrap_or(4).max(4);
        writeln!(f, "{:<width$}  value", "step")?;
        writeln!(f, "{}  -----", "-".repeat(width))?;
        for (step, value) in &self.flags {
            writeln!(f, "{step:<width$}  {value}")?;
        }
        Ok(())
    }
}

/// A [`RunState`] bound to its file; every mutation is persisted before returning.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    state: RunState,
}

impl StateStore {
    /// Reads the record at `path`.
    ///
    /// A missing file is [`DeckError::StateNotFound`]; an unreadable or malformed
    /// one is [`DeckError::StateCorrupt`] and is never repaired.
    pub fn load(path: &Path) -> DeckResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeckError::StateNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let state: RunState = serde_json::from_str(&text).map_err(|e| DeckError::StateCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), flags = state.len(), "run state loaded");
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Creates `path` with `state` and persists it.
    pub fn create(path: &Path, state: RunState) -> DeckResult<Self> {
        let store = Self {
            path: path.to_path_buf(),
            state,
        };
        store.save()?;
        info!(path = %path.display(), flags = store.state.len(), "run state created");
        Ok(store)
    }

    /// Loads `path`, or creates it with every step in `steps` unset.
    ///
    /// Steps missing from an existing record are added as unset; existing values
    /// are left untouched.
    pub fn open_or_init(path: &Path, steps: &[&str]) -> DeckResult<Self> {
        match Self::load(path) {
            Ok(mut store) => {
                store.declare(steps)?;
                Ok(store)
            }
            Err(DeckError::StateNotFound(_)) => Self::create(path, RunState::fresh(steps.iter().copied())),
            Err(e) => Err(e),
        }
    }

    /// Adds every step not yet in the record as unset. Returns how many were added.
    pub fn declare(&mut self, steps: &[&str]) -> DeckResult<usize> {
        let missing: Vec<&str> = steps.iter().copied().filter(|s| !self.state.contains(s)).collect();
        for step in &missing {
            self.state.insert(step, 0);
        }
        if !missing.is_empty() {
            self.save()?;
            debug!(?missing, "steps declared");
        }
        Ok(missing.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn get(&self, step: &str) -> u64 {
        self.state.get(step)
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.state.is_done(step)
    }

    /// Writes the full record with write-then-rename semantics.
    pub fn save(&self) -> DeckResult<()> {
        write_atomic(&self.path, self.state.to_json()?.as_bytes())?;
        Ok(())
    }

    /// Sets one flag and persists immediately.
    pub fn set(&mut self, step: &str, value: u64) -> DeckResult<()> {
        self.state.insert(step, value);
        self.save()?;
        debug!(step, value, "run state flag persisted");
        Ok(())
    }

    /// Applies several flag changes with a single write.
    pub fn update(&mut self, changes: &[(&str, u64)]) -> DeckResult<()> {
        for (step, value) in changes {
            self.state.insert(step, *value);
        }
        self.save()?;
        debug!(?changes, "run state flags persisted");
        Ok(())
    }

    /// Lets the operator force one flag to a chosen value. Manual recovery only.
    ///
    /// Returns the step and value that were written, or `None` when the operator
    /// declines.
    pub fn interactive_override(&mut self, operator: &dyn HumanInTheLoop) -> DeckResult<Option<(String, u64)>> {
        operator.notify(&Notification::info(
            "Run state",
            format!("{}\n{}", self.path.display(), self.state),
        ));
        let steps: Vec<String> = self.state.flags.keys().cloned().collect();
        if steps.is_empty() {
            return Ok(None);
        }
        let idx = operator.choose("Which step flag should be changed?", &steps)?;
        let step = &steps[idx];
        let answer = operator.ask(&format!(
            "New value for '{step}' (currently {})",
            self.state.get(step)
        ))?;
        let value: u64 = answer
            .parse()
            .map_err(|_| DeckError::Aborted(format!("'{answer}' is not a non-negative integer")))?;
        if !operator.confirm(&format!("Set '{step}' to {value}?"))? {
            return Ok(None);
        }
        self.set(step, value)?;
        info!(step = %step, value, "run state flag overridden by operator");
        Ok(Some((step.clone(), value)))
    }
}
