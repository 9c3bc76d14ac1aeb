//! Protocols and the protocol registry.
//!
//! A protocol is a linear sequence of guarded steps run against a
//! [`RunContext`]. Every device command sits inside a step; allocation and
//! stack bookkeeping happens outside steps, so a resumed attempt replays it
//! and ends up with the same active frames the interrupted attempt had.
//!
//! [`ProtocolRun`] wraps one protocol in one run for
//! [`run_with_retry`](crate::retry::run_with_retry): each attempt re-opens the
//! run from disk, which makes a retry behave exactly like a resume.

pub mod cherry_pick;
pub mod plate_replicate;

use crate::driver::DeviceDriver;
use crate::error::{DeckError, DeckResult};
use crate::operator::HumanInTheLoop;
use crate::retry::Retryable;
use crate::run::{Run, RunContext};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use cherry_pick::CherryPick;
pub use plate_replicate::PlateReplicate;

/// A runnable protocol.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Registry key, also the state file stem.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Every flag the protocol reads, declared unset on a fresh run.
    fn steps(&self) -> Vec<&'static str>;

    /// Runs the protocol. Completed steps are skipped.
    async fn execute(&self, ctx: &mut RunContext) -> DeckResult<()>;
}

type ProtocolFactory = Box<dyn Fn() -> Box<dyn Protocol> + Send + Sync>;

/// Built-in protocols by name.
pub struct ProtocolRegistry {
    factories: BTreeMap<String, ProtocolFactory>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register(plate_replicate::NAME, || Box::new(PlateReplicate::default()));
        registry.register(cherry_pick::NAME, || Box::new(CherryPick::default()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Protocol> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> DeckResult<Box<dyn Protocol>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| DeckError::UnknownProtocol(name.to_string()))
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn list(&self) -> Vec<(String, &'static str)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.clone(), factory().description()))
            .collect()
    }
}

// =============================================================================
// ProtocolRun - one protocol in one run, retryable
// =============================================================================

/// One protocol bound to one run directory.
pub struct ProtocolRun {
    protocol: Box<dyn Protocol>,
    runs_root: PathBuf,
    run_id: String,
    driver: Arc<dyn DeviceDriver>,
    operator: Arc<dyn HumanInTheLoop>,
    device_timeout: Duration,
}

impl ProtocolRun {
    pub fn new(
        protocol: Box<dyn Protocol>,
        run: &Run,
        runs_root: PathBuf,
        driver: Arc<dyn DeviceDriver>,
        operator: Arc<dyn HumanInTheLoop>,
        device_timeout: Duration,
    ) -> Self {
        Self {
            protocol,
            runs_root,
            run_id: run.id().to_string(),
            driver,
            operator,
            device_timeout,
        }
    }

    /// Opens a fresh context from the run directory.
    pub fn open_context(&self) -> DeckResult<RunContext> {
        let run = Run::open(&self.runs_root, &self.run_id)?;
        RunContext::open(
            run,
            self.protocol.name(),
            &self.protocol.steps(),
            self.driver.clone(),
            self.operator.clone(),
            self.device_timeout,
        )
    }
}

#[async_trait]
impl Retryable for ProtocolRun {
    fn label(&self) -> String {
        format!("{} (run {})", self.protocol.name(), self.run_id)
    }

    async fn run_once(&mut self, attempt: u32) -> DeckResult<()> {
        let mut ctx = self.open_context()?;
        info!(protocol = self.protocol.name(), run = %self.run_id, attempt, "protocol attempt");
        self.protocol.execute(&mut ctx).await
    }
}
