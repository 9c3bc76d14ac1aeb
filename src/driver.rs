//! Device driver boundary.
//!
//! The robot is an external collaborator: it accepts a command descriptor,
//! hands back a handle, and later resolves the handle to success or failure.
//! This crate never looks at wire-level detail. It only passes
//! `(labware, linear index)` pairs plus scalar parameters, and reads back
//! success or failure.
//!
//! [`dispatch`] is the one place a command round-trip is awaited; it bounds the
//! wait with a timeout and turns an overrun into [`DeckError::DeviceTimeout`].
//!
//! [`MockDriver`] records every command for tests and dry runs.

use crate::error::{DeckError, DeckResult};
use crate::frame::ResourceFrame;
use crate::labware::LabwareId;
use crate::position::Position;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// A command descriptor for the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Operation name, e.g. `"aspirate"`, `"move_labware"`.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labware: Option<LabwareId>,
    /// Column-major indices within `labware`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            labware: None,
            positions: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Targets `positions` of the frame's labware.
    pub fn on(mut self, frame: &ResourceFrame, positions: &[Position]) -> DeckResult<Self> {
        self.labware = Some(frame.id().clone());
        self.positions = frame.indices(positions)?;
        Ok(self)
    }

    /// Targets a labware item as a whole (moves, lid handling).
    pub fn labware(mut self, id: &LabwareId) -> Self {
        self.labware = Some(id.clone());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Handle for an in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(pub u64);

/// Completion report for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub handle: CommandHandle,
    pub ok: bool,
    pub message: String,
}

/// The external robot driver.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Submits a command and returns without waiting for completion.
    async fn send(&self, command: &Command) -> DeckResult<CommandHandle>;

    /// Waits for `handle` to complete. With `raise_on_error` a failed command is
    /// returned as [`DeckError::DeviceCommand`], otherwise as a `Response` with `ok == false`.
    async fn wait(&self, handle: CommandHandle, raise_on_error: bool) -> DeckResult<Response>;
}

/// Sends `command` and waits for it, failing with [`DeckError::DeviceTimeout`] after `limit`.
pub async fn dispatch(
    driver: &dyn DeviceDriver,
    command: &Command,
    limit: Duration,
) -> DeckResult<Response> {
    debug!(action = %command.action, labware = ?command.labware, positions = ?command.positions, "dispatching command");
    let handle = driver.send(command).await?;
    match timeout(limit, driver.wait(handle, true)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(action = %command.action, ?limit, "device command timed out");
            Err(DeckError::DeviceTimeout {
                command: command.action.clone(),
                timeout: limit,
            })
        }
    }
}

// =============================================================================
// MockDriver - Simulated robot
// =============================================================================

/// Simulated robot that records commands and can be told to fail.
///
/// ```rust,ignore
/// let driver = MockDriver::new();
/// driver.fail_next("aspirate", 1).await;
/// assert!(dispatch(&driver, &Command::new("aspirate"), Duration::from_secs(1)).await.is_err());
/// ```
#[derive(Debug, Default)]
pub struct MockDriver {
    next_handle: AtomicU64,
    log: Mutex<Vec<Command>>,
    pending: Mutex<HashMap<CommandHandle, String>>,
    failures: Mutex<HashMap<String, usize>>,
    latency: Duration,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every completion takes `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Makes the next `times` commands named `action` fail.
    pub async fn fail_next(&self, action: &str, times: usize) {
        self.failures.lock().await.insert(action.to_string(), times);
    }

    /// Commands received so far, in order.
    pub async fn commands(&self) -> Vec<Command> {
        self.log.lock().await.clone()
    }

    /// Actions received so far, in order.
    pub async fn actions(&self) -> Vec<String> {
        self.log.lock().await.iter().map(|c| c.action.clone()).collect()
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    async fn send(&self, command: &Command) -> DeckResult<CommandHandle> {
        let handle = CommandHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.log.lock().await.push(command.clone());
        self.pending.lock().await.insert(handle, command.action.clone());
        Ok(handle)
    }

    async fn wait(&self, handle: CommandHandle, raise_on_error: bool) -> DeckResult<Response> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let action = self
            .pending
            .lock()
            .await
            .remove(&handle)
            .ok_or_else(|| DeckError::DeviceCommand {
                command: format!("handle {}", handle.0),
                reason: "unknown handle".to_string(),
            })?;

        let failed = {
            let mut failures = self.failures.lock().await;
            match failures.get_mut(&action) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };

        if failed && raise_on_error {
            return Err(DeckError::DeviceCommand {
                command: action,
                reason: "simulated failure".to_string(),
            });
        }
        Ok(Response {
            handle,
            ok: !failed,
            message: if failed { "simulated failure".into() } else { "done".into() },
        })
    }
}
