//! Runs and the per-run context.
//!
//! A run is one execution of one or more protocols against one physical deck
//! load. Its directory holds the deck inventory written at creation
//! (`deck.json`), one state file per protocol (`<protocol>.state.json`) and any
//! tabular inputs the protocols read (`wellmap.csv`).
//!
//! [`RunContext`] bundles everything a protocol touches: the deck, the step
//! scheduler, the active frames, the device driver and the operator. It is
//! built from disk for every attempt and passed explicitly; nothing here is
//! global.

use crate::deck::{Deck, DeckAddress};
use crate::driver::{dispatch, Command, DeviceDriver, Response};
use crate::error::{DeckError, DeckResult};
use crate::frame::ResourceFrame;
use crate::operator::HumanInTheLoop;
use crate::scheduler::StepScheduler;
use crate::state::StateStore;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Deck inventory file inside a run directory.
pub const INVENTORY_FILE: &str = "deck.json";

const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

// =============================================================================
// Run - identifier and directory
// =============================================================================

/// A run identifier and its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    id: String,
    dir: PathBuf,
}

impl Run {
    /// Creates a new run directory under `root`, named after the current time.
    ///
    /// Two runs started within the same second get `_2`, `_3`, ... suffixes.
    pub fn create(root: &Path) -> DeckResult<Self> {
        std::fs::create_dir_all(root)?;
        let base = Local::now().format(RUN_ID_FORMAT).to_string();
        let mut suffix = 1;
        loop {
            let id = if suffix == 1 {
                base.clone()
            } else {
                format!("{base}_{suffix}")
            };
            let dir = root.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    info!(run = %id, dir = %dir.display(), "run created");
                    return Ok(Self { id, dir });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Creates a new run and writes `deck` as its inventory.
    pub fn create_with_deck(root: &Path, deck: &Deck) -> DeckResult<Self> {
        let run = Self::create(root)?;
        deck.save(&run.inventory_path())?;
        Ok(run)
    }

    /// Opens an existing run.
    pub fn open(root: &Path, id: &str) -> DeckResult<Self> {
        let dir = root.join(id);
        if !dir.is_dir() {
            return Err(DeckError::StateNotFound(dir));
        }
        Ok(Self {
            id: id.to_string(),
            dir,
        })
    }

    /// Run ids under `root`, newest first. A missing root has no runs.
    pub fn list(root: &Path) -> DeckResult<Vec<String>> {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<run_dir>/<protocol>.state.json`
    pub fn state_path(&self, protocol: &str) -> PathBuf {
        self.dir.join(format!("{protocol}.state.json"))
    }

    /// `<run_dir>/deck.json`
    pub fn inventory_path(&self) -> PathBuf {
        self.dir.join(INVENTORY_FILE)
    }

    /// Any other file inside the run directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

// =============================================================================
// RunContext - everything a protocol works against
// =============================================================================

#[derive(Debug)]
struct ActiveFrame {
    origin: DeckAddress,
    frame: ResourceFrame,
}

/// Deck, state, active frames and collaborators for one protocol attempt.
pub struct RunContext {
    run: Run,
    deck: Deck,
    steps: StepScheduler,
    active: BTreeMap<String, ActiveFrame>,
    driver: Arc<dyn DeviceDriver>,
    device_timeout: Duration,
}

impl RunContext {
    pub fn new(
        run: Run,
        deck: Deck,
        steps: StepScheduler,
        driver: Arc<dyn DeviceDriver>,
        device_timeout: Duration,
    ) -> Self {
        Self {
            run,
            deck,
            steps,
            active: BTreeMap::new(),
            driver,
            device_timeout,
        }
    }

    /// Loads the inventory and the protocol's state file from `run`.
    ///
    /// A run without inventory is [`DeckError::StateNotFound`]. A missing state
    /// file is initialised with every step in `steps` unset.
    pub fn open(
        run: Run,
        protocol: &str,
        steps: &[&str],
        driver: Arc<dyn DeviceDriver>,
        operator: Arc<dyn HumanInTheLoop>,
        device_timeout: Duration,
    ) -> DeckResult<Self> {
        let deck = Deck::load(&run.inventory_path())?;
        let store = StateStore::open_or_init(&run.state_path(protocol), steps)?;
        info!(
            run = %run.id(),
            protocol,
            done = store.state().iter().filter(|(_, v)| *v != 0).count(),
            "run context opened"
        );
        Ok(Self::new(
            run,
            deck,
            StepScheduler::new(store, operator),
            driver,
            device_timeout,
        ))
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn deck_mut(&mut self) -> &mut Deck {
        &mut self.deck
    }

    pub fn steps(&self) -> &StepScheduler {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut StepScheduler {
        &mut self.steps
    }

    pub fn operator(&self) -> &dyn HumanInTheLoop {
        self.steps.operator()
    }

    /// Takes the top item of the stack at `slot` and makes it the active frame for `role`.
    pub fn activate(&mut self, role: &str, slot: DeckAddress) -> DeckResult<&mut ResourceFrame> {
        if self.active.contains_key(role) {
            return Err(DeckError::Layout(format!("role '{role}' already has an active frame")));
        }
        let frame = self.deck.stack_mut(slot).take_next()?;
        info!(role, slot = %slot, labware = %frame.id(), remaining = frame.remaining_count(), "frame activated");
        let entry = self
            .active
            .entry(role.to_string())
            .or_insert(ActiveFrame { origin: slot, frame });
        Ok(&mut entry.frame)
    }

    pub fn active(&self, role: &str) -> DeckResult<&ResourceFrame> {
        self.active
            .get(role)
            .map(|a| &a.frame)
            .ok_or_else(|| DeckError::Layout(format!("no active frame for role '{role}'")))
    }

    pub fn active_mut(&mut self, role: &str) -> DeckResult<&mut ResourceFrame> {
        self.active
            .get_mut(role)
            .map(|a| &mut a.frame)
            .ok_or_else(|| DeckError::Layout(format!("no active frame for role '{role}'")))
    }

    /// Slot the active frame for `role` was taken from.
    pub fn origin(&self, role: &str) -> DeckResult<DeckAddress> {
        self.active
            .get(role)
            .map(|a| a.origin)
            .ok_or_else(|| DeckError::Layout(format!("no active frame for role '{role}'")))
    }

    /// Ends the active frame for `role`: back to the done end of its stack, or
    /// handed to the caller when `return_to_stack` is false (discarded labware).
    pub fn retire(&mut self, role: &str, return_to_stack: bool) -> DeckResult<Option<ResourceFrame>> {
        let ActiveFrame { origin, frame } = self
            .active
            .remove(role)
            .ok_or_else(|| DeckError::Layout(format!("no active frame for role '{role}'")))?;
        debug!(role, labware = %frame.id(), returned = return_to_stack, "frame retired");
        if return_to_stack {
            self.deck.stack_mut(origin).return_item(frame);
            Ok(None)
        } else {
            Ok(Some(frame))
        }
    }

    /// Sends one command and waits for it within the configured timeout.
    pub async fn execute(&self, command: &Command) -> DeckResult<Response> {
        dispatch(self.driver.as_ref(), command, self.device_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::labware::{LabwareInstance, LabwareKind};
    use crate::operator::ScriptedOperator;
    use crate::position::Format;
    use crate::stack::Stack;

    fn seeded_run(root: &Path) -> Run {
        let mut deck = Deck::new();
        let plates = (1..=2)
            .map(|i| {
                ResourceFrame::new(LabwareInstance::new(
                    format!("plate_{i}"),
                    LabwareKind::Plate,
                    Format::Wells96,
                ))
            })
            .collect();
        deck.set_stack("A1".parse().unwrap(), Stack::from_items("A1", plates))
            .unwrap();
        Run::create_with_deck(root, &deck).unwrap()
    }

    fn open(run: Run) -> RunContext {
        RunContext::open(
            run,
            "demo",
            &["load"],
            Arc::new(MockDriver::new()),
            Arc::new(ScriptedOperator::default()),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_create_open_list() {
        let root = tempfile::tempdir().unwrap();
        let first = Run::create(root.path()).unwrap();
        let second = Run::create(root.path()).unwrap();
        assert_ne!(first.id(), second.id());

        let ids = Run::list(root.path()).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id().to_string()));

        let reopened = Run::open(root.path(), first.id()).unwrap();
        assert_eq!(reopened, first);
        assert!(matches!(
            Run::open(root.path(), "19990101_000000"),
            Err(DeckError::StateNotFound(_))
        ));
        assert_eq!(first.state_path("pcr").file_name().unwrap(), "pcr.state.json");
    }

    #[test]
    fn test_list_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(Run::list(&root.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_open_requires_inventory() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path()).unwrap();
        let result = RunContext::open(
            run,
            "demo",
            &["load"],
            Arc::new(MockDriver::new()),
            Arc::new(ScriptedOperator::default()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(DeckError::StateNotFound(_))));
    }

    #[test]
    fn test_activate_and_retire() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = open(seeded_run(root.path()));
        let slot: DeckAddress = "A1".parse().unwrap();

        let frame = ctx.activate("source", slot).unwrap();
        assert_eq!(frame.id().as_str(), "plate_2");
        assert!(ctx.activate("source", slot).is_err());
        assert_eq!(ctx.origin("source").unwrap(), slot);

        assert!(ctx.retire("source", true).unwrap().is_none());
        assert_eq!(ctx.deck().stack(slot).iter().next().unwrap().id().as_str(), "plate_2");
        assert!(ctx.active("source").is_err());

        ctx.activate("source", slot).unwrap();
        let discarded = ctx.retire("source", false).unwrap().unwrap();
        assert_eq!(discarded.id().as_str(), "plate_1");
        assert_eq!(ctx.deck().stack(slot).remaining(), 1);
    }

    #[tokio::test]
    async fn test_execute_goes_through_driver() {
        let root = tempfile::tempdir().unwrap();
        let driver = Arc::new(MockDriver::new());
        let ctx = RunContext::open(
            seeded_run(root.path()),
            "demo",
            &["load"],
            driver.clone(),
            Arc::new(ScriptedOperator::default()),
            Duration::from_secs(1),
        )
        .unwrap();
        ctx.execute(&Command::new("home")).await.unwrap();
        assert_eq!(driver.actions().await, vec!["home"]);
    }
}
