//! Whole-plate replication with the 96-probe head.
//!
//! For every plate on the source stack: take the next target plate and a fresh
//! tip box, pick all 96 tips, transfer the full plate, drop the tips, and put
//! both plates back at the done end of their stacks. The per-plate steps are
//! re-armed and `plates_done` bumped in one write when a plate is finished.

use super::Protocol;
use crate::deck::DeckAddress;
use crate::driver::Command;
use crate::error::DeckResult;
use crate::frame::Take;
use crate::operator::Notification;
use crate::run::RunContext;
use async_trait::async_trait;
use tracing::info;

pub const NAME: &str = "plate-replicate";

const HOME: &str = "home";
const LOAD: &str = "load_plates";
const PICK_TIPS: &str = "pick_tips";
const TRANSFER: &str = "transfer";
const DROP_TIPS: &str = "drop_tips";
const UNLOAD: &str = "unload_plates";
/// Completed plates.
pub const PLATES_DONE: &str = "plates_done";

const PLATE_STEPS: [&str; 5] = [LOAD, PICK_TIPS, TRANSFER, DROP_TIPS, UNLOAD];

const HEAD_ROWS: usize = 8;
const HEAD_COLUMNS: usize = 12;

#[derive(Debug, Clone)]
pub struct PlateReplicate {
    /// Layout name of the source plate stack.
    pub source: String,
    pub target: String,
    pub tips: String,
    pub volume_ul: f64,
}

impl Default for PlateReplicate {
    fn default() -> Self {
        Self {
            source: "source".to_string(),
            target: "target".to_string(),
            tips: "tips".to_string(),
            volume_ul: 50.0,
        }
    }
}

struct Slots {
    source: DeckAddress,
    target: DeckAddress,
    tips: DeckAddress,
}

impl PlateReplicate {
    fn slots(&self, ctx: &RunContext) -> DeckResult<Slots> {
        let deck = ctx.deck();
        Ok(Slots {
            source: deck.slot_named(&self.source)?,
            target: deck.slot_named(&self.target)?,
            tips: deck.slot_named(&self.tips)?,
        })
    }

    /// Brings the deck in line with plates finished by earlier attempts.
    fn replay_finished(&self, ctx: &mut RunContext, slots: &Slots, done: usize) -> DeckResult<()> {
        if done == 0 {
            return Ok(());
        }
        let deck = ctx.deck_mut();
        deck.stack_mut(slots.source).advance(done)?;
        deck.stack_mut(slots.target).advance(done)?;
        let tips = deck.stack_mut(slots.tips);
        for _ in 0..done {
            tips.take_next()?;
        }
        info!(plates = done, "replayed finished plates");
        Ok(())
    }

    async fn replicate_one(&self, ctx: &mut RunContext, slots: &Slots) -> DeckResult<()> {
        let source_id = ctx.activate("source", slots.source)?.id().clone();
        let target_id = ctx.activate("target", slots.target)?.id().clone();
        ctx.activate("tips", slots.tips)?;

        if ctx.steps().should_run(LOAD) {
            for (id, to) in [(&source_id, "work_source"), (&target_id, "work_target")] {
                ctx.execute(&Command::new("move_labware").labware(id).param("to", to))
                    .await?;
            }
            ctx.steps_mut().complete(LOAD)?;
        }

        let tips = ctx.active_mut("tips")?.multi_probe(HEAD_ROWS, HEAD_COLUMNS, Take::Consume)?;
        if ctx.steps().should_run(PICK_TIPS) {
            let cmd = Command::new("pick_up_tips").on(ctx.active("tips")?, &tips)?;
            ctx.execute(&cmd).await?;
            ctx.steps_mut().complete(PICK_TIPS)?;
        }

        let wells = ctx.active_mut("source")?.multi_probe(HEAD_ROWS, HEAD_COLUMNS, Take::Consume)?;
        let dest = ctx.active_mut("target")?.multi_probe(HEAD_ROWS, HEAD_COLUMNS, Take::Consume)?;
        if ctx.steps().should_run(TRANSFER) {
            let aspirate = Command::new("aspirate")
                .on(ctx.active("source")?, &wells)?
                .param("volume_ul", self.volume_ul);
            let dispense = Command::new("dispense")
                .on(ctx.active("target")?, &dest)?
                .param("volume_ul", self.volume_ul);
            ctx.execute(&aspirate).await?;
            ctx.execute(&dispense).await?;
            ctx.steps_mut().complete(TRANSFER)?;
        }

        if ctx.steps().should_run(DROP_TIPS) {
            ctx.execute(&Command::new("drop_tips")).await?;
            ctx.steps_mut().complete(DROP_TIPS)?;
        }

        if ctx.steps().should_run(UNLOAD) {
            for (id, to) in [(&source_id, slots.source), (&target_id, slots.target)] {
                ctx.execute(
                    &Command::new("move_labware")
                        .labware(id)
                        .param("to", to.to_string()),
                )
                .await?;
            }
            ctx.steps_mut().complete(UNLOAD)?;
        }

        ctx.retire("source", true)?;
        ctx.retire("target", true)?;
        ctx.retire("tips", false)?;
        let done = ctx.steps_mut().next_iteration(PLATES_DONE, &PLATE_STEPS)?;
        info!(source = %source_id, target = %target_id, plates_done = done, "plate replicated");
        Ok(())
    }
}

#[async_trait]
impl Protocol for PlateReplicate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Copy every source plate onto a fresh target plate with the 96-probe head"
    }

    fn steps(&self) -> Vec<&'static str> {
        let mut steps = vec![HOME];
        steps.extend(PLATE_STEPS);
        steps.push(PLATES_DONE);
        steps
    }

    async fn execute(&self, ctx: &mut RunContext) -> DeckResult<()> {
        let slots = self.slots(ctx)?;

        if ctx.steps().should_run(HOME) {
            ctx.execute(&Command::new("home")).await?;
            ctx.steps_mut().complete(HOME)?;
        }

        let total = ctx.deck().stack(slots.source).remaining();
        let done = usize::try_from(ctx.steps().counter(PLATES_DONE)).unwrap_or(usize::MAX);
        self.replay_finished(ctx, &slots, done)?;

        for _ in done..total {
            self.replicate_one(ctx, &slots).await?;
        }

        ctx.operator().notify(&Notification::info(
            "Plates replicated",
            format!("{total} plate(s) copied from '{}' to '{}'", self.source, self.target),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::Deck;
    use crate::driver::MockDriver;
    use crate::labware::{LabwareInstance, LabwareKind};
    use crate::frame::ResourceFrame;
    use crate::operator::ScriptedOperator;
    use crate::position::Format;
    use crate::protocol::ProtocolRun;
    use crate::retry::Retryable;
    use crate::run::Run;
    use crate::stack::Stack;
    use std::sync::Arc;
    use std::time::Duration;

    fn stack(slot: &str, name: &str, kind: LabwareKind, n: usize) -> Stack<ResourceFrame> {
        let items = (1..=n)
            .map(|i| ResourceFrame::new(LabwareInstance::new(format!("{name}_{i}"), kind, Format::Wells96)))
            .collect();
        Stack::from_items(slot, items)
    }

    fn deck(plates: usize) -> Deck {
        let mut deck = Deck::new();
        deck.set_stack("A1".parse().unwrap(), stack("A1", "source", LabwareKind::Plate, plates))
            .unwrap();
        deck.set_stack("B1".parse().unwrap(), stack("B1", "target", LabwareKind::Plate, plates))
            .unwrap();
        deck.set_stack("C1".parse().unwrap(), stack("C1", "tips", LabwareKind::TipRack, plates))
            .unwrap();
        deck
    }

    #[tokio::test]
    async fn test_replicates_every_plate() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create_with_deck(root.path(), &deck(2)).unwrap();
        let driver = Arc::new(MockDriver::new());
        let mut job = ProtocolRun::new(
            Box::new(PlateReplicate::default()),
            &run,
            root.path().to_path_buf(),
            driver.clone(),
            Arc::new(ScriptedOperator::default()),
            Duration::from_secs(1),
        );
        job.run_once(1).await.unwrap();

        let actions = driver.actions().await;
        assert_eq!(actions.iter().filter(|a| *a == "aspirate").count(), 2);
        assert_eq!(actions[0], "home");

        let commands = driver.commands().await;
        let aspirate = commands.iter().find(|c| c.action == "aspirate").unwrap();
        assert_eq!(aspirate.positions, (0..96).collect::<Vec<_>>());
        assert_eq!(aspirate.labware.as_ref().unwrap().as_str(), "source_2");

        let ctx = job.open_context().unwrap();
        assert_eq!(ctx.steps().counter(PLATES_DONE), 2);
        assert!(PLATE_STEPS.iter().all(|s| !ctx.steps().is_done(s)));
    }

    #[tokio::test]
    async fn test_resume_mid_plate_skips_done_steps() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create_with_deck(root.path(), &deck(2)).unwrap();
        let driver = Arc::new(MockDriver::new());
        driver.fail_next("dispense", 1).await;
        let mut job = ProtocolRun::new(
            Box::new(PlateReplicate::default()),
            &run,
            root.path().to_path_buf(),
            driver.clone(),
            Arc::new(ScriptedOperator::default()),
            Duration::from_secs(1),
        );
        assert!(job.run_once(1).await.is_err());
        let first = driver.actions().await.len();

        job.run_once(2).await.unwrap();
        let actions = driver.actions().await;
        let resumed = &actions[first..];
        // home, load and pick_tips of plate 1 are not repeated
        assert_eq!(resumed[0], "aspirate");
        assert!(!resumed.contains(&"home".to_string()));
        assert_eq!(resumed.iter().filter(|a| *a == "pick_up_tips").count(), 1);
        assert_eq!(job.open_context().unwrap().steps().counter(PLATES_DONE), 2);
    }
}
