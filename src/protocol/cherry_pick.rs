//! Cherry picking with the 2-probe head.
//!
//! The source wells come from `wellmap.csv` in the run directory. Every plate
//! on the source stack is taken in turn, filled with exactly its mapped wells
//! and drained in 2-channel batches; each batch picks two tips, moves the
//! wells to their mapped targets, and drops the tips. Every row must name a
//! plate on the source stack and the active target plate.
//!
//! Batches are counted in `batches_done` across all source plates.
//! Allocation is a pure function of occupancy, so a resumed attempt replays
//! the finished batches' allocations without sending any commands for them.

use super::Protocol;
use crate::deck::DeckAddress;
use crate::driver::Command;
use crate::error::{DeckError, DeckResult};
use crate::frame::Take;
use crate::mapping::WellMap;
use crate::operator::Notification;
use crate::run::RunContext;
use async_trait::async_trait;
use tracing::{debug, info};

pub const NAME: &str = "cherry-pick";
/// Well map read from the run directory.
pub const WELLMAP_FILE: &str = "wellmap.csv";

const HOME: &str = "home";
const PICK_TIPS: &str = "pick_tips";
const TRANSFER: &str = "transfer";
const DROP_TIPS: &str = "drop_tips";
pub const BATCHES_DONE: &str = "batches_done";

const BATCH_STEPS: [&str; 3] = [PICK_TIPS, TRANSFER, DROP_TIPS];

#[derive(Debug, Clone)]
pub struct CherryPick {
    pub source: String,
    pub target: String,
    pub tips: String,
    pub channels: usize,
    pub volume_ul: f64,
}

impl Default for CherryPick {
    fn default() -> Self {
        Self {
            source: "source".to_string(),
            target: "target".to_string(),
            tips: "tips".to_string(),
            channels: 2,
            volume_ul: 10.0,
        }
    }
}

#[async_trait]
impl Protocol for CherryPick {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Move the wells listed in wellmap.csv in 2-channel batches"
    }

    fn steps(&self) -> Vec<&'static str> {
        let mut steps = vec![HOME];
        steps.extend(BATCH_STEPS);
        steps.push(BATCHES_DONE);
        steps
    }

    async fn execute(&self, ctx: &mut RunContext) -> DeckResult<()> {
        let map = WellMap::from_path(&ctx.run().file(WELLMAP_FILE))?;
        if map.is_empty() {
            return Err(DeckError::Mapping(format!("{WELLMAP_FILE} lists no wells")));
        }
        let deck = ctx.deck();
        let (source_slot, target_slot, tips_slot) = (
            deck.slot_named(&self.source)?,
            deck.slot_named(&self.target)?,
            deck.slot_named(&self.tips)?,
        );
        check_plates(&map, ctx, source_slot, target_slot)?;

        if ctx.steps().should_run(HOME) {
            ctx.execute(&Command::new("home")).await?;
            ctx.steps_mut().complete(HOME)?;
        }

        let target_format = ctx.activate("target", target_slot)?.format();
        ctx.activate("tips", tips_slot)?;

        let done = ctx.steps().counter(BATCHES_DONE);
        let mut batch: u64 = 0;
        let mut moved = 0;
        let plates = ctx.deck().stack(source_slot).remaining();
        for _ in 0..plates {
            let source = ctx.activate("source", source_slot)?;
            let (source_id, source_format) = (source.id().clone(), source.format());
            let wells = map.source_positions(source_id.as_str(), source_format)?;
            source.fill(&wells)?;
            debug!(source = %source_id, wells = wells.len(), "source plate taken");

            while !ctx.active("source")?.is_exhausted() {
                let available = ctx.active_mut("tips")?.two_channel(self.channels, Take::Peek)?.len();
                let picked = ctx.active_mut("source")?.two_channel(available, Take::Consume)?;
                let tips = ctx.active_mut("tips")?.two_channel(picked.len(), Take::Consume)?;
                let targets = map.targets(source_id.as_str(), source_format, &picked, target_format)?;
                batch += 1;
                if batch <= done {
                    debug!(batch, "batch finished by an earlier attempt");
                    continue;
                }

                if ctx.steps().should_run(PICK_TIPS) {
                    let cmd = Command::new("pick_up_tips").on(ctx.active("tips")?, &tips)?;
                    ctx.execute(&cmd).await?;
                    ctx.steps_mut().complete(PICK_TIPS)?;
                }
                if ctx.steps().should_run(TRANSFER) {
                    let aspirate = Command::new("aspirate")
                        .on(ctx.active("source")?, &picked)?
                        .param("volume_ul", self.volume_ul);
                    let dispense = Command::new("dispense")
                        .on(ctx.active("target")?, &targets)?
                        .param("volume_ul", self.volume_ul);
                    ctx.execute(&aspirate).await?;
                    ctx.execute(&dispense).await?;
                    ctx.steps_mut().complete(TRANSFER)?;
                }
                if ctx.steps().should_run(DROP_TIPS) {
                    ctx.execute(&Command::new("drop_tips")).await?;
                    ctx.steps_mut().complete(DROP_TIPS)?;
                }
                ctx.steps_mut().next_iteration(BATCHES_DONE, &BATCH_STEPS)?;
            }
            moved += wells.len();
            ctx.retire("source", true)?;
        }

        ctx.retire("target", true)?;
        ctx.retire("tips", true)?;
        info!(plates, wells = moved, batches = batch, "cherry pick finished");
        ctx.operator().notify(&Notification::info(
            "Cherry pick finished",
            format!("{moved} well(s) from {plates} plate(s) in {batch} batch(es)"),
        ));
        Ok(())
    }
}

/// Rejects well maps that name plates this run would never touch.
fn check_plates(
    map: &WellMap,
    ctx: &RunContext,
    source_slot: DeckAddress,
    target_slot: DeckAddress,
) -> DeckResult<()> {
    let sources: Vec<&str> = ctx
        .deck()
        .stack(source_slot)
        .iter()
        .map(|frame| frame.id().as_str())
        .collect();
    let target = ctx
        .deck()
        .stack(target_slot)
        .peek()
        .map(|frame| frame.id().as_str())
        .ok_or_else(|| DeckError::StackEmpty {
            slot: target_slot.to_string(),
        })?;

    for row in map.rows() {
        if !sources.contains(&row.source_plate.as_str()) {
            return Err(DeckError::Mapping(format!(
                "{}:{} names a source plate that is not stacked at {source_slot}",
                row.source_plate, row.source_well
            )));
        }
        if row.target_plate != target {
            return Err(DeckError::Mapping(format!(
                "{}:{} maps to '{}', but the target plate is '{target}'",
                row.source_plate, row.source_well, row.target_plate
            )));
        }
    }
    Ok(())
}
