//! Timer loop driving the reconciler.

use crate::config::MIN_UPDATE_RATE;
use crate::engine::{CycleReport, Reconciler};
use crate::error::SyncError;
use crate::overlay::MapOverlay;
use crate::source::ClaimsSource;
use log::info;
use std::future::Future;
use tokio::time::{interval, MissedTickBehavior};

/// Runs one cycle per tick of the configured update rate until `shutdown`
/// completes, calling `after_cycle` with each outcome. Returns the number of
/// cycles attempted.
///
/// The cycle runs inline in the loop, so a slow cycle delays the next tick
/// rather than overlapping it; ticks missed meanwhile are skipped. The first
/// cycle runs immediately.
///
/// The update rate is read once, when the loop starts, and is never shorter
/// than [`MIN_UPDATE_RATE`]. Changing it through `config_mut` takes effect on
/// the next call.
pub async fn run_until<S, O, F, A>(
    reconciler: &mut Reconciler<S, O>,
    shutdown: F,
    mut after_cycle: A,
) -> u64
where
    S: ClaimsSource,
    O: MapOverlay,
    F: Future<Output = ()>,
    A: FnMut(&Reconciler<S, O>, &Result<CycleReport, SyncError>),
{
    let period = reconciler.config().update_rate.max(MIN_UPDATE_RATE);
    let mut interval_timer = interval(period);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);
    let mut attempted = 0;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Stopping claim updates after {} cycles", attempted);
                break;
            }

            _ = interval_timer.tick() => {
                let result = reconciler.run_cycle();
                attempted += 1;
                after_cycle(reconciler, &result);
            }
        }
    }

    attempted
}
