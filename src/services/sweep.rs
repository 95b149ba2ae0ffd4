//! Periodic sweep: overdue status cache and expired reservation holds

use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

use super::{circulation::CirculationService, engine::EngineContext, reservations::ReservationService};

/// What one sweep changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub marked_overdue: usize,
    pub expired_holds: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    ctx: EngineContext,
    circulation: CirculationService,
    reservations: ReservationService,
}

impl Sweeper {
    pub fn new(ctx: EngineContext, circulation: CirculationService, reservations: ReservationService) -> Self {
        Self {
            ctx,
            circulation,
            reservations,
        }
    }

    /// One pass over the store.
    ///
    /// Each candidate is re-checked under its item lock, so records resolved
    /// since the scan are skipped. A failing candidate is logged and the pass
    /// moves on.
    pub async fn sweep_once(&self) -> AppResult<SweepReport> {
        let now = self.ctx.clock.now();
        let mut report = SweepReport::default();

        for record in self.ctx.store.overdue_candidates(now).await? {
            match self.circulation.mark_overdue(record.id, record.item_id).await {
                Ok(true) => report.marked_overdue += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(record_id = record.id, "Sweep could not mark loan overdue: {}", e),
            }
        }

        let cutoff = now
            .checked_sub_signed(self.ctx.policy.snapshot().grace_window()?)
            .ok_or_else(|| AppError::Validation("Grace window reaches before the earliest date".to_string()))?;
        for hold in self.ctx.store.expired_holds(cutoff).await? {
            match self.reservations.expire_hold(hold.id, hold.item_id, cutoff).await {
                Ok(Some(_)) => report.expired_holds += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(reservation_id = hold.id, "Sweep could not expire hold: {}", e),
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                marked_overdue = report.marked_overdue,
                expired_holds = report.expired_holds,
                "Circulation sweep finished"
            );
        }
        Ok(report)
    }
}

/// Background task running [`Sweeper::sweep_once`] on a fixed interval
pub async fn run_sweeper(sweeper: Sweeper, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = sweeper.sweep_once().await {
            tracing::warn!("Circulation sweep failed: {}", e);
        }
    }
}
