use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, instrument};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::VerifiedStatus;
use crate::services::payments::PaymentOrchestrator;
use crate::services::sessions::SessionService;

/// Scheduled job that resolves payments stuck in an indeterminate state.
/// Every tick reclaims expired sessions, then re-queries the provider for
/// live sessions that have been pending past the stuck threshold.
pub struct ReconciliationSweeper {
    orchestrator: Arc<PaymentOrchestrator>,
    sessions: SessionService,
    events: EventSender,
    interval_secs: u64,
    stuck_threshold_secs: i64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_removed: usize,
    pub finalized: usize,
    pub abandoned: usize,
    pub still_pending: usize,
    pub errors: usize,
}

impl ReconciliationSweeper {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        sessions: SessionService,
        events: EventSender,
        interval_secs: u64,
        stuck_threshold_secs: i64,
    ) -> Self {
        Self {
            orchestrator,
            sessions,
            events,
            interval_secs,
            stuck_threshold_secs,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "Reconciliation sweeper started: interval={}s, stuck_threshold={}s",
            self.interval_secs, self.stuck_threshold_secs
        );
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(report) => {
                    if report != SweepReport::default() {
                        info!(
                            "Sweep complete: expired={}, finalized={}, abandoned={}, pending={}, errors={}",
                            report.expired_removed,
                            report.finalized,
                            report.abandoned,
                            report.still_pending,
                            report.errors
                        );
                    }
                }
                Err(e) => error!("Sweep tick failed: {}", e),
            }
        }
    }

    /// One full pass. Each stuck session is isolated: an error on one is
    /// counted and logged without aborting the rest.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        let expired = self.sessions.sweep_expired().await?;
        report.expired_removed = expired.len();
        let expired_at = Utc::now();
        for session_id in expired {
            let _ = self
                .events
                .send(Event::SessionExpired {
                    session_id,
                    expired_at,
                })
                .await;
        }

        let cutoff = Utc::now() - Duration::seconds(self.stuck_threshold_secs);
        let stuck = self.sessions.find_stuck(cutoff).await?;
        for (session_id, _data) in stuck {
            match self.reconcile_one(&session_id).await {
                Ok(Outcome::Finalized) => report.finalized += 1,
                Ok(Outcome::Abandoned) => report.abandoned += 1,
                Ok(Outcome::StillPending) => report.still_pending += 1,
                Err(e) => {
                    report.errors += 1;
                    error!("Reconciliation failed for session {}: {}", session_id, e);
                }
            }
        }

        metrics::counter!("sweeper_sessions_finalized_total", report.finalized as u64);
        metrics::counter!("sweeper_sessions_abandoned_total", report.abandoned as u64);
        Ok(report)
    }

    async fn reconcile_one(&self, session_id: &str) -> Result<Outcome, ServiceError> {
        let outcome = self.orchestrator.verify_and_finalize(session_id).await?;
        match outcome.status {
            VerifiedStatus::Paid => {
                // The success-page read window has long passed for a stuck
                // session, so reclaim the row immediately.
                self.sessions.delete(session_id).await?;
                Ok(Outcome::Finalized)
            }
            VerifiedStatus::Failed | VerifiedStatus::Expired => {
                self.sessions.delete(session_id).await?;
                info!(
                    "Abandoned session removed: session_id={}, provider_status={}",
                    session_id, outcome.status
                );
                Ok(Outcome::Abandoned)
            }
            VerifiedStatus::Pending | VerifiedStatus::Error => Ok(Outcome::StillPending),
        }
    }
}

enum Outcome {
    Finalized,
    Abandoned,
    StillPending,
}
