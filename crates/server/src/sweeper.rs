use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};
use uuid::Uuid;

use permitly_db::repositories::PermitRepository;

use crate::service::PermitService;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Background task that forces overdue permits into `expired`. Each permit
/// is handled independently so one bad row cannot stall the sweep.
pub struct ExpirySweeper {
    service: Arc<PermitService>,
    permits: Arc<dyn PermitRepository>,
    interval_secs: u64,
}

impl ExpirySweeper {
    pub fn new(
        service: Arc<PermitService>,
        permits: Arc<dyn PermitRepository>,
        interval_secs: u64,
    ) -> Self {
        Self { service, permits, interval_secs }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep_once(Utc::now()).await;
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepSummary {
        let correlation_id = format!("sweep-{}", Uuid::new_v4());
        let mut summary = SweepSummary::default();

        let expirable = match self.permits.list_expirable(now).await {
            Ok(expirable) => expirable,
            Err(err) => {
                error!(
                    event_name = "sweep.list_failed",
                    correlation_id = %correlation_id,
                    permit_id = "unknown",
                    error = %err,
                    "could not list expirable permits"
                );
                return summary;
            }
        };
        summary.scanned = expirable.len();

        for permit in expirable {
            match self.service.expire(&permit.id, now, &correlation_id).await {
                Ok(_) => summary.expired += 1,
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        event_name = "sweep.expire_failed",
                        correlation_id = %correlation_id,
                        permit_id = %permit.id.0,
                        error = %err,
                        "permit expiry failed, continuing sweep"
                    );
                }
            }
        }

        if summary.scanned > 0 {
            info!(
                event_name = "sweep.completed",
                correlation_id = %correlation_id,
                permit_id = "unknown",
                scanned = summary.scanned,
                expired = summary.expired,
                failed = summary.failed,
                "expiry sweep completed"
            );
        }

        summary
    }
}
