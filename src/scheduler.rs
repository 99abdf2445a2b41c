//! Recurring delivery scheduler.
//!
//! A fixed-interval poll loop over the active schedules. Each tick computes
//! every schedule's next due instant from its last-delivery anchor and
//! timezone (see [`crate::clock`]) and pushes a delivery through the shared
//! path for each schedule whose due instant has passed.
//!
//! Failure handling per schedule: transient channel failures are already
//! retried inside the delivery path; once retries are exhausted the error
//! is logged and the schedule stays Active, so the next poll simply tries
//! again. There is no permanent failure state for transient causes.
//! Pause and resume only change the Active flag; paused schedules are never
//! polled.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::is_due;
use crate::config::SchedulerConfig;
use crate::deliver::{DeliverError, Delivered, Deliverer};
use crate::store::Store;

pub struct DeliveryScheduler {
    store: Arc<dyn Store>,
    deliverer: Arc<Deliverer>,
    poll_interval: std::time::Duration,
}

impl DeliveryScheduler {
    pub fn new(store: Arc<dyn Store>, deliverer: Arc<Deliverer>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            deliverer,
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Run the poll loop until the task is dropped or aborted.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "delivery scheduler started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }

    /// One poll pass: deliver to every active schedule that is due at `now`.
    /// Returns how many deliveries were confirmed.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let schedules = match self.store.list_active_schedules().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot list schedules; skipping tick");
                return 0;
            }
        };

        let mut delivered = 0usize;
        for schedule in schedules {
            let due = match is_due(&schedule, now) {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(user = schedule.user_id, error = %e, "bad schedule; skipping");
                    continue;
                }
            };
            if !due {
                continue;
            }

            match self.deliverer.deliver_next(schedule.user_id, now).await {
                Ok(Delivered::Excerpt {
                    position,
                    total,
                    completed,
                }) => {
                    delivered += 1;
                    tracing::info!(
                        user = schedule.user_id,
                        position,
                        total,
                        completed,
                        "scheduled delivery sent"
                    );
                }
                Ok(Delivered::NoFurtherContent) => {
                    tracing::debug!(user = schedule.user_id, "document finished; nothing to send");
                }
                Err(DeliverError::NothingSelected(_)) => {
                    tracing::debug!(user = schedule.user_id, "schedule has no active document");
                }
                Err(e) => {
                    // Leave the schedule Active; the next poll retries.
                    tracing::warn!(user = schedule.user_id, error = %e, "scheduled delivery failed");
                }
            }
        }
        delivered
    }
}
