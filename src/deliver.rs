//! The shared delivery path.
//!
//! Scheduled ticks and on-demand "next" requests both flow through
//! [`Deliverer::deliver_next`]: fetch the next excerpt for the user's active
//! document, send it, and only then advance progress and stamp the
//! schedule's last-delivery timestamp. The whole sequence runs under a
//! per-user lock, so the two paths can never deliver the same excerpt twice
//! or skip one when they race.
//!
//! Sends are retried with exponential backoff on transient channel
//! failures. Progress and the timestamp move only after a confirmed send,
//! which makes a retried delivery indistinguishable from a fresh due check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::ProcessingCache;
use crate::config::SchedulerConfig;
use crate::error::{DeliveryError, StoreError};
use crate::format::{render_completion_notice, render_message, DeliveryMeta};
use crate::models::ProcessingState;
use crate::notify::Notifier;
use crate::store::{AdvanceOutcome, Store};

/// Why a delivery attempt produced nothing to send or could not finish.
#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("user {0} has no active document")]
    NothingSelected(i64),

    #[error("document is not ready for delivery (state: {0})")]
    DocumentNotReady(&'static str),

    #[error("excerpt {index} missing for document {identity}")]
    MissingExcerpt { identity: String, index: i64 },

    #[error("channel delivery failed after {attempts} attempts: {last}")]
    ChannelFailed { attempts: u32, last: DeliveryError },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a successful pass through the delivery path.
#[derive(Debug, Clone)]
pub enum Delivered {
    /// An excerpt went out; `completed` marks the final one.
    Excerpt {
        position: i64,
        total: i64,
        completed: bool,
    },
    /// The active document was already finished; nothing was sent.
    NoFurtherContent,
}

/// Retry policy for channel sends: exponential backoff, doubling from
/// `initial` up to `cap`, at most `max_attempts` tries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_secs_f64(config.initial_backoff_secs),
            max_backoff: Duration::from_secs_f64(config.max_backoff_secs),
        }
    }

    fn backoff_before(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        (self.initial_backoff * factor).min(self.max_backoff)
    }
}

pub struct Deliverer {
    store: Arc<dyn Store>,
    cache: Arc<ProcessingCache>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    transport_max_chars: usize,
    /// Per-user delivery locks; entries are created on first use and kept
    /// for the process lifetime.
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Deliverer {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<ProcessingCache>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        transport_max_chars: usize,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            retry,
            transport_max_chars,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver the next excerpt for the user's active document. Used by both
    /// the scheduler tick and on-demand requests; `now` becomes the
    /// schedule's last-delivery stamp on success.
    pub async fn deliver_next(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Delivered, DeliverError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let progress = self
            .store
            .get_active_progress(user_id)
            .await?
            .ok_or(DeliverError::NothingSelected(user_id))?;

        let document = self
            .store
            .get_document(&progress.document_identity)
            .await?
            .ok_or_else(|| StoreError::Integrity(format!(
                "active progress references unknown document {}",
                progress.document_identity
            )))?;

        if document.state != ProcessingState::Ready {
            return Err(DeliverError::DocumentNotReady(document.state.as_str()));
        }

        if progress.current_index >= document.excerpt_count {
            return Ok(Delivered::NoFurtherContent);
        }

        let excerpt = self
            .cache
            .get_excerpt(&document.identity, progress.current_index)
            .await?
            .ok_or_else(|| DeliverError::MissingExcerpt {
                identity: document.identity.clone(),
                index: progress.current_index,
            })?;

        let meta = DeliveryMeta::for_excerpt(&document, excerpt.seq_index);
        let message = render_message(&excerpt.text, &meta, self.transport_max_chars);
        self.send_with_retry(user_id, &message, &meta).await?;

        // Confirmed send: advance and stamp, in that order. If the advance
        // commits and the stamp write fails, the worst case is one early
        // re-delivery of the *next* excerpt, never a duplicate of this one.
        let outcome = self
            .store
            .advance_progress(user_id, &document.identity)
            .await?;
        self.store.record_delivery(user_id, now.timestamp()).await?;

        match outcome {
            AdvanceOutcome::Advanced(p) => Ok(Delivered::Excerpt {
                position: p.current_index,
                total: document.excerpt_count,
                completed: false,
            }),
            AdvanceOutcome::JustCompleted(p) => {
                tracing::info!(user = user_id, identity = %document.identity, "document completed");
                let notice = render_completion_notice(&meta, self.transport_max_chars);
                if let Err(e) = self.send_with_retry(user_id, &notice, &meta).await {
                    // Best-effort: the excerpt itself was confirmed.
                    tracing::warn!(user = user_id, error = %e, "completion notice failed");
                }
                Ok(Delivered::Excerpt {
                    position: p.current_index,
                    total: document.excerpt_count,
                    completed: true,
                })
            }
            AdvanceOutcome::NoFurtherContent => Ok(Delivered::NoFurtherContent),
        }
    }

    async fn send_with_retry(
        &self,
        user_id: i64,
        message: &str,
        meta: &DeliveryMeta,
    ) -> Result<(), DeliverError> {
        let mut last: Option<DeliveryError> = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.notifier.send_formatted(user_id, message, meta).await {
                Ok(()) => return Ok(()),
                Err(err @ DeliveryError::Rejected(_)) => {
                    return Err(DeliverError::ChannelFailed {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    if attempt < self.retry.max_attempts {
                        let backoff = self.retry.backoff_before(attempt);
                        tracing::warn!(
                            user = user_id,
                            attempt,
                            max = self.retry.max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "transient delivery failure; retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last = Some(err);
                }
            }
        }
        Err(DeliverError::ChannelFailed {
            attempts: self.retry.max_attempts,
            last: last.unwrap_or_else(|| DeliveryError::Transient("no attempts made".into())),
        })
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
