//! Shared application operations.
//!
//! [`App`] wires the store, processing cache, and delivery path together and
//! exposes the operations the command surfaces (CLI subcommands, HTTP API)
//! call: list the library, select a document, deliver the next excerpt now,
//! and manage schedules. Both surfaces go through the same code so their
//! semantics cannot drift apart.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::cache::{DocumentSource, ProcessingCache};
use crate::config::Config;
use crate::deliver::{Delivered, Deliverer, RetryPolicy};
use crate::error::ValidationError;
use crate::extract::{FileExtractor, SourceLocator};
use crate::models::{content_identity, Frequency, Schedule, TimeOfDay, User};
use crate::notify::build_notifier;
use crate::scan::{find_by_name, format_size, scan_library};
use crate::scheduler::DeliveryScheduler;
use crate::store::Store;
use crate::{clock, db};

/// One row of the library listing: a scanned file plus its processing state
/// if the content has been seen before.
#[derive(Debug, Serialize)]
pub struct LibraryEntry {
    pub display_name: String,
    pub file_name: String,
    pub format: &'static str,
    pub size: String,
    pub state: Option<&'static str>,
    pub excerpt_count: Option<i64>,
}

/// Result of selecting a document for a user.
#[derive(Debug, Serialize)]
pub struct Selected {
    pub identity: String,
    pub display_name: String,
    pub excerpt_count: i64,
}

pub struct App {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub cache: Arc<ProcessingCache>,
    pub deliverer: Arc<Deliverer>,
}

impl App {
    /// Build the full application from config, backed by SQLite.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let store: Arc<dyn Store> = Arc::new(crate::store::sqlite::SqliteStore::new(pool));
        Self::with_store(config, store)
    }

    /// Build the application over any store (tests use the in-memory one).
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let extractor = Arc::new(FileExtractor::new(config.processing.max_file_size_mb));
        let cache = Arc::new(ProcessingCache::new(
            store.clone(),
            extractor,
            config.segmenting.clone(),
            &config.processing,
        ));
        let notifier = build_notifier(&config.notifier)?;
        let deliverer = Arc::new(Deliverer::new(
            store.clone(),
            cache.clone(),
            notifier,
            RetryPolicy::from_config(&config.scheduler),
            config.notifier.transport_max_chars,
        ));
        Ok(Self {
            config,
            store,
            cache,
            deliverer,
        })
    }

    pub fn scheduler(&self) -> Arc<DeliveryScheduler> {
        Arc::new(DeliveryScheduler::new(
            self.store.clone(),
            self.deliverer.clone(),
            &self.config.scheduler,
        ))
    }

    /// List library files, annotated with processing state where the content
    /// is already known.
    pub async fn list_library(&self) -> Result<Vec<LibraryEntry>> {
        let files = scan_library(&self.config.library.root);
        let documents = self.store.list_documents().await?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            // States are keyed by content, so a rename still shows as
            // processed; match on name+size as a cheap heuristic for display.
            let doc = documents.iter().find(|d| {
                d.display_name == file.display_name && d.size_bytes == file.size_bytes as i64
            });
            entries.push(LibraryEntry {
                display_name: file.display_name,
                file_name: file.file_name,
                format: file.format.as_str(),
                size: format_size(file.size_bytes),
                state: doc.map(|d| d.state.as_str()),
                excerpt_count: doc
                    .filter(|d| d.excerpt_count > 0)
                    .map(|d| d.excerpt_count),
            });
        }
        Ok(entries)
    }

    /// Select a library document for a user: process it (or join/reuse an
    /// earlier run) and make it the user's active document at position zero.
    ///
    /// Selecting is always a reset, even for the currently active document.
    pub async fn select(&self, user_id: i64, name: &str) -> Result<Selected> {
        let file = find_by_name(&self.config.library.root, name)
            .ok_or_else(|| ValidationError::UnknownDocument(name.to_string()))?;

        self.ensure_user(user_id).await?;

        let bytes = std::fs::read(&file.path)?;
        let source = DocumentSource {
            identity: content_identity(&bytes),
            display_name: file.display_name.clone(),
            author: None,
            size_bytes: file.size_bytes as i64,
            format: file.format,
            locator: SourceLocator {
                path: file.path.clone(),
                format: file.format,
            },
        };
        drop(bytes);

        let processed = self.cache.request_processing(&source).await?;
        self.store
            .activate_progress(user_id, &source.identity)
            .await?;

        Ok(Selected {
            identity: source.identity,
            display_name: file.display_name,
            excerpt_count: processed.document.excerpt_count,
        })
    }

    /// Deliver the next excerpt to the user right now. Shares the scheduled
    /// path, including the last-delivery stamp that suppresses a redundant
    /// automatic delivery in the same window.
    pub async fn deliver_now(&self, user_id: i64) -> Result<Delivered> {
        Ok(self.deliverer.deliver_next(user_id, Utc::now()).await?)
    }

    /// Create or replace the user's delivery schedule. Input is validated
    /// before any state changes; setting a schedule always reactivates it.
    pub async fn set_schedule(
        &self,
        user_id: i64,
        time_of_day: &str,
        frequency: &str,
        timezone: &str,
    ) -> Result<Schedule> {
        let time_of_day: TimeOfDay = time_of_day.parse()?;
        let frequency: Frequency = frequency.parse()?;
        clock::parse_timezone(timezone)?;

        self.ensure_user(user_id).await?;

        let now = Utc::now().timestamp();
        let schedule = Schedule {
            user_id,
            time_of_day,
            frequency,
            timezone: timezone.to_string(),
            active: true,
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_schedule(&schedule).await?;
        tracing::info!(
            user = user_id,
            at = %time_of_day,
            frequency = frequency.as_str(),
            timezone,
            "schedule set"
        );
        self.store
            .get_schedule(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("schedule vanished after upsert"))
    }

    pub async fn get_schedule(&self, user_id: i64) -> Result<Option<Schedule>> {
        Ok(self.store.get_schedule(user_id).await?)
    }

    /// Pause automatic deliveries. Returns the stored schedule.
    pub async fn pause_schedule(&self, user_id: i64) -> Result<Schedule> {
        self.toggle_schedule(user_id, false).await
    }

    /// Resume automatic deliveries.
    pub async fn resume_schedule(&self, user_id: i64) -> Result<Schedule> {
        self.toggle_schedule(user_id, true).await
    }

    async fn toggle_schedule(&self, user_id: i64, active: bool) -> Result<Schedule> {
        let changed = self.store.set_schedule_active(user_id, active).await?;
        if !changed {
            return Err(ValidationError::NoSchedule(user_id).into());
        }
        tracing::info!(user = user_id, active, "schedule toggled");
        self.store
            .get_schedule(user_id)
            .await?
            .ok_or_else(|| ValidationError::NoSchedule(user_id).into())
    }

    async fn ensure_user(&self, chat_id: i64) -> Result<()> {
        self.store
            .upsert_user(&User {
                chat_id,
                display_name: None,
                created_at: Utc::now().timestamp(),
            })
            .await?;
        Ok(())
    }
}
