//! Storage abstraction for Excerpt Courier.
//!
//! The [`Store`] trait is a single transactional interface over all
//! persisted entities (documents, excerpts, users, progress, schedules),
//! enabling pluggable backends (SQLite, in-memory for tests).
//!
//! Multi-entity mutations ([`Store::commit_ready`],
//! [`Store::activate_progress`], [`Store::advance_progress`]) are atomic:
//! they either commit every row or none. Implementations must be
//! `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Document, Excerpt, Schedule, User, UserProgress};

/// Result of advancing a user's reading position.
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    /// Moved forward one excerpt; more remain.
    Advanced(UserProgress),
    /// Moved forward one excerpt and that was the last one.
    JustCompleted(UserProgress),
    /// The active document was already completed; nothing changed.
    NoFurtherContent,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_user`](Store::upsert_user) | Register or refresh a channel user |
/// | [`insert_document`](Store::insert_document) | Record a newly seen identity (Pending) |
/// | [`commit_ready`](Store::commit_ready) | Atomically store excerpts and flip the document Ready |
/// | [`mark_failed`](Store::mark_failed) | Record a terminal processing failure |
/// | [`activate_progress`](Store::activate_progress) | Make a document the user's active one, position reset to 0 |
/// | [`advance_progress`](Store::advance_progress) | Move the active position forward by one |
/// | [`upsert_schedule`](Store::upsert_schedule) | Create or replace a user's delivery schedule |
/// | [`record_delivery`](Store::record_delivery) | Stamp the idempotency anchor after a confirmed send |
#[async_trait]
pub trait Store: Send + Sync {
    // ── users ────────────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&self, chat_id: i64) -> Result<Option<User>, StoreError>;

    // ── documents & excerpts ─────────────────────────────────────────────

    /// Insert a document row if the identity is new; a no-op otherwise.
    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, identity: &str) -> Result<Option<Document>, StoreError>;

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    /// Mark the document as being processed.
    async fn mark_processing(&self, identity: &str) -> Result<(), StoreError>;

    /// Atomically replace the document's excerpts, set `excerpt_count`, and
    /// flip its state to Ready.
    async fn commit_ready(&self, identity: &str, excerpts: &[Excerpt]) -> Result<(), StoreError>;

    /// Mark the document Failed with a captured reason.
    async fn mark_failed(&self, identity: &str, reason: &str) -> Result<(), StoreError>;

    async fn get_excerpt(
        &self,
        identity: &str,
        seq_index: i64,
    ) -> Result<Option<Excerpt>, StoreError>;

    /// All excerpts for a document, ordered by `seq_index`.
    async fn get_excerpts(&self, identity: &str) -> Result<Vec<Excerpt>, StoreError>;

    // ── progress ─────────────────────────────────────────────────────────

    /// Deactivate the user's current progress row (if any) and upsert an
    /// active row for `identity` with position reset to 0. Resetting applies
    /// even when `identity` is already the active document.
    async fn activate_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<UserProgress, StoreError>;

    async fn get_active_progress(&self, user_id: i64)
        -> Result<Option<UserProgress>, StoreError>;

    /// Advance the user's position in `identity` by one. Monotonic: the
    /// index never decreases or skips. Advancing a completed document
    /// returns [`AdvanceOutcome::NoFurtherContent`] without mutating
    /// anything.
    ///
    /// Targets the (user, document) row explicitly rather than "the active
    /// row": a delivery confirmed concurrently with a document switch
    /// advances the document that was actually delivered, not the fresh one.
    async fn advance_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<AdvanceOutcome, StoreError>;

    // ── schedules ────────────────────────────────────────────────────────

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError>;

    async fn get_schedule(&self, user_id: i64) -> Result<Option<Schedule>, StoreError>;

    async fn list_active_schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    /// Toggle the pause state. Returns false when the user has no schedule.
    async fn set_schedule_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError>;

    /// Stamp `last_delivery_at` after a confirmed send. A no-op when the
    /// user has no schedule (pure on-demand users).
    async fn record_delivery(&self, user_id: i64, at: i64) -> Result<(), StoreError>;
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
