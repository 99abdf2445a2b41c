//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind `std::sync::RwLock` for thread safety. Referential
//! integrity is checked explicitly since there is no database to enforce it.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Document, Excerpt, ProgressStatus, Schedule, User, UserProgress};

use super::{now_ts, AdvanceOutcome, Store};

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, User>>,
    documents: RwLock<HashMap<String, Document>>,
    excerpts: RwLock<HashMap<String, Vec<Excerpt>>>,
    progress: RwLock<HashMap<(i64, String), UserProgress>>,
    schedules: RwLock<HashMap<i64, Schedule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().unwrap();
        users
            .entry(user.chat_id)
            .and_modify(|u| {
                if user.display_name.is_some() {
                    u.display_name = user.display_name.clone();
                }
            })
            .or_insert_with(|| user.clone());
        Ok(())
    }

    async fn get_user(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().unwrap().get(&chat_id).cloned())
    }

    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        let mut docs = self.documents.write().unwrap();
        docs.entry(doc.identity.clone()).or_insert_with(|| doc.clone());
        Ok(())
    }

    async fn get_document(&self, identity: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().unwrap().get(identity).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut docs: Vec<Document> = self.documents.read().unwrap().values().cloned().collect();
        docs.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        Ok(docs)
    }

    async fn mark_processing(&self, identity: &str) -> Result<(), StoreError> {
        let mut docs = self.documents.write().unwrap();
        if let Some(doc) = docs.get_mut(identity) {
            doc.state = crate::models::ProcessingState::Processing;
            doc.updated_at = now_ts();
        }
        Ok(())
    }

    async fn commit_ready(&self, identity: &str, excerpts: &[Excerpt]) -> Result<(), StoreError> {
        let mut docs = self.documents.write().unwrap();
        let doc = docs.get_mut(identity).ok_or_else(|| {
            StoreError::Integrity(format!("cannot commit excerpts for unknown document {identity}"))
        })?;
        let mut stored = self.excerpts.write().unwrap();
        stored.insert(identity.to_string(), excerpts.to_vec());
        doc.state = crate::models::ProcessingState::Ready;
        doc.excerpt_count = excerpts.len() as i64;
        doc.failure_reason = None;
        doc.updated_at = now_ts();
        Ok(())
    }

    async fn mark_failed(&self, identity: &str, reason: &str) -> Result<(), StoreError> {
        let mut docs = self.documents.write().unwrap();
        if let Some(doc) = docs.get_mut(identity) {
            doc.state = crate::models::ProcessingState::Failed;
            doc.failure_reason = Some(reason.to_string());
            doc.updated_at = now_ts();
        }
        Ok(())
    }

    async fn get_excerpt(
        &self,
        identity: &str,
        seq_index: i64,
    ) -> Result<Option<Excerpt>, StoreError> {
        Ok(self
            .excerpts
            .read()
            .unwrap()
            .get(identity)
            .and_then(|v| v.iter().find(|e| e.seq_index == seq_index).cloned()))
    }

    async fn get_excerpts(&self, identity: &str) -> Result<Vec<Excerpt>, StoreError> {
        Ok(self
            .excerpts
            .read()
            .unwrap()
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn activate_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<UserProgress, StoreError> {
        if !self.users.read().unwrap().contains_key(&user_id) {
            return Err(StoreError::Integrity(format!(
                "progress references unknown user {user_id}"
            )));
        }
        if !self.documents.read().unwrap().contains_key(identity) {
            return Err(StoreError::Integrity(format!(
                "progress references unknown document {identity}"
            )));
        }

        let now = now_ts();
        let mut progress = self.progress.write().unwrap();
        for p in progress.values_mut() {
            if p.user_id == user_id && p.active {
                p.active = false;
                p.updated_at = now;
            }
        }
        let row = UserProgress {
            user_id,
            document_identity: identity.to_string(),
            current_index: 0,
            status: ProgressStatus::NotStarted,
            active: true,
            started_at: now,
            completed_at: None,
            updated_at: now,
        };
        progress.insert((user_id, identity.to_string()), row.clone());
        Ok(row)
    }

    async fn get_active_progress(
        &self,
        user_id: i64,
    ) -> Result<Option<UserProgress>, StoreError> {
        Ok(self
            .progress
            .read()
            .unwrap()
            .values()
            .find(|p| p.user_id == user_id && p.active)
            .cloned())
    }

    async fn advance_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<AdvanceOutcome, StoreError> {
        let now = now_ts();
        let mut progress = self.progress.write().unwrap();
        let row = match progress.get_mut(&(user_id, identity.to_string())) {
            Some(r) => r,
            None => {
                return Err(StoreError::Integrity(format!(
                    "user {user_id} has no progress in document {identity} to advance"
                )))
            }
        };

        if row.status == ProgressStatus::Completed {
            return Ok(AdvanceOutcome::NoFurtherContent);
        }

        let total = self
            .documents
            .read()
            .unwrap()
            .get(&row.document_identity)
            .map(|d| d.excerpt_count)
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "progress references unknown document {}",
                    row.document_identity
                ))
            })?;

        row.current_index += 1;
        let just_completed = row.current_index >= total;
        row.status = if just_completed {
            ProgressStatus::Completed
        } else {
            ProgressStatus::InProgress
        };
        row.completed_at = if just_completed { Some(now) } else { None };
        row.updated_at = now;

        let snapshot = row.clone();
        if just_completed {
            Ok(AdvanceOutcome::JustCompleted(snapshot))
        } else {
            Ok(AdvanceOutcome::Advanced(snapshot))
        }
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        if !self.users.read().unwrap().contains_key(&schedule.user_id) {
            return Err(StoreError::Integrity(format!(
                "schedule references unknown user {}",
                schedule.user_id
            )));
        }
        let mut schedules = self.schedules.write().unwrap();
        schedules
            .entry(schedule.user_id)
            .and_modify(|s| {
                s.time_of_day = schedule.time_of_day;
                s.frequency = schedule.frequency;
                s.timezone = schedule.timezone.clone();
                s.active = schedule.active;
                s.updated_at = schedule.updated_at;
            })
            .or_insert_with(|| schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, user_id: i64) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.read().unwrap().get(&user_id).cloned())
    }

    async fn list_active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self
            .schedules
            .read()
            .unwrap()
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn set_schedule_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError> {
        let mut schedules = self.schedules.write().unwrap();
        match schedules.get_mut(&user_id) {
            Some(s) => {
                s.active = active;
                s.updated_at = now_ts();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_delivery(&self, user_id: i64, at: i64) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write().unwrap();
        if let Some(s) = schedules.get_mut(&user_id) {
            s.last_delivery_at = Some(at);
            s.updated_at = now_ts();
        }
        Ok(())
    }
}
