//! Core data models used throughout Excerpt Courier.
//!
//! These types represent the documents, excerpts, users, reading progress,
//! and delivery schedules that flow through the processing and delivery
//! pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Processing lifecycle of a document. A document is immutable once `Ready`;
/// `Failed` is terminal for its identity until the underlying bytes change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Ready => "ready",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingState::Pending),
            "processing" => Some(ProcessingState::Processing),
            "ready" => Some(ProcessingState::Ready),
            "failed" => Some(ProcessingState::Failed),
            _ => None,
        }
    }
}

/// Supported source document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Epub,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Epub => "epub",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(SourceFormat::Pdf),
            "epub" => Some(SourceFormat::Epub),
            _ => None,
        }
    }

    /// Map a lowercase file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(SourceFormat::Pdf),
            "epub" => Some(SourceFormat::Epub),
            _ => None,
        }
    }
}

/// A source document, identified by a content fingerprint rather than a
/// name or path. Re-uploads of identical bytes under a different filename
/// map to the same document; changed bytes always produce a new one.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Lowercase hex SHA-256 of the raw file bytes.
    pub identity: String,
    pub display_name: String,
    pub author: Option<String>,
    pub size_bytes: i64,
    pub format: SourceFormat,
    pub state: ProcessingState,
    /// Captured reason when `state` is `Failed`.
    pub failure_reason: Option<String>,
    /// Number of excerpts; fixed once `Ready`, zero before.
    pub excerpt_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One bounded, sentence-aligned unit of text within a document.
///
/// For a `Ready` document, `seq_index` values are contiguous starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Excerpt {
    pub document_identity: String,
    pub seq_index: i64,
    pub text: String,
    pub paragraph_count: i64,
}

/// An end user of the delivery channel, keyed by their chat id.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub chat_id: i64,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// Reading status within a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(ProgressStatus::NotStarted),
            "in_progress" => Some(ProgressStatus::InProgress),
            "completed" => Some(ProgressStatus::Completed),
            _ => None,
        }
    }
}

/// A user's position within one document. At most one row per user is
/// `active`; switching documents deactivates the previous row but keeps it.
#[derive(Debug, Clone, Serialize)]
pub struct UserProgress {
    pub user_id: i64,
    pub document_identity: String,
    /// Index of the next excerpt to deliver.
    pub current_index: i64,
    pub status: ProgressStatus,
    pub active: bool,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// Delivery cadence for a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    TwiceDaily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::TwiceDaily => "twice_daily",
            Frequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Frequency::Daily),
            "twice_daily" | "twice-daily" => Some(Frequency::TwiceDaily),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }
}

impl FromStr for Frequency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Frequency::parse(s).ok_or_else(|| ValidationError::UnknownFrequency(s.to_string()))
    }
}

/// Local wall-clock delivery time, HH:MM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::BadTimeOfDay(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(TimeOfDay { hour, minute })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A user's recurring delivery schedule. One per user.
///
/// `last_delivery_at` is the idempotency anchor: the next due instant is
/// always derived from it (or from `created_at` before any delivery), so a
/// confirmed delivery suppresses further sends within the same window.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub user_id: i64,
    pub time_of_day: TimeOfDay,
    pub frequency: Frequency,
    /// IANA zone name, e.g. `America/New_York`. Validated on input.
    pub timezone: String,
    pub active: bool,
    /// UTC epoch seconds of the last confirmed delivery.
    pub last_delivery_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Compute the content identity (lowercase hex SHA-256) for raw file bytes.
pub fn content_identity(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
