//! Document processing cache.
//!
//! Coordinates extraction + segmentation so each distinct content identity
//! is processed exactly once, no matter how many consumers ask for it
//! concurrently. The critical section is per identity — a keyed lock map,
//! never a global lock — so unrelated documents process fully in parallel.
//!
//! Results are persisted through the [`Store`] and mirrored in an in-memory
//! map of Ready documents, so already-processed documents stay servable
//! through a transient store outage. A failed identity stays failed until
//! its bytes (and therefore its identity) change.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{ProcessingConfig, SegmentingConfig};
use crate::error::{ProcessingError, StoreError};
use crate::extract::{SourceLocator, TextExtractor};
use crate::models::{Document, Excerpt, ProcessingState, SourceFormat};
use crate::segment::segment;
use crate::store::Store;

/// Everything needed to create and process a document the first time its
/// identity is seen.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub identity: String,
    pub display_name: String,
    pub author: Option<String>,
    pub size_bytes: i64,
    pub format: SourceFormat,
    pub locator: SourceLocator,
}

/// A Ready document together with its ordered excerpts.
#[derive(Debug)]
pub struct ProcessedDocument {
    pub document: Document,
    pub excerpts: Vec<Excerpt>,
}

pub struct ProcessingCache {
    store: Arc<dyn Store>,
    extractor: Arc<dyn TextExtractor>,
    segmenting: SegmentingConfig,
    timeout: Duration,
    timeout_secs: u64,
    /// Ready results by identity.
    ready: RwLock<HashMap<String, Arc<ProcessedDocument>>>,
    /// Per-identity locks; the map mutex is held only to look up or insert
    /// an entry, never across processing.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProcessingCache {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: Arc<dyn TextExtractor>,
        segmenting: SegmentingConfig,
        processing: &ProcessingConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            segmenting,
            timeout: Duration::from_secs(processing.timeout_secs),
            timeout_secs: processing.timeout_secs,
            ready: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the processed form of a document, extracting and segmenting at
    /// most once per identity system-wide. Concurrent callers for the same
    /// identity join the in-flight run; callers for a previously failed
    /// identity get the captured failure.
    pub async fn request_processing(
        &self,
        source: &DocumentSource,
    ) -> Result<Arc<ProcessedDocument>, ProcessingError> {
        if let Some(hit) = self.lookup_ready(&source.identity) {
            return Ok(hit);
        }
        if let Some(resolved) = self.resolve_from_store(&source.identity).await? {
            return resolved;
        }

        let key_lock = {
            let mut map = self.in_flight.lock().await;
            map.entry(source.identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = key_lock.lock().await;

            // Another caller may have finished this identity while we waited.
            if let Some(hit) = self.lookup_ready(&source.identity) {
                Ok(hit)
            } else {
                match self.resolve_from_store(&source.identity).await {
                    Err(store_err) => Err(store_err.into()),
                    Ok(Some(resolved)) => resolved,
                    Ok(None) => self.process(source).await,
                }
            }
        };

        // Drop the per-identity entry once the flight lands; the persisted
        // state answers all future callers.
        let mut map = self.in_flight.lock().await;
        map.remove(&source.identity);
        result
    }

    /// Excerpt lookup for the delivery path: in-memory Ready results first,
    /// then the store.
    pub async fn get_excerpt(
        &self,
        identity: &str,
        seq_index: i64,
    ) -> Result<Option<Excerpt>, StoreError> {
        if let Some(hit) = self.lookup_ready(identity) {
            return Ok(hit.excerpts.iter().find(|e| e.seq_index == seq_index).cloned());
        }
        self.store.get_excerpt(identity, seq_index).await
    }

    fn lookup_ready(&self, identity: &str) -> Option<Arc<ProcessedDocument>> {
        self.ready.read().unwrap().get(identity).cloned()
    }

    fn memoize(&self, processed: Arc<ProcessedDocument>) {
        self.ready
            .write()
            .unwrap()
            .insert(processed.document.identity.clone(), processed);
    }

    /// Check the persisted state for a settled outcome. `Some(Ok(..))` for
    /// Ready, `Some(Err(..))` for Failed, `None` when processing still has
    /// to run (unknown identity, or a Pending/Processing row left behind by
    /// an interrupted run).
    #[allow(clippy::type_complexity)]
    async fn resolve_from_store(
        &self,
        identity: &str,
    ) -> Result<Option<Result<Arc<ProcessedDocument>, ProcessingError>>, StoreError> {
        let doc = match self.store.get_document(identity).await? {
            Some(d) => d,
            None => return Ok(None),
        };
        match doc.state {
            ProcessingState::Ready => {
                let excerpts = self.store.get_excerpts(identity).await?;
                let processed = Arc::new(ProcessedDocument {
                    document: doc,
                    excerpts,
                });
                self.memoize(processed.clone());
                Ok(Some(Ok(processed)))
            }
            ProcessingState::Failed => {
                let reason = doc
                    .failure_reason
                    .unwrap_or_else(|| "unknown failure".to_string());
                Ok(Some(Err(ProcessingError::Failed { reason })))
            }
            ProcessingState::Pending | ProcessingState::Processing => Ok(None),
        }
    }

    /// Run one extraction + segmentation flight. Holds the caller's
    /// per-identity lock for the duration.
    async fn process(
        &self,
        source: &DocumentSource,
    ) -> Result<Arc<ProcessedDocument>, ProcessingError> {
        let now = chrono::Utc::now().timestamp();
        self.store
            .insert_document(&Document {
                identity: source.identity.clone(),
                display_name: source.display_name.clone(),
                author: source.author.clone(),
                size_bytes: source.size_bytes,
                format: source.format,
                state: ProcessingState::Pending,
                failure_reason: None,
                excerpt_count: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.store.mark_processing(&source.identity).await?;

        tracing::info!(
            identity = %source.identity,
            format = source.format.as_str(),
            "processing document"
        );

        let extractor = self.extractor.clone();
        let locator = source.locator.clone();
        let segmenting = self.segmenting.clone();
        let work = tokio::task::spawn_blocking(move || {
            let text = extractor.extract(&locator)?;
            let drafts = segment(&text, segmenting.target_chars, segmenting.hard_cap_chars)?;
            Ok::<_, ProcessingError>(drafts)
        });

        let drafts = match tokio::time::timeout(self.timeout, work).await {
            Err(_) => {
                let err = ProcessingError::Timeout(self.timeout_secs);
                self.record_failure(&source.identity, &err.to_string()).await;
                return Err(err);
            }
            Ok(Err(join_err)) => {
                let err = ProcessingError::TaskAborted(join_err.to_string());
                self.record_failure(&source.identity, &err.to_string()).await;
                return Err(err);
            }
            Ok(Ok(Err(err))) => {
                self.record_failure(&source.identity, &err.to_string()).await;
                return Err(err);
            }
            Ok(Ok(Ok(drafts))) => drafts,
        };

        let excerpts: Vec<Excerpt> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| Excerpt {
                document_identity: source.identity.clone(),
                seq_index: i as i64,
                text: d.text,
                paragraph_count: d.paragraph_count,
            })
            .collect();

        self.store.commit_ready(&source.identity, &excerpts).await?;
        let document = self
            .store
            .get_document(&source.identity)
            .await?
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "document {} vanished during processing",
                    source.identity
                ))
            })?;

        tracing::info!(
            identity = %source.identity,
            excerpts = excerpts.len(),
            "document ready"
        );

        let processed = Arc::new(ProcessedDocument {
            document,
            excerpts,
        });
        self.memoize(processed.clone());
        Ok(processed)
    }

    async fn record_failure(&self, identity: &str, reason: &str) {
        tracing::warn!(identity = %identity, reason = %reason, "document processing failed");
        if let Err(store_err) = self.store.mark_failed(identity, reason).await {
            tracing::error!(identity = %identity, error = %store_err, "could not record failure");
        }
    }
}
