//! Duplicate-document detection against the record store.
//!
//! The checker is stateless. Deciding which of several concurrent checks may
//! update a form field is the job of [`crate::validation`].
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::Document;
use crate::errors::AppError;
use crate::models::{Record, RecordId, SearchQuery, MAX_PAGE_SIZE};
use crate::store::RecordStore;

/// How many result pages a single check will walk before giving up.
const DEFAULT_MAX_PAGES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DuplicateOutcome {
    NoConflict,
    ConflictWith(Record),
    /// The lookup itself failed. The document may or may not be taken.
    CheckFailed(String),
}

impl DuplicateOutcome {
    /// Only a confirmed conflict blocks saving; a failed check does not.
    pub fn blocks_submission(&self) -> bool {
        matches!(self, DuplicateOutcome::ConflictWith(_))
    }

    /// A confirmed conflict becomes [`AppError::DuplicateConflict`]; a failed
    /// check lets the save go ahead.
    pub fn ensure_available(&self, document: &Document) -> Result<(), AppError> {
        match self {
            DuplicateOutcome::ConflictWith(owner) => Err(AppError::DuplicateConflict {
                document: document.digits().to_string(),
                owner: owner.name.clone(),
            }),
            DuplicateOutcome::CheckFailed(reason) => {
                tracing::warn!("Saving {} without a duplicate check: {}", document, reason);
                Ok(())
            }
            DuplicateOutcome::NoConflict => Ok(()),
        }
    }
}

pub struct DuplicateChecker<S> {
    store: Arc<S>,
    max_pages: u32,
}

impl<S> Clone for DuplicateChecker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_pages: self.max_pages,
        }
    }
}

impl<S: RecordStore> DuplicateChecker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Looks for another record owning `document`, ignoring `exclude_id`
    /// (the record being edited).
    ///
    /// Transient store failures come back as [`DuplicateOutcome::CheckFailed`].
    /// A 401/403 is returned as [`AppError::Unauthorized`] so the caller can
    /// send the user back to login.
    pub async fn check_duplicate(
        &self,
        document: &Document,
        exclude_id: Option<RecordId>,
    ) -> Result<DuplicateOutcome, AppError> {
        let mut query = SearchQuery::for_document(document.digits()).with_page_size(MAX_PAGE_SIZE);

        loop {
            let result = match self.store.search(&query).await {
                Ok(result) => result,
                Err(e) if matches!(e.root(), AppError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Duplicate check for {} {} failed: {}",
                        document.kind().label(),
                        document,
                        e
                    );
                    return Ok(DuplicateOutcome::CheckFailed(e.to_string()));
                }
            };

            if let Some(owner) = find_conflict(&result.items, document, exclude_id) {
                tracing::info!(
                    "{} {} already belongs to creditor {:?}",
                    document.kind().label(),
                    document,
                    owner.id
                );
                return Ok(DuplicateOutcome::ConflictWith(owner.clone()));
            }

            if query.page >= result.total_pages() || query.page >= self.max_pages {
                break;
            }
            query.page += 1;
        }

        tracing::debug!("No conflict for {}", document);
        Ok(DuplicateOutcome::NoConflict)
    }
}

/// First record that owns `document` and is not `exclude_id`. Compares raw
/// digits and kind, never the formatted string.
pub fn find_conflict<'a>(
    items: &'a [Record],
    document: &Document,
    exclude_id: Option<RecordId>,
) -> Option<&'a Record> {
    items.iter().find(|record| {
        record.owns(document) && (exclude_id.is_none() || record.id != exclude_id)
    })
}
