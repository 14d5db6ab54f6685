//! Inline validation state for document fields on a creditor form.
//!
//! Each field gets its own debouncer, so a duplicate-check response can only
//! update the field it was issued for, and only while it is the latest check
//! for that field. Checksum problems are reported immediately; the duplicate
//! lookup runs after the debounce delay.
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::debounce::{Debouncer, Generation};
use crate::document::{strip_non_digits, Document};
use crate::duplicate::{DuplicateChecker, DuplicateOutcome};
use crate::errors::AppError;
use crate::models::RecordId;
use crate::store::RecordStore;

/// Snapshot rendered inline next to a document field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingValidation {
    pub checksum_passed: bool,
    /// Human-readable reason the field is invalid.
    pub failure: Option<String>,
    pub duplicate_check_in_flight: bool,
    /// Outcome of the latest completed duplicate check.
    pub duplicate: Option<DuplicateOutcome>,
    /// Non-blocking hint, e.g. that the duplicate check could not run.
    pub notice: Option<String>,
}

impl PendingValidation {
    /// Whether the form must refuse to save with this value.
    pub fn blocks_submission(&self) -> bool {
        !self.checksum_passed
            || self
                .duplicate
                .as_ref()
                .map(DuplicateOutcome::blocks_submission)
                .unwrap_or(false)
    }
}

/// A duplicate lookup the caller must run (see [`DuplicateCheckRequest::run`]).
#[derive(Debug, Clone)]
pub struct DuplicateCheckRequest {
    pub field: String,
    pub generation: Generation,
    pub document: Document,
    pub exclude_id: Option<RecordId>,
}

impl DuplicateCheckRequest {
    pub async fn run<S: RecordStore>(self, checker: &DuplicateChecker<S>) -> DuplicateCheckResponse {
        let outcome = checker
            .check_duplicate(&self.document, self.exclude_id)
            .await;
        DuplicateCheckResponse {
            field: self.field,
            generation: self.generation,
            outcome,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateCheckResponse {
    pub field: String,
    pub generation: Generation,
    /// `Err` only for authorization failures; transient ones arrive as
    /// [`DuplicateOutcome::CheckFailed`].
    pub outcome: Result<DuplicateOutcome, AppError>,
}

struct FieldState {
    debouncer: Debouncer<Document>,
    snapshot: PendingValidation,
}

/// Validation state for every document field of one open form.
///
/// Dropping it (form closed) discards all pending state; responses that
/// arrive afterwards have nowhere to land.
pub struct FormValidation {
    delay: Duration,
    /// The record being edited, if it was already saved.
    exclude_id: Option<RecordId>,
    fields: HashMap<String, FieldState>,
}

impl FormValidation {
    pub fn new(delay: Duration, exclude_id: Option<RecordId>) -> Self {
        Self {
            delay,
            exclude_id,
            fields: HashMap::new(),
        }
    }

    /// Handles a keystroke in a document field.
    pub fn on_edit(&mut self, field: &str, value: &str, now: Instant) {
        if strip_non_digits(value).is_empty() {
            self.clear(field);
            return;
        }

        let delay = self.delay;
        let state = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| FieldState {
                debouncer: Debouncer::new(delay),
                snapshot: PendingValidation::default(),
            });

        // Whatever check was outstanding now describes an older value
        state.debouncer.invalidate();

        match Document::parse(value) {
            Ok(document) => {
                state.snapshot = PendingValidation {
                    checksum_passed: true,
                    ..PendingValidation::default()
                };
                state.debouncer.arm(document, now);
            }
            Err(e) => {
                tracing::debug!("Field '{}' failed local validation: {}", field, e);
                state.debouncer.cancel();
                state.snapshot = PendingValidation {
                    checksum_passed: false,
                    failure: Some(e.guidance()),
                    ..PendingValidation::default()
                };
            }
        }
    }

    /// Fires every field whose debounce delay has elapsed.
    pub fn poll(&mut self, now: Instant) -> Vec<DuplicateCheckRequest> {
        let exclude_id = self.exclude_id;
        self.fields
            .iter_mut()
            .filter_map(|(field, state)| {
                let (generation, document) = state.debouncer.fire(now)?;
                state.snapshot.duplicate_check_in_flight = true;
                tracing::debug!("Duplicate check {} issued for '{}'", generation, field);
                Some(DuplicateCheckRequest {
                    field: field.clone(),
                    generation,
                    document,
                    exclude_id,
                })
            })
            .collect()
    }

    /// Earliest pending deadline across all fields.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.fields
            .values()
            .filter_map(|state| state.debouncer.deadline())
            .min()
    }

    /// Applies a finished check. Returns `Ok(false)` when the response was
    /// stale (older generation, or the field has since been cleared). An
    /// authorization failure on the current check is handed back as `Err`.
    pub fn apply(&mut self, response: DuplicateCheckResponse) -> Result<bool, AppError> {
        let Some(state) = self.fields.get_mut(&response.field) else {
            tracing::debug!("Dropping duplicate check for cleared field '{}'", response.field);
            return Ok(false);
        };

        if !state.debouncer.is_current(response.generation) {
            tracing::debug!(
                "Dropping stale duplicate check {} for '{}'",
                response.generation,
                response.field
            );
            return Ok(false);
        }

        let snapshot = &mut state.snapshot;
        snapshot.duplicate_check_in_flight = false;
        snapshot.failure = None;
        snapshot.notice = None;

        let outcome = match response.outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                snapshot.duplicate = None;
                snapshot.notice = Some("Session expired, sign in again".to_string());
                return Err(e);
            }
        };

        match &outcome {
            DuplicateOutcome::NoConflict => {}
            DuplicateOutcome::ConflictWith(owner) => {
                snapshot.failure = Some(format!(
                    "Document already registered for {}",
                    owner.name
                ));
            }
            DuplicateOutcome::CheckFailed(_) => {
                snapshot.notice =
                    Some("Could not check for duplicates, try again before saving".to_string());
            }
        }
        snapshot.duplicate = Some(outcome);
        Ok(true)
    }

    pub fn snapshot(&self, field: &str) -> Option<PendingValidation> {
        self.fields.get(field).map(|state| state.snapshot.clone())
    }

    /// Discards a field's state; in-flight checks for it become stale.
    pub fn clear(&mut self, field: &str) {
        if self.fields.remove(field).is_some() {
            tracing::debug!("Validation state for '{}' discarded", field);
        }
    }

    /// True when no field blocks saving and no check is still pending.
    pub fn is_ready_to_submit(&self) -> bool {
        self.fields.values().all(|state| {
            !state.snapshot.blocks_submission()
                && !state.snapshot.duplicate_check_in_flight
                && !state.debouncer.is_armed()
        })
    }
}
