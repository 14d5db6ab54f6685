//! Incremental search over the creditor list.
//!
//! [`SearchController`] is a synchronous state machine: it turns UI events
//! into at most one query per debounce window and accepts only the response
//! for the latest issued generation. [`SearchSession`] runs it on a tokio
//! task with real timers and publishes snapshots over a watch channel.
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::debounce::{Debouncer, Generation};
use crate::errors::AppError;
use crate::models::{SearchFilters, SearchQuery, SearchResult, StatusFilter, MAX_PAGE_SIZE};
use crate::pagination::{PageCache, SortField, SortSpec};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    /// Timer armed, nothing sent yet.
    Debouncing,
    /// Request sent, awaiting response.
    InFlight,
    /// A newer edit arrived while a request was outstanding.
    InFlightQueuedEdit,
}

/// Which search input the user edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Term,
    Document,
    Status,
}

/// A query the caller must send, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSearch {
    pub generation: Generation,
    pub query: SearchQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Applied,
    /// Older than the latest issued request; nothing changed.
    Stale,
}

/// Read-only view handed to the table and pager.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSnapshot {
    pub state: ControllerState,
    pub page: PageCache,
    pub total_pages: u32,
    pub sort: Option<SortSpec>,
    /// Last search failure; the held page is empty while this is set.
    #[serde(skip)]
    pub error: Option<AppError>,
    pub error_message: Option<String>,
    pub retryable: bool,
}

pub struct SearchController {
    debouncer: Debouncer<SearchFilters>,
    /// Filters of the most recently issued query.
    committed: SearchFilters,
    cache: PageCache,
    in_flight: Option<Generation>,
    last_query: Option<SearchQuery>,
    error: Option<AppError>,
}

impl SearchController {
    pub fn new(delay: Duration, page_size: u32) -> Self {
        Self {
            debouncer: Debouncer::new(delay),
            committed: SearchFilters::default(),
            cache: PageCache::new(page_size),
            in_flight: None,
            last_query: None,
            error: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        match (self.in_flight.is_some(), self.debouncer.is_armed()) {
            (true, true) => ControllerState::InFlightQueuedEdit,
            (true, false) => ControllerState::InFlight,
            (false, true) => ControllerState::Debouncing,
            (false, false) => ControllerState::Idle,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn latest_generation(&self) -> Generation {
        self.debouncer.latest()
    }

    pub fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    /// A keystroke or filter change. Arms the debounce timer, except when
    /// every filter ends up empty: then the list is cleared right away and
    /// any outstanding request is made stale.
    pub fn on_edit(&mut self, field: SearchField, value: &str, now: Instant) {
        let mut filters = self
            .debouncer
            .cancel()
            .unwrap_or_else(|| self.committed.clone());

        match field {
            SearchField::Term => filters.set_term(value),
            SearchField::Document => filters.set_document(value),
            SearchField::Status => filters.status = StatusFilter::from_input(value),
        }

        if filters.is_empty() {
            tracing::debug!("Search input cleared, resetting list");
            self.debouncer.invalidate();
            self.committed = filters;
            self.in_flight = None;
            self.last_query = None;
            self.error = None;
            self.cache.clear();
            return;
        }

        self.debouncer.arm(filters, now);
    }

    /// Fires the debounce timer if due.
    pub fn poll(&mut self, now: Instant) -> Option<IssuedSearch> {
        let (generation, filters) = self.debouncer.fire(now)?;
        self.committed = filters;
        let query = SearchQuery::new(self.committed.clone(), 1, self.cache.page_size());
        Some(self.track(generation, query))
    }

    /// Page click. Bypasses the debounce; out-of-range pages are ignored.
    pub fn on_page_change(&mut self, page: u32) -> Option<IssuedSearch> {
        let page = self.cache.navigate(page)?;
        let query = SearchQuery::new(self.committed.clone(), page, self.cache.page_size());
        let generation = self.debouncer.issue();
        Some(self.track(generation, query))
    }

    /// Page-size change. Always re-fetches page 1 when a search is active.
    pub fn on_page_size_change(&mut self, page_size: u32) -> Option<IssuedSearch> {
        if let Err(e) = self.cache.set_page_size(page_size) {
            tracing::debug!("Ignoring page size {}: {}", page_size, e);
            return None;
        }
        if self.committed.is_empty() {
            return None;
        }
        let query = SearchQuery::new(self.committed.clone(), 1, page_size);
        let generation = self.debouncer.issue();
        Some(self.track(generation, query))
    }

    /// Header click; reorders the held page only.
    pub fn on_sort(&mut self, field: SortField) -> SortSpec {
        self.cache.apply_sort(field)
    }

    /// Re-sends the last query under a new generation.
    pub fn retry(&mut self) -> Option<IssuedSearch> {
        let query = self.last_query.clone()?;
        let generation = self.debouncer.issue();
        Some(self.track(generation, query))
    }

    /// Applies a store response if it belongs to the latest generation.
    pub fn apply_response(
        &mut self,
        generation: Generation,
        response: Result<SearchResult, AppError>,
    ) -> ResponseDisposition {
        if !self.debouncer.is_current(generation) {
            tracing::debug!(
                "Discarding stale search response {} (latest {})",
                generation,
                self.debouncer.latest()
            );
            return ResponseDisposition::Stale;
        }

        self.in_flight = None;
        match response {
            Ok(result) => {
                self.error = None;
                self.cache.replace(result);
            }
            Err(e) => {
                tracing::warn!("Creditor search {} failed: {}", generation, e);
                let page_size = self.cache.page_size();
                self.cache.replace(SearchResult::empty(1, page_size));
                self.error = Some(e);
            }
        }
        ResponseDisposition::Applied
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            state: self.state(),
            page: self.cache.clone(),
            total_pages: self.cache.total_pages(),
            sort: self.cache.sort(),
            error_message: self.error.as_ref().map(|e| e.to_string()),
            retryable: self.error.as_ref().map(AppError::is_retryable).unwrap_or(false),
            error: self.error.clone(),
        }
    }

    fn track(&mut self, generation: Generation, query: SearchQuery) -> IssuedSearch {
        tracing::debug!(
            "Issuing search {} for page {} (size {})",
            generation,
            query.page,
            query.page_size
        );
        self.in_flight = Some(generation);
        self.last_query = Some(query.clone());
        IssuedSearch { generation, query }
    }
}

/// UI events accepted by a [`SearchSession`].
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Edit(SearchField, String),
    PageChange(u32),
    PageSizeChange(u32),
    Sort(SortField),
    Retry,
}

/// A controller running on its own tokio task.
///
/// Store calls are spawned and complete in any order; their results come
/// back through a channel and go through the controller's generation check.
pub struct SearchSession {
    events: mpsc::UnboundedSender<SearchEvent>,
    snapshots: watch::Receiver<SearchSnapshot>,
    task: JoinHandle<()>,
}

impl SearchSession {
    pub fn spawn<S>(store: Arc<S>, delay: Duration, page_size: u32) -> Self
    where
        S: RecordStore + 'static,
    {
        let controller = SearchController::new(delay, page_size.min(MAX_PAGE_SIZE));
        let (snapshot_tx, snapshots) = watch::channel(controller.snapshot());
        let (events, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(controller, store, event_rx, snapshot_tx));

        Self {
            events,
            snapshots,
            task,
        }
    }

    pub fn send(&self, event: SearchEvent) -> Result<(), AppError> {
        self.events
            .send(event)
            .map_err(|_| AppError::InternalError("Search session has stopped".to_string()))
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.snapshots.clone()
    }

    /// Stops the session. Requests still in flight finish unobserved.
    pub async fn shutdown(self) {
        drop(self.events);
        if let Err(e) = self.task.await {
            tracing::warn!("Search session task ended abnormally: {}", e);
        }
    }
}

type SearchResponse = (Generation, Result<SearchResult, AppError>);

async fn run<S>(
    mut controller: SearchController,
    store: Arc<S>,
    mut events: mpsc::UnboundedReceiver<SearchEvent>,
    snapshots: watch::Sender<SearchSnapshot>,
) where
    S: RecordStore + 'static,
{
    let (response_tx, mut responses) = mpsc::unbounded_channel::<SearchResponse>();

    loop {
        let deadline = controller.deadline();

        let issued = tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&mut controller, event),
                None => break,
            },
            Some((generation, response)) = responses.recv() => {
                controller.apply_response(generation, response);
                None
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                controller.poll(Instant::now())
            }
        };

        if let Some(IssuedSearch { generation, query }) = issued {
            let store = Arc::clone(&store);
            let response_tx = response_tx.clone();
            tokio::spawn(async move {
                let response = store.search(&query).await;
                // The session may be gone; nobody to tell
                let _ = response_tx.send((generation, response));
            });
        }

        if snapshots.send(controller.snapshot()).is_err() {
            tracing::debug!("All snapshot receivers dropped");
        }
    }

    tracing::debug!("Search session stopped");
}

fn handle_event(controller: &mut SearchController, event: SearchEvent) -> Option<IssuedSearch> {
    match event {
        SearchEvent::Edit(field, value) => {
            controller.on_edit(field, &value, Instant::now());
            None
        }
        SearchEvent::PageChange(page) => controller.on_page_change(page),
        SearchEvent::PageSizeChange(size) => controller.on_page_size_change(size),
        SearchEvent::Sort(field) => {
            controller.on_sort(field);
            None
        }
        SearchEvent::Retry => controller.retry(),
    }
}
