/// Search controller tests on a paused tokio clock
/// A fake store stands in for the ERP API so response ordering is controlled
use rust_credor_core::controller::{
    ControllerState, ResponseDisposition, SearchController, SearchEvent, SearchField,
    SearchSession,
};
use rust_credor_core::errors::AppError;
use rust_credor_core::models::{
    Record, RecordDraft, RecordId, RecordPatch, SearchQuery, SearchResult,
};
use rust_credor_core::store::RecordStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const DEBOUNCE: Duration = Duration::from_millis(600);

/// Answers every search with one record named after the term. Terms starting
/// with "slow" and page 2 take a second; everything else takes 100ms.
#[derive(Default)]
struct FakeStore {
    calls: Mutex<Vec<SearchQuery>>,
}

impl FakeStore {
    fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().unwrap().clone()
    }

    fn terms(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|q| q.filters.term)
            .collect()
    }
}

impl RecordStore for FakeStore {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult, AppError> {
        self.calls.lock().unwrap().push(query.clone());

        let term = query.filters.term.clone().unwrap_or_default();
        let latency = if term.starts_with("slow") || query.page == 2 {
            Duration::from_millis(1000)
        } else {
            Duration::from_millis(100)
        };
        sleep(latency).await;

        Ok(SearchResult {
            items: vec![Record::new(format!("{} p{}", term, query.page))?],
            page: query.page,
            page_size: query.page_size,
            total: 45,
        })
    }

    async fn create(&self, _draft: &RecordDraft) -> Result<Record, AppError> {
        Err(AppError::InternalError("read-only store".to_string()))
    }

    async fn update(&self, _id: RecordId, _patch: &RecordPatch) -> Result<Record, AppError> {
        Err(AppError::InternalError("read-only store".to_string()))
    }

    async fn delete(&self, _id: RecordId) -> Result<(), AppError> {
        Err(AppError::InternalError("read-only store".to_string()))
    }
}

fn edit(session: &SearchSession, value: &str) {
    session
        .send(SearchEvent::Edit(SearchField::Term, value.to_string()))
        .unwrap();
}

fn first_name(session: &SearchSession) -> Option<String> {
    session
        .snapshot()
        .page
        .items()
        .first()
        .map(|r| r.name.clone())
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_issue_one_request() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);

    edit(&session, "a");
    sleep(Duration::from_millis(100)).await;
    edit(&session, "ab");
    sleep(Duration::from_millis(100)).await;
    edit(&session, "abc");

    sleep(Duration::from_millis(2000)).await;

    assert_eq!(store.terms(), vec!["abc".to_string()]);
    assert_eq!(first_name(&session).as_deref(), Some("abc p1"));
    assert_eq!(session.snapshot().state, ControllerState::Idle);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_stale_response_is_discarded() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);

    // Generation 1 fires at 600ms and answers at 1600ms
    edit(&session, "slow");
    sleep(Duration::from_millis(700)).await;
    assert_eq!(session.snapshot().state, ControllerState::InFlight);

    // Generation 2 fires at 1300ms and answers at 1400ms
    edit(&session, "fast");
    sleep(Duration::from_millis(2000)).await;

    assert_eq!(store.terms(), vec!["slow".to_string(), "fast".to_string()]);
    assert_eq!(first_name(&session).as_deref(), Some("fast p1"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_page_clicks_race_last_click_wins() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);

    edit(&session, "acme");
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(session.snapshot().total_pages, 3);

    session.send(SearchEvent::PageChange(2)).unwrap();
    session.send(SearchEvent::PageChange(3)).unwrap();
    sleep(Duration::from_millis(2000)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.page.page(), 3);
    assert_eq!(first_name(&session).as_deref(), Some("acme p3"));

    let pages: Vec<u32> = store.calls().iter().map(|q| q.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_page_is_ignored() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);

    edit(&session, "acme");
    sleep(Duration::from_millis(1000)).await;

    session.send(SearchEvent::PageChange(4)).unwrap();
    session.send(SearchEvent::PageChange(0)).unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(store.calls().len(), 1);
    assert_eq!(session.snapshot().page.page(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clearing_input_drops_in_flight_response() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);

    edit(&session, "slow query");
    sleep(Duration::from_millis(700)).await;
    edit(&session, "   ");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(session.snapshot().state, ControllerState::Idle);

    sleep(Duration::from_millis(2000)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ControllerState::Idle);
    assert!(snapshot.page.items().is_empty());
    assert_eq!(snapshot.total_pages, 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_subscription_sees_results() {
    let store = Arc::new(FakeStore::default());
    let session = SearchSession::spawn(Arc::clone(&store), DEBOUNCE, 20);
    let mut updates = session.subscribe();

    edit(&session, "acme");

    let snapshot = loop {
        updates.changed().await.unwrap();
        let snapshot = updates.borrow_and_update().clone();
        if !snapshot.page.items().is_empty() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.page.total(), 45);

    session.shutdown().await;
}

// Synchronous controller, driven with synthetic instants

fn page_of(name: &str, page: u32) -> SearchResult {
    SearchResult {
        items: vec![Record::new(name).unwrap()],
        page,
        page_size: 20,
        total: 45,
    }
}

#[test]
fn test_debounce_collapses_edits() {
    let t0 = Instant::now();
    let mut controller = SearchController::new(DEBOUNCE, 20);

    controller.on_edit(SearchField::Term, "a", t0);
    assert!(controller.poll(t0 + Duration::from_millis(100)).is_none());
    controller.on_edit(SearchField::Term, "ab", t0 + Duration::from_millis(100));
    assert!(controller.poll(t0 + Duration::from_millis(650)).is_none());
    controller.on_edit(SearchField::Term, "abc", t0 + Duration::from_millis(200));

    let issued = controller.poll(t0 + Duration::from_millis(800)).unwrap();
    assert_eq!(issued.query.filters.term.as_deref(), Some("abc"));
    assert!(controller.poll(t0 + Duration::from_millis(5000)).is_none());
}

#[test]
fn test_late_generation_is_a_no_op() {
    let t0 = Instant::now();
    let mut controller = SearchController::new(DEBOUNCE, 20);

    controller.on_edit(SearchField::Term, "first", t0);
    let first = controller.poll(t0 + DEBOUNCE).unwrap();
    controller.on_edit(SearchField::Term, "second", t0 + DEBOUNCE);
    let second = controller.poll(t0 + DEBOUNCE * 2).unwrap();
    assert!(second.generation > first.generation);

    assert_eq!(
        controller.apply_response(second.generation, Ok(page_of("second", 1))),
        ResponseDisposition::Applied
    );
    let before = controller.snapshot();

    assert_eq!(
        controller.apply_response(first.generation, Ok(page_of("first", 1))),
        ResponseDisposition::Stale
    );
    let after = controller.snapshot();
    assert_eq!(after.page, before.page);
    assert_eq!(after.state, before.state);
}

#[test]
fn test_pagination_bounds() {
    let t0 = Instant::now();
    let mut controller = SearchController::new(DEBOUNCE, 20);

    controller.on_edit(SearchField::Term, "acme", t0);
    let issued = controller.poll(t0 + DEBOUNCE).unwrap();
    controller.apply_response(issued.generation, Ok(page_of("acme", 1)));

    assert_eq!(controller.cache().total_pages(), 3);
    assert!(controller.on_page_change(4).is_none());
    assert!(controller.on_page_change(0).is_none());

    let page3 = controller.on_page_change(3).unwrap();
    assert_eq!(page3.query.page, 3);
    assert_eq!(page3.query.filters.term.as_deref(), Some("acme"));
}

#[test]
fn test_stale_error_does_not_clobber_page() {
    let t0 = Instant::now();
    let mut controller = SearchController::new(DEBOUNCE, 20);

    controller.on_edit(SearchField::Term, "acme", t0);
    let issued = controller.poll(t0 + DEBOUNCE).unwrap();
    controller.apply_response(issued.generation, Ok(page_of("acme", 1)));

    let page2 = controller.on_page_change(2).unwrap();
    let page3 = controller.on_page_change(3).unwrap();
    controller.apply_response(page3.generation, Ok(page_of("acme", 3)));

    assert_eq!(
        controller.apply_response(
            page2.generation,
            Err(AppError::ExternalApiError("timeout".to_string()))
        ),
        ResponseDisposition::Stale
    );
    assert!(controller.error().is_none());
    assert_eq!(controller.cache().page(), 3);
}
