use crate::config::Config;
use crate::document::{format_partial, Document, DocumentKind};
use crate::duplicate::{DuplicateChecker, DuplicateOutcome};
use crate::errors::AppError;
use crate::models::{RecordId, SearchFilters, SearchQuery, StatusFilter};
use crate::pagination::{PageCache, SortField, SortOrder};
use crate::store::{HttpRecordStore, RecordStore};
use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Unauthenticated store; each request attaches the caller's token.
    pub store: HttpRecordStore,
    /// Recently confirmed conflicts, per caller.
    /// Key: "{token_sha256}:{digits}:{exclude_id}", Value: the conflicting outcome.
    /// Only `ConflictWith` is cached; a free document is always re-checked.
    pub duplicate_cache: Cache<String, DuplicateOutcome>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let store = HttpRecordStore::from_config(&config)?;
        let duplicate_cache = Cache::builder()
            .time_to_live(config.duplicate_cache_ttl())
            .max_capacity(10_000)
            .build();

        Ok(Self {
            config,
            store,
            duplicate_cache,
        })
    }

    /// The store, authenticated as the caller.
    fn store_for(&self, headers: &HeaderMap) -> Result<HttpRecordStore, AppError> {
        Ok(self.store.with_token(bearer_token(headers)?))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))
}

// Entries are scoped to the token that produced them, so a cached record is
// only ever served back to a caller the backend already authorized.
fn duplicate_cache_key(token: &str, document: &Document, exclude_id: Option<RecordId>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!(
        "{}:{}:{}",
        hex::encode(hasher.finalize()),
        document.digits(),
        exclude_id.map(|id| id.to_string()).unwrap_or_default()
    )
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-credor-core",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
    pub value: String,
}

/// GET /api/v1/documents/validate
///
/// Validates a CPF/CNPJ locally. Returns 422 with a machine-readable code
/// (`invalid_length`, `repeated_digits`, `invalid_checksum`) when invalid.
pub async fn validate_document(
    Query(params): Query<ValidateParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let document = Document::parse(&params.value)?;
    tracing::debug!("Validated {} {}", document.kind().label(), document);

    Ok(Json(json!({
        "valid": true,
        "kind": document.kind(),
        "label": document.kind().label(),
        "digits": document.digits(),
        "formatted": document.formatted(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct MaskParams {
    #[serde(default)]
    pub value: String,
    pub kind: Option<String>,
}

/// GET /api/v1/documents/mask
///
/// Live input mask. Never fails on the value; an unknown `kind` is a 400.
pub async fn mask_document(
    Query(params): Query<MaskParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hint = params
        .kind
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .map(str::parse::<DocumentKind>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    Ok(Json(json!({ "masked": format_partial(&params.value, hint) })))
}

#[derive(Debug, Deserialize)]
pub struct DuplicateParams {
    pub document: String,
    pub exclude_id: Option<i64>,
}

/// GET /api/v1/credores/duplicate-check
///
/// Local validation first; only a valid document reaches the store. A
/// transient lookup failure is reported as `check_failed` with 200, since it
/// must not block the form. A rejected token is a 401.
pub async fn check_duplicate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DuplicateParams>,
) -> Result<Json<DuplicateOutcome>, AppError> {
    let document = Document::parse(&params.document)?;
    let exclude_id = params.exclude_id.map(RecordId);
    let token = bearer_token(&headers)?;
    let store = state.store.with_token(token);

    let cache_key = duplicate_cache_key(token, &document, exclude_id);
    if let Some(cached) = state.duplicate_cache.get(&cache_key).await {
        tracing::debug!("Duplicate check cache hit for {}", document);
        return Ok(Json(cached));
    }

    let checker = DuplicateChecker::new(Arc::new(store));
    let outcome = checker.check_duplicate(&document, exclude_id).await?;

    if outcome.blocks_submission() {
        state
            .duplicate_cache
            .insert(cache_key, outcome.clone())
            .await;
    }

    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
    pub document: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
}

/// GET /api/v1/credores
///
/// Proxies one page of the creditor search, optionally sorted in memory.
pub async fn search_creditors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut filters = SearchFilters::default();
    if let Some(term) = &params.search {
        filters.set_term(term);
    }
    if let Some(document) = &params.document {
        filters.set_document(document);
    }
    if let Some(status) = &params.status {
        filters.status = StatusFilter::from_input(status);
    }

    let query = SearchQuery::new(
        filters,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(state.config.default_page_size),
    );
    query.validate()?;

    let sort = params
        .sort
        .as_deref()
        .map(str::parse::<SortField>)
        .transpose()?;

    let store = state.store_for(&headers)?;
    let result = store.search(&query).await?;

    let mut page = PageCache::new(query.page_size);
    page.replace(result);
    if let Some(field) = sort {
        page.apply_sort_order(field, params.order.unwrap_or(SortOrder::Ascending));
    }

    Ok(Json(json!({
        "items": page.items(),
        "page": page.page(),
        "page_size": page.page_size(),
        "total": page.total(),
        "total_pages": page.total_pages(),
        "sort": page.sort(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        Config {
            port: 0,
            api_base_url: "http://localhost:9".to_string(),
            tenant_id: "tenant".to_string(),
            request_timeout_secs: 1,
            debounce_ms: 600,
            default_page_size: 20,
            duplicate_cache_ttl_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (status, Json(body)) = health().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_validate_document_ok() {
        let Json(body) = validate_document(Query(ValidateParams {
            value: "11222333000181".to_string(),
        }))
        .await
        .unwrap();

        assert_eq!(body["kind"], "organization");
        assert_eq!(body["formatted"], "11.222.333/0001-81");
    }

    #[tokio::test]
    async fn test_validate_document_rejects_repeated_digits() {
        let err = validate_document(Query(ValidateParams {
            value: "111.111.111-11".to_string(),
        }))
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::InvalidDocument(crate::document::DocumentError::RepeatedDigits)
        ));
    }

    #[tokio::test]
    async fn test_mask_document() {
        let Json(body) = mask_document(Query(MaskParams {
            value: "5299822".to_string(),
            kind: None,
        }))
        .await
        .unwrap();
        assert_eq!(body["masked"], "529.982.2");

        let err = mask_document(Query(MaskParams {
            value: "1".to_string(),
            kind: Some("rg".to_string()),
        }))
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_store_for_requires_bearer() {
        let state = AppState::new(test_config()).unwrap();

        let mut headers = HeaderMap::new();
        assert!(matches!(
            state.store_for(&headers),
            Err(AppError::Unauthorized(_))
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(state.store_for(&headers).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_check_validates_before_network() {
        let state = Arc::new(AppState::new(test_config()).unwrap());
        let err = check_duplicate(
            State(state),
            HeaderMap::new(),
            Query(DuplicateParams {
                document: "123".to_string(),
                exclude_id: None,
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidDocument(_)));
    }

    fn state_for(server: &MockServer) -> Arc<AppState> {
        Arc::new(
            AppState::new(Config {
                api_base_url: server.uri(),
                ..test_config()
            })
            .unwrap(),
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn cnpj_params() -> Query<DuplicateParams> {
        Query(DuplicateParams {
            document: "11.222.333/0001-81".to_string(),
            exclude_id: None,
        })
    }

    #[tokio::test]
    async fn test_cached_conflict_is_not_served_to_other_tokens() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/credores"))
            .and(header("Authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": 1, "nome": "Secret Owner", "cnpj": "11222333000181" }],
                "page": 1, "pageSize": 100, "total": 1
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/credores"))
            .and(header("Authorization", "Bearer bogus"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let state = state_for(&mock_server);

        for _ in 0..2 {
            let Json(outcome) = check_duplicate(State(state.clone()), bearer("good"), cnpj_params())
                .await
                .unwrap();
            assert!(outcome.blocks_submission());
        }

        let err = check_duplicate(State(state), bearer("bogus"), cnpj_params())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_check_is_a_401() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let err = check_duplicate(State(state_for(&mock_server)), bearer("t"), cnpj_params())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_failed_and_free_checks_are_not_cached() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [], "page": 1, "pageSize": 100, "total": 0
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let state = state_for(&mock_server);
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let Json(outcome) = check_duplicate(State(state.clone()), bearer("t"), cnpj_params())
                .await
                .unwrap();
            outcomes.push(outcome);
        }

        assert!(matches!(outcomes[0], DuplicateOutcome::CheckFailed(_)));
        assert!(matches!(outcomes[1], DuplicateOutcome::CheckFailed(_)));
        assert_eq!(outcomes[2], DuplicateOutcome::NoConflict);
        assert_eq!(outcomes[3], DuplicateOutcome::NoConflict);
    }

    #[tokio::test]
    async fn test_search_creditors_sorts_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/credores"))
            .and(query_param("search", "fruit"))
            .and(query_param("pageSize", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": 1, "nome": "banana" },
                    { "id": 2, "nome": "Apple" },
                    { "id": 3, "nome": "cherry" }
                ],
                "page": 1, "pageSize": 20, "total": 45
            })))
            .mount(&mock_server)
            .await;

        let Json(body) = search_creditors(
            State(state_for(&mock_server)),
            bearer("t"),
            Query(SearchParams {
                search: Some("fruit".to_string()),
                sort: Some("name".to_string()),
                order: Some(SortOrder::Descending),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let names: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["nome"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cherry", "banana", "Apple"]);
        assert_eq!(body["total_pages"], 3);
    }

    #[tokio::test]
    async fn test_search_creditors_rejects_page_size() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = search_creditors(
            State(state_for(&mock_server)),
            bearer("t"),
            Query(SearchParams {
                page_size: Some(500),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
