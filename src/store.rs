//! Client for the creditor endpoints of the remote ERP API.
//!
//! Every request carries the tenant header and a fresh correlation id. The
//! bearer token is supplied by whoever builds the store; this module never
//! acquires or refreshes tokens.
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Record, RecordDraft, RecordId, RecordPatch, SearchQuery, SearchResult};

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

const CREDITORS_PATH: &str = "credores";

/// The record store as seen by the core.
pub trait RecordStore: Send + Sync {
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<SearchResult, AppError>> + Send;

    fn create(&self, draft: &RecordDraft) -> impl Future<Output = Result<Record, AppError>> + Send;

    fn update(
        &self,
        id: RecordId,
        patch: &RecordPatch,
    ) -> impl Future<Output = Result<Record, AppError>> + Send;

    fn delete(&self, id: RecordId) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// JSON/HTTP implementation of [`RecordStore`].
#[derive(Clone)]
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
    tenant_id: String,
    token: Option<String>,
}

impl HttpRecordStore {
    pub fn new(
        base_url: impl Into<String>,
        tenant_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.api_base_url.clone(),
            config.tenant_id.clone(),
            config.request_timeout(),
        )
    }

    /// Same store, authenticated with `token`. The HTTP client is shared.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Builds a request with the tenant and correlation headers attached.
    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::debug!("{} {} (correlation {})", method, url, correlation_id);

        let builder = self
            .client
            .request(method, url)
            .header(TENANT_HEADER, &self.tenant_id)
            .header(CORRELATION_HEADER, correlation_id);

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn submit(
        &self,
        method: Method,
        url: &str,
        payload: Value,
    ) -> Result<Record, AppError> {
        let response = self
            .request(method, url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Creditor save failed: {}", e)))?;

        let status = response.status();
        if is_auth_failure(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Unauthorized(format!("{} {}", status, body)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = backend_message(&body).unwrap_or_else(|| status.to_string());
            tracing::warn!("Creditor save rejected with {}: {}", status, message);
            return Err(AppError::SubmissionRejected {
                status: status.as_u16(),
                message,
                payload,
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse creditor response: {}", e))
        })?;

        serde_json::from_value(unwrap_data(body)).map_err(|e| {
            AppError::ExternalApiError(format!("Unexpected creditor response: {}", e))
        })
    }
}

impl RecordStore for HttpRecordStore {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult, AppError> {
        query.validate()?;

        let url = self.url(CREDITORS_PATH);
        tracing::info!(
            "Searching creditors page {} (size {})",
            query.page,
            query.page_size
        );

        let response = self
            .request(Method::GET, &url)
            .query(&query.to_params())
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Creditor search failed: {}", e)))?;

        let response = error_for_status(response, "Creditor search").await?;

        let page: SearchPageWire = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse creditor search response: {}", e))
        })?;

        let result = page.into_result(query);
        tracing::info!(
            "Creditor search returned {} of {} matches",
            result.items.len(),
            result.total
        );
        Ok(result)
    }

    async fn create(&self, draft: &RecordDraft) -> Result<Record, AppError> {
        draft.validate()?;

        let url = self.url(CREDITORS_PATH);
        tracing::info!("Creating creditor: {}", draft.name);

        let record = self.submit(Method::POST, &url, draft.to_payload()).await?;
        tracing::info!("✓ Creditor created: {:?}", record.id);
        Ok(record)
    }

    async fn update(&self, id: RecordId, patch: &RecordPatch) -> Result<Record, AppError> {
        patch.validate()?;

        let url = self.url(&format!("{}/{}", CREDITORS_PATH, id));
        tracing::info!("Updating creditor {}", id);

        let record = self.submit(Method::PATCH, &url, patch.to_payload()).await?;
        tracing::info!("✓ Creditor {} updated", id);
        Ok(record)
    }

    async fn delete(&self, id: RecordId) -> Result<(), AppError> {
        let url = self.url(&format!("{}/{}", CREDITORS_PATH, id));
        tracing::info!("Deleting creditor {}", id);

        let response = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Creditor delete failed: {}", e)))?;

        error_for_status(response, "Creditor delete").await?;
        Ok(())
    }
}

/// Search page as sent by the backend. Paging fields missing from the body
/// fall back to what was asked for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPageWire {
    #[serde(alias = "data", default)]
    items: Vec<Record>,
    page: Option<u32>,
    #[serde(alias = "page_size", alias = "size")]
    page_size: Option<u32>,
    #[serde(alias = "totalCount", alias = "total_count")]
    total: Option<u64>,
}

impl SearchPageWire {
    fn into_result(self, query: &SearchQuery) -> SearchResult {
        let total = self.total.unwrap_or(self.items.len() as u64);
        SearchResult {
            items: self.items,
            page: self.page.unwrap_or(query.page),
            page_size: self.page_size.unwrap_or(query.page_size),
            total,
        }
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

async fn error_for_status(response: Response, context: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if is_auth_failure(status) {
        return Err(AppError::Unauthorized(format!(
            "{} returned {}",
            context, status
        )));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(format!("{}: {}", context, error_text)));
    }

    tracing::error!("{} returned error {}: {}", context, status, error_text);
    Err(AppError::ExternalApiError(format!(
        "{} returned status {}: {}",
        context, status, error_text
    )))
}

/// Some endpoints wrap the record in `{"data": ...}`, others return it bare.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("data").map(Value::is_object).unwrap_or(false) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn backend_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
