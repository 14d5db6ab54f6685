//! Authenticated session for one signed-in user.
//!
//! A [`Session`] is created once the user logs in and is consumed by
//! [`Session::logout`]. Everything that talks to the store borrows it;
//! nothing is kept in module-level state.
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::controller::SearchSession;
use crate::duplicate::DuplicateChecker;
use crate::errors::{AppError, ResultExt};
use crate::models::{Record, RecordDraft, RecordId, RecordPatch};
use crate::store::{HttpRecordStore, RecordStore};
use crate::validation::FormValidation;

const LOGIN_PATH: &str = "auth/login";

/// Canonical token shape, whatever the login endpoint called its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until expiry, when the backend says.
    pub expires_in: Option<u64>,
    pub token_type: String,
}

// Looked up in order; the first non-empty string wins.
const ACCESS_TOKEN_FIELDS: [&str; 5] = [
    "access_token",
    "accessToken",
    "token",
    "jwt",
    "id_token",
];
const REFRESH_TOKEN_FIELDS: [&str; 2] = ["refresh_token", "refreshToken"];
const EXPIRES_IN_FIELDS: [&str; 2] = ["expires_in", "expiresIn"];
const TOKEN_TYPE_FIELDS: [&str; 2] = ["token_type", "tokenType"];

/// Normalises a login response into an [`AuthToken`].
///
/// Field priority:
/// 1. top-level `access_token`, `accessToken`, `token`, `jwt`, `id_token`
/// 2. the same names inside a `data` object
/// 3. the same names inside a `data.token` object
///
/// Refresh token, expiry and token type are read from the same object the
/// access token came from. Expiry may be a number or a numeric string.
pub fn normalize_token_response(body: &Value) -> Result<AuthToken, AppError> {
    let candidates = [
        Some(body),
        body.get("data"),
        body.get("data").and_then(|d| d.get("token")),
    ];

    for source in candidates.into_iter().flatten() {
        let Some(access_token) = first_string(source, &ACCESS_TOKEN_FIELDS) else {
            continue;
        };

        return Ok(AuthToken {
            access_token,
            refresh_token: first_string(source, &REFRESH_TOKEN_FIELDS),
            expires_in: EXPIRES_IN_FIELDS
                .iter()
                .filter_map(|key| source.get(*key))
                .find_map(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok())),
            token_type: first_string(source, &TOKEN_TYPE_FIELDS)
                .unwrap_or_else(|| "Bearer".to_string()),
        });
    }

    tracing::warn!("Unexpected login response format: {:?}", body);
    Err(AppError::ExternalApiError(
        "Login response missing access token".to_string(),
    ))
}

fn first_string(source: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| source.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// One signed-in user's context: tenant, token and an authenticated store.
pub struct Session {
    token: AuthToken,
    store: Arc<HttpRecordStore>,
    debounce: Duration,
    page_size: u32,
}

impl Session {
    /// Builds a session from a token obtained elsewhere.
    pub fn new(config: &Config, token: AuthToken) -> Result<Self, AppError> {
        let store = HttpRecordStore::from_config(config)?.with_token(token.access_token.clone());
        tracing::info!("Session opened for tenant {}", config.tenant_id);

        Ok(Self {
            token,
            store: Arc::new(store),
            debounce: config.debounce(),
            page_size: config.default_page_size,
        })
    }

    /// Posts credentials to the login endpoint and opens a session.
    pub async fn login(config: &Config, username: &str, password: &str) -> Result<Self, AppError> {
        let anonymous = HttpRecordStore::from_config(config)?;
        let url = anonymous.url(LOGIN_PATH);
        tracing::info!("Logging in as {}", username);

        let response = anonymous
            .request(Method::POST, &url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
        if !status.is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Login returned status {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse login response: {}", e))
        })?;

        let token = normalize_token_response(&body)?;
        Self::new(config, token)
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    pub fn store(&self) -> Arc<HttpRecordStore> {
        Arc::clone(&self.store)
    }

    pub fn duplicate_checker(&self) -> DuplicateChecker<HttpRecordStore> {
        DuplicateChecker::new(self.store())
    }

    /// Validation state for a form editing `record_id` (or a new record).
    pub fn open_form(&self, record_id: Option<RecordId>) -> FormValidation {
        FormValidation::new(self.debounce, record_id)
    }

    /// Saves a creditor form. The document is re-checked for duplicates
    /// first; a rejected save keeps its payload in the error so the form can
    /// resubmit it unchanged.
    pub async fn save(
        &self,
        draft: &RecordDraft,
        existing: Option<RecordId>,
    ) -> Result<Record, AppError> {
        draft.validate()?;

        if let Some(document) = &draft.document {
            self.duplicate_checker()
                .check_duplicate(document, existing)
                .await?
                .ensure_available(document)?;
        }

        match existing {
            Some(id) => self
                .store
                .update(id, &RecordPatch::from(draft))
                .await
                .with_context(|| format!("saving creditor {}", id)),
            None => self.store.create(draft).await.context("saving new creditor"),
        }
    }

    /// Starts the creditor list controller on a background task.
    pub fn start_search(&self) -> SearchSession {
        SearchSession::spawn(self.store(), self.debounce, self.page_size)
    }

    /// Ends the session. Search sessions and checkers created from it keep
    /// their own store handle and must be shut down by their owners.
    pub fn logout(self) {
        tracing::info!("Session closed for tenant {}", self.store.tenant_id());
    }
}
