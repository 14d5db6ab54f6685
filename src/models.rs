use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::{strip_non_digits, Document, DocumentKind};
use crate::errors::AppError;

/// Smallest page size accepted by the store.
pub const MIN_PAGE_SIZE: u32 = 1;
/// Largest page size accepted by the store.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

// ============ Records ============

/// Identifier assigned by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn is_active(self) -> bool {
        self == RecordStatus::Active
    }
}

/// A creditor ("credor") as held by the remote store.
///
/// Holds at most one document; the wire format carries `cpf` and `cnpj` as
/// separate fields and [`CredorWire`] folds them into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CredorWire", into = "CredorWire")]
pub struct Record {
    /// Absent for records not yet saved.
    pub id: Option<RecordId>,
    /// Display (legal) name. Never empty.
    pub name: String,
    /// Trade name ("nome fantasia").
    pub trade_name: Option<String>,
    pub document: Option<Document>,
    pub status: RecordStatus,
}

impl Record {
    /// Creates an unsaved, active record.
    pub fn new(name: impl Into<String>) -> Result<Self, AppError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Name is required".to_string()));
        }

        Ok(Self {
            id: None,
            name,
            trade_name: None,
            document: None,
            status: RecordStatus::Active,
        })
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_trade_name(mut self, trade_name: impl Into<String>) -> Self {
        self.trade_name = Some(trade_name.into());
        self
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this record owns `document` (same kind, same raw digits).
    pub fn owns(&self, document: &Document) -> bool {
        self.document
            .as_ref()
            .map(|d| d.same_as(document))
            .unwrap_or(false)
    }
}

/// JSON shape used by the creditor endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredorWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub nome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nome_fantasia: Option<String>,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default = "default_active")]
    pub ativo: bool,
}

fn default_active() -> bool {
    true
}

impl TryFrom<CredorWire> for Record {
    type Error = String;

    fn try_from(wire: CredorWire) -> Result<Self, Self::Error> {
        if wire.nome.trim().is_empty() {
            return Err(format!("creditor {:?} has an empty name", wire.id));
        }

        let cpf = wire.cpf.as_deref().and_then(|raw| wire_document(raw, wire.id));
        let cnpj = wire.cnpj.as_deref().and_then(|raw| wire_document(raw, wire.id));

        let document = match (cpf, cnpj) {
            (Some(_), Some(cnpj)) => {
                tracing::warn!(
                    "Creditor {:?} carries both CPF and CNPJ, keeping the CNPJ",
                    wire.id
                );
                Some(cnpj)
            }
            (cpf, cnpj) => cnpj.or(cpf),
        };

        Ok(Record {
            id: wire.id.map(RecordId),
            name: wire.nome,
            trade_name: wire.nome_fantasia.filter(|s| !s.trim().is_empty()),
            document,
            status: if wire.ativo {
                RecordStatus::Active
            } else {
                RecordStatus::Inactive
            },
        })
    }
}

// Stored documents that no longer validate are dropped rather than failing the
// whole page.
fn wire_document(raw: &str, id: Option<i64>) -> Option<Document> {
    if strip_non_digits(raw).is_empty() {
        return None;
    }
    match Document::parse(raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!("Ignoring invalid document on creditor {:?}: {}", id, e);
            None
        }
    }
}

impl From<Record> for CredorWire {
    fn from(record: Record) -> Self {
        let (cpf, cnpj) = split_document(record.document.as_ref());
        CredorWire {
            id: record.id.map(|id| id.0),
            nome: record.name,
            nome_fantasia: record.trade_name,
            cpf,
            cnpj,
            ativo: record.status.is_active(),
        }
    }
}

fn split_document(document: Option<&Document>) -> (Option<String>, Option<String>) {
    match document {
        Some(doc) if doc.kind() == DocumentKind::Individual => (Some(doc.digits().to_string()), None),
        Some(doc) => (None, Some(doc.digits().to_string())),
        None => (None, None),
    }
}

/// Body for `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub name: String,
    pub trade_name: Option<String>,
    pub document: Option<Document>,
    pub status: RecordStatus,
}

impl RecordDraft {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Name is required".to_string()));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> serde_json::Value {
        let (cpf, cnpj) = split_document(self.document.as_ref());
        serde_json::json!({
            "nome": self.name,
            "nomeFantasia": self.trade_name,
            "cpf": cpf,
            "cnpj": cnpj,
            "ativo": self.status.is_active(),
        })
    }
}

impl From<&Record> for RecordDraft {
    fn from(record: &Record) -> Self {
        Self {
            name: record.name.clone(),
            trade_name: record.trade_name.clone(),
            document: record.document.clone(),
            status: record.status,
        }
    }
}

impl From<&RecordDraft> for RecordPatch {
    fn from(draft: &RecordDraft) -> Self {
        Self {
            name: Some(draft.name.clone()),
            trade_name: draft.trade_name.clone(),
            document: draft.document.clone(),
            status: Some(draft.status),
        }
    }
}

/// Partial body for `update`. Only present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub trade_name: Option<String>,
    pub document: Option<Document>,
    pub status: Option<RecordStatus>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.trade_name.is_none()
            && self.document.is_none()
            && self.status.is_none()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.is_empty() {
            return Err(AppError::BadRequest("Nothing to update".to_string()));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(AppError::BadRequest("Name cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(name) = &self.name {
            body.insert("nome".to_string(), name.clone().into());
        }
        if let Some(trade_name) = &self.trade_name {
            body.insert("nomeFantasia".to_string(), trade_name.clone().into());
        }
        if let Some(doc) = &self.document {
            // Setting one kind clears the other
            let (cpf, cnpj) = split_document(Some(doc));
            body.insert("cpf".to_string(), cpf.into());
            body.insert("cnpj".to_string(), cnpj.into());
        }
        if let Some(status) = self.status {
            body.insert("ativo".to_string(), status.is_active().into());
        }
        serde_json::Value::Object(body)
    }
}

// ============ Search ============

/// Tri-state status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    Any,
    Active,
    Inactive,
}

impl StatusFilter {
    /// Lenient parse of UI input; anything unrecognised means "any".
    pub fn from_input(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "ativo" | "true" => StatusFilter::Active,
            "inactive" | "inativo" | "false" => StatusFilter::Inactive,
            _ => StatusFilter::Any,
        }
    }

    fn as_param(self) -> Option<&'static str> {
        match self {
            StatusFilter::Any => None,
            StatusFilter::Active => Some("true"),
            StatusFilter::Inactive => Some("false"),
        }
    }
}

/// Filters a user can edit on the creditor list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub term: Option<String>,
    /// Digits only.
    pub document: Option<String>,
    pub status: StatusFilter,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.term.is_none() && self.document.is_none() && self.status == StatusFilter::Any
    }

    pub fn set_term(&mut self, value: &str) {
        let trimmed = value.trim();
        self.term = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    pub fn set_document(&mut self, value: &str) {
        let digits = strip_non_digits(value);
        self.document = (!digits.is_empty()).then_some(digits);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub filters: SearchFilters,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            filters: SearchFilters::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchQuery {
    pub fn new(filters: SearchFilters, page: u32, page_size: u32) -> Self {
        Self {
            filters,
            page,
            page_size,
        }
    }

    pub fn for_document(digits: &str) -> Self {
        let mut filters = SearchFilters::default();
        filters.set_document(digits);
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.page < 1 {
            return Err(AppError::BadRequest("Page must be at least 1".to_string()));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(AppError::BadRequest(format!(
                "Page size must be between {} and {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Query-string parameters understood by the creditor endpoint.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        if let Some(term) = &self.filters.term {
            params.push(("search", term.clone()));
        }
        if let Some(document) = &self.filters.document {
            params.push(("documento", document.clone()));
        }
        if let Some(active) = self.filters.status.as_param() {
            params.push(("ativo", active.to_string()));
        }
        params
    }
}

/// One page of results as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub items: Vec<Record>,
    pub page: u32,
    pub page_size: u32,
    /// Server-reported total across all pages.
    pub total: u64,
}

impl SearchResult {
    pub fn empty(page: u32, page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            page,
            page_size,
            total: 0,
        }
    }

    pub fn total_pages(&self) -> u32 {
        total_pages(self.total, self.page_size)
    }
}

/// ceil(total / page_size); zero when there is nothing to show.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if total == 0 || page_size == 0 {
        return 0;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}
