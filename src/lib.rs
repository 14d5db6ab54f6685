//! Creditor master-data core.
//!
//! Client-side logic behind the ERP admin front-end's creditor screens:
//! CPF/CNPJ validation and duplicate detection, and the debounced,
//! race-safe incremental search with pagination. A small axum sidecar
//! (`credor-sidecar`) exposes the validation operations over HTTP.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `controller`: Debounced search state machine and its async driver.
//! - `debounce`: Debounce timer and generation counter.
//! - `document`: CPF/CNPJ parsing, checksum validation and formatting.
//! - `duplicate`: Duplicate-document detection against the store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers for the sidecar.
//! - `models`: Records, search queries and results.
//! - `pagination`: Paginated result cache with client-side sort.
//! - `session`: Signed-in session and login response adapter.
//! - `store`: Record store trait and its HTTP client.
//! - `validation`: Per-field inline validation state.

pub mod config;
pub mod controller;
pub mod debounce;
pub mod document;
pub mod duplicate;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod pagination;
pub mod session;
pub mod store;
pub mod validation;
