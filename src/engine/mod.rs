//! Document lifecycle and approval routing.
//!
//! Every operation takes an explicit `&mut PgConnection` and runs its
//! multi-row writes inside a single transaction. Callers in async contexts
//! check a connection out of the pool and call straight in.

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub mod access;
pub mod archive;
pub mod audit;
pub mod conversion;
pub mod delegation;
pub mod documents;
pub mod enums;
pub mod notifications;
pub mod organizations;
pub mod resolution;
pub mod routing;
pub mod search;
pub mod versions;
pub mod workflows;

pub use enums::*;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("resource not found")]
    NotFound,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("document is locked by another user")]
    Locked,
    #[error("user is not an approver for this signoff")]
    NotApprover,
    #[error("signoff is already resolved")]
    AlreadyResolved,
    #[error("delegation would create a cycle")]
    DelegationCycle,
    #[error("concurrent version conflict")]
    ConcurrentVersionConflict,
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
    #[error("recall window has expired")]
    RecallWindowExpired,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("insufficient credits")]
    PaymentRequired,
    #[error("database error: {0}")]
    Database(diesel::result::Error),
}

impl From<diesel::result::Error> for EngineError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => EngineError::NotFound,
            other => EngineError::Database(other),
        }
    }
}

impl EngineError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }

    pub fn invalid_workflow(message: impl Into<String>) -> Self {
        EngineError::InvalidWorkflow(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound => "not_found",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::Locked => "locked",
            EngineError::NotApprover => "not_approver",
            EngineError::AlreadyResolved => "already_resolved",
            EngineError::DelegationCycle => "delegation_cycle",
            EngineError::ConcurrentVersionConflict => "concurrent_version_conflict",
            EngineError::InvalidWorkflow(_) => "invalid_workflow",
            EngineError::RecallWindowExpired => "recall_window_expired",
            EngineError::Forbidden => "forbidden",
            EngineError::Validation(_) => "validation",
            EngineError::PaymentRequired => "payment_required",
            EngineError::Database(_) => "database",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            limit: request.limit,
            offset: request.offset,
            has_more: request.offset + request.limit < total,
        }
    }
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Parses a text column back into its enum; a mismatch means the row was
/// written outside the engine.
pub(crate) fn parse_stored<T>(value: &str) -> EngineResult<T>
where
    T: std::str::FromStr<Err = EngineError>,
{
    value
        .parse()
        .map_err(|_| EngineError::invalid_state(format!("unexpected stored value `{value}`")))
}
