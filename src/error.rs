use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the cost drill-down core and its collaborators
///
/// The enum is `Clone` so a single in-flight fetch result can be handed to every
/// caller waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CostDrillError {
    #[error("authentication with the billing provider failed: {0}")]
    Authentication(String),

    #[error("cost explorer is not enabled for this account")]
    NotEnabled,

    #[error("billing API rate limit exceeded, retry after {retry_after_secs} seconds")]
    Throttling { retry_after_secs: u64 },

    #[error("no cost data available for {date}")]
    NoDataForDate { date: NaiveDate },

    #[error("{resource_type} '{resource_id}' not found")]
    ResourceNotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("incomplete cost data for '{resource_id}': {detail}")]
    IncompleteCostData { resource_id: String, detail: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("cannot combine amounts in {left} and {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("cost amount must not be negative, got {0}")]
    NegativeAmount(String),

    #[error("invalid classification rule '{pattern}': {reason}")]
    InvalidClassificationRule { pattern: String, reason: String },

    #[error("malformed billing response: {0}")]
    MalformedResponse(String),

    #[error("shared fetch for '{0}' ended without a result")]
    FetchInterrupted(String),
}

impl CostDrillError {
    pub fn resource_not_found(resource_type: &str, resource_id: &str) -> Self {
        CostDrillError::ResourceNotFound {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    /// Errors the caller may retry after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CostDrillError::Throttling { .. } | CostDrillError::FetchInterrupted(_)
        )
    }

    /// Errors that must surface immediately and are never retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CostDrillError::Authentication(_)
                | CostDrillError::NotEnabled
                | CostDrillError::InvalidQuery(_)
                | CostDrillError::InvalidClassificationRule { .. }
        )
    }

    /// Suggested back-off for throttled calls
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            CostDrillError::Throttling { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CostDrillError>;
