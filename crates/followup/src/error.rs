//! Follow-up error kinds.
//!
//! External failures are converted into these kinds at the executor boundary.

use thiserror::Error;

use dunning_core::DomainError;
use dunning_receivables::ReceivablesError;

use crate::ports::{RenderError, StoreError};

pub type FollowupResult<T> = Result<T, FollowupError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FollowupError {
    /// Ledger or rate service could not produce the receivables.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Statement/context/document rendering failed. No state change.
    #[error("render failure: {0}")]
    RenderFailure(String),

    /// No channel delivered and a failure was transient
    /// (`ExecutionOutcome::Retry`). No state change.
    #[error("transient dispatch failure: {0}")]
    DispatchTransient(String),

    /// Every channel rejected the reminder for good
    /// (`ExecutionOutcome::Undeliverable`).
    #[error("permanent dispatch failure: {0}")]
    DispatchPermanent(String),

    /// Missing or inconsistent level configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Follow-up state, level or partner storage could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The follow-up state rejected a transition.
    #[error("state transition rejected: {0}")]
    Domain(#[from] DomainError),
}

impl FollowupError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::RenderFailure(msg.into())
    }

    /// Whether the scheduler may simply try again on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerUnavailable(_) | Self::DispatchTransient(_) | Self::StorageUnavailable(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Short stable name for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LedgerUnavailable(_) => "ledger_unavailable",
            Self::RenderFailure(_) => "render_failure",
            Self::DispatchTransient(_) => "dispatch_transient",
            Self::DispatchPermanent(_) => "dispatch_permanent",
            Self::Configuration(_) => "configuration_error",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Domain(_) => "domain",
        }
    }
}

impl From<ReceivablesError> for FollowupError {
    fn from(value: ReceivablesError) -> Self {
        Self::LedgerUnavailable(value.to_string())
    }
}

impl From<StoreError> for FollowupError {
    fn from(value: StoreError) -> Self {
        Self::StorageUnavailable(value.to_string())
    }
}

impl From<RenderError> for FollowupError {
    fn from(value: RenderError) -> Self {
        Self::RenderFailure(value.to_string())
    }
}
