//! The error surface the request-handling layer sees.
//!
//! Lower layers keep their own error types; everything is converted here,
//! with the owner and bot attached, so a caller can decide between retrying,
//! removing, and giving up without digging through sources.

use std::time::Duration;

use thiserror::Error;

use botforge_core::{BotName, InvalidTransition, OwnerId};
use botforge_db::registry::RegistryError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bot `{name}` already exists for owner {owner}")]
    AlreadyExists { owner: OwnerId, name: BotName },

    #[error("owner {owner} is at the bot limit ({count}/{limit})")]
    QuotaExceeded { owner: OwnerId, limit: u32, count: u32 },

    #[error("no active bot `{name}` for owner {owner}")]
    NotFound { owner: OwnerId, name: BotName },

    #[error(
        "bot `{name}` of owner {owner} changed concurrently: expected generation {expected}, found {current}"
    )]
    Conflict { owner: OwnerId, name: BotName, expected: u32, current: u32 },

    #[error("bot `{name}` of owner {owner}: {transition}")]
    InvalidTransition {
        owner: OwnerId,
        name: BotName,
        #[source]
        transition: InvalidTransition,
    },

    #[error("{operation} failed for bot `{name}` of owner {owner}: {message}")]
    RuntimeFailure { owner: OwnerId, name: BotName, operation: &'static str, message: String },

    #[error("{operation} for bot `{name}` of owner {owner} did not finish within {budget:?}")]
    Timeout { owner: OwnerId, name: BotName, operation: &'static str, budget: Duration },

    #[error("internal error during {operation} for owner {owner}: {message}")]
    Internal { owner: OwnerId, operation: &'static str, message: String },
}

impl OrchestratorError {
    /// Attaches request context to a registry error. The record-scoped
    /// variants already carry owner and name; infrastructure faults are
    /// wrapped as `Internal`.
    pub fn from_registry(
        owner: &OwnerId,
        name: &BotName,
        operation: &'static str,
        error: RegistryError,
    ) -> Self {
        match error {
            RegistryError::AlreadyExists { owner, name } => Self::AlreadyExists { owner, name },
            RegistryError::NotFound { owner, name } => Self::NotFound { owner, name },
            RegistryError::Conflict { owner, name, expected, current } => {
                Self::Conflict { owner, name, expected, current }
            }
            RegistryError::InvalidTransition(transition) => Self::InvalidTransition {
                owner: owner.clone(),
                name: name.clone(),
                transition,
            },
            RegistryError::Database(error) => {
                Self::Internal { owner: owner.clone(), operation, message: error.to_string() }
            }
            RegistryError::Decode(message) => {
                Self::Internal { owner: owner.clone(), operation, message }
            }
        }
    }

    /// True when repeating the same call can help: the caller lost a race or
    /// a time budget, not an argument check.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout { .. })
    }
}
