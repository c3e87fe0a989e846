use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use botforge_core::domain::bot::{BotName, BotRecord, BotState, ContainerRef, Framework, OwnerId};
use botforge_core::lifecycle::InvalidTransition;

pub mod memory;
pub mod sql;

pub use memory::InMemoryBotRegistry;
pub use sql::SqlBotRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("bot `{name}` already exists for owner {owner}")]
    AlreadyExists { owner: OwnerId, name: BotName },
    #[error("no active bot `{name}` for owner {owner}")]
    NotFound { owner: OwnerId, name: BotName },
    #[error(
        "stale generation for bot `{name}` of owner {owner}: expected {expected}, current {current}"
    )]
    Conflict { owner: OwnerId, name: BotName, expected: u32, current: u32 },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable registry of bot records, the single source of truth for lifecycle
/// state. All mutations are optimistic: the caller names the generation it
/// observed, and a stale generation is `Conflict`, never a silent overwrite.
#[async_trait]
pub trait BotRegistry: Send + Sync {
    /// Resolves the live (non-removed) record for the pair.
    async fn get(&self, owner: &OwnerId, name: &BotName) -> Result<BotRecord, RegistryError>;

    /// Live records for an owner, oldest first.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BotRecord>, RegistryError>;

    /// Number of live records for an owner; the quota input.
    async fn count_active(&self, owner: &OwnerId) -> Result<u32, RegistryError>;

    /// Inserts a new record in `Draft` at generation zero. The database
    /// closes the duplicate-name race even if two callers pass the
    /// pre-checks at once.
    async fn create(
        &self,
        owner: &OwnerId,
        name: &BotName,
        description: &str,
        framework: Framework,
        bot_token: &SecretString,
    ) -> Result<BotRecord, RegistryError>;

    /// The one mutation primitive: moves the record along a legal lifecycle
    /// edge, bumping the generation. Entering `Failed` records `last_error`
    /// and remembers the state being left in `failed_from`; leaving `Failed`
    /// clears both.
    async fn compare_and_transition(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        new_state: BotState,
        last_error: Option<&str>,
    ) -> Result<BotRecord, RegistryError>;

    /// Sets the container ref exactly once, while the record is
    /// `Deploying`. Bumps the generation like any other mutation.
    async fn record_container_ref(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        container_ref: &ContainerRef,
    ) -> Result<BotRecord, RegistryError>;

    /// On-demand token fetch; the token never rides along in `BotRecord`.
    async fn bot_token(&self, owner: &OwnerId, name: &BotName)
        -> Result<SecretString, RegistryError>;

    /// Cross-owner scan for the reconciler.
    async fn list_in_states(&self, states: &[BotState]) -> Result<Vec<BotRecord>, RegistryError>;
}
