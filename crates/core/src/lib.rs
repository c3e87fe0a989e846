pub mod config;
pub mod domain;
pub mod generate;
pub mod lifecycle;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::bot::{
    expected_runtime, BotName, BotNameError, BotRecord, BotState, BotStatusView, ContainerRef,
    Framework, OwnerId, RuntimeStatus,
};
pub use domain::intent::{validate_bot_token, DeploymentIntent, IntentError};
pub use generate::{GenerateError, GeneratedSource, SourceGenerator};
pub use lifecycle::{check_transition, InvalidTransition};
