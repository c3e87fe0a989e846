pub mod connection;
pub mod migrations;
pub mod registry;

pub use connection::{connect, connect_with_settings, DbPool};
pub use registry::{BotRegistry, InMemoryBotRegistry, RegistryError, SqlBotRegistry};
