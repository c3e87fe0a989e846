//! Source generation for deployed bots.
//!
//! The pipeline is deliberately deterministic: [`parser`] reduces a free-form
//! description to keyword-matched requirements, [`analyzer`] turns those into
//! a serializable blueprint, and [`generator`] renders the blueprint through
//! embedded templates. The same description always yields the same tree,
//! which keeps image builds reproducible and retries boring.

pub mod analyzer;
pub mod generator;
pub mod parser;
pub mod workspace;

pub use analyzer::{analyze, BotBlueprint, DependencyPin, HandlerSpec};
pub use generator::TemplateGenerator;
pub use parser::{parse_requirements, BotFeature, BotRequirements};
pub use workspace::{SourceWorkspace, WorkspaceError};
