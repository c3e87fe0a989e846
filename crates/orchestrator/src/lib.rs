//! Bot lifecycle orchestration.
//!
//! [`engine::Orchestrator`] coordinates the registry, the source generator,
//! and the container runtime for user-facing operations;
//! [`reconciler::Reconciler`] runs behind it and records any divergence
//! between what the registry believes and what the runtime reports. Both
//! mutate state exclusively through optimistic registry transitions, so
//! neither can silently overwrite the other.

pub mod engine;
pub mod errors;
pub mod quota;
pub mod reconciler;

pub use engine::{DeployObserver, NoopObserver, Orchestrator};
pub use errors::OrchestratorError;
pub use quota::{QuotaGuard, SlotReservation};
pub use reconciler::{ReconcileReport, Reconciler};
