//! The bot lifecycle state machine.
//!
//! ```text
//! Draft -> Generating -> Building -> Deploying -> Running <-> Stopped
//! {Draft..Stopped} -> Failed -> retry (re-enter the state it failed from)
//! Stopped | Failed -> Removed (terminal)
//! ```
//!
//! Legality is a pure function consulted by every registry implementation,
//! so the table cannot drift between storage backends.

use thiserror::Error;

use crate::domain::bot::BotState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: BotState,
    pub to: BotState,
}

/// Checks one edge. `failed_from` is the state the record held when it
/// entered `Failed`; it parameterizes the single data-dependent edge, retry.
pub fn check_transition(
    from: BotState,
    to: BotState,
    failed_from: Option<BotState>,
) -> Result<(), InvalidTransition> {
    use BotState::*;

    let legal = match (from, to) {
        (Draft, Generating)
        | (Generating, Building)
        | (Building, Deploying)
        | (Deploying, Running)
        | (Running, Stopped)
        | (Stopped, Running)
        | (Stopped, Removed)
        | (Failed, Removed) => true,
        (Draft | Generating | Building | Deploying | Running | Stopped, Failed) => true,
        (Failed, target) if Some(target) == failed_from => true,
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}
