//! Telegram front-end for botforge
//!
//! This crate is the chat surface and nothing more: it parses commands,
//! walks users through the create conversation, renders MarkdownV2, and
//! pumps the Bot API long-poll loop. All deployment decisions live behind
//! the [`BotCommandService`] trait, which the server implements over the
//! orchestrator.
//!
//! - **Wire types** (`api`) - `getUpdates` / `sendMessage` payloads
//! - **Commands** (`commands`) - `/create`, `/status`, the session FSM
//! - **Formatting** (`format`) - MarkdownV2 escaping and message bodies
//! - **Polling** (`poll`) - `UpdateTransport`, reconnect policy, runner

pub mod api;
pub mod commands;
pub mod format;
pub mod poll;

pub use commands::{
    parse_command, BotCommandService, ChatCommand, ChatContext, CommandRouteError, CommandRouter,
    CreateRequest, CreateSession, NoopBotCommandService, SessionOutcome,
};
pub use poll::{
    HttpUpdateTransport, LongPollRunner, NoopUpdateTransport, ReconnectPolicy, TransportError,
    UpdateTransport,
};
