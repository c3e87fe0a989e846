use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use botforge_core::domain::intent::MIN_DESCRIPTION_CHARS;
use botforge_core::{validate_bot_token, BotName, Framework};

use crate::format;

/// A recognized slash command. Commands acting on one bot carry the name as
/// the user typed it; whether that bot exists is the service's call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Create,
    List,
    Status { name: Option<String> },
    /// Bare `/start` is Telegram's mandatory greeting; with an argument it
    /// starts a stopped bot.
    Start { name: Option<String> },
    Stop { name: Option<String> },
    Remove { name: Option<String> },
    Retry { name: Option<String> },
    Logs { name: Option<String> },
    Help,
    Cancel,
    Unknown { command: String },
}

/// `None` means the text is not a command at all (plain chat), which only
/// matters inside a create conversation. The `@botname` suffix Telegram
/// appends in group chats is stripped before matching.
pub fn parse_command(text: &str) -> Option<ChatCommand> {
    let rest = text.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let raw_verb = parts.next()?;
    let verb = raw_verb.split('@').next().unwrap_or(raw_verb).to_ascii_lowercase();
    let name = parts.next().map(str::to_owned);

    Some(match verb.as_str() {
        "create" => ChatCommand::Create,
        "list" => ChatCommand::List,
        "status" => ChatCommand::Status { name },
        "start" => ChatCommand::Start { name },
        "stop" => ChatCommand::Stop { name },
        "remove" => ChatCommand::Remove { name },
        "retry" => ChatCommand::Retry { name },
        "logs" => ChatCommand::Logs { name },
        "help" => ChatCommand::Help,
        "cancel" => ChatCommand::Cancel,
        _ => ChatCommand::Unknown { command: format!("/{verb}") },
    })
}

/// One create conversation, keyed per chat by the router. A pure state
/// machine: feed it the user's answer, get back the next prompt or the
/// finished request. Invalid answers re-prompt without losing progress.
#[derive(Clone, Debug)]
pub enum CreateSession {
    AwaitingDescription,
    AwaitingName { description: String, framework: Framework },
    AwaitingToken { description: String, framework: Framework, name: BotName },
}

/// Everything the deployment side needs to create one bot, collected and
/// validated by the conversation.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub description: String,
    pub name: BotName,
    pub framework: Framework,
    pub bot_token: SecretString,
}

pub enum SessionOutcome {
    /// Send `reply` and keep the conversation going in `session`.
    Continue { session: CreateSession, reply: String },
    /// Every answer validated; hand the request to the orchestrator.
    Done(CreateRequest),
}

impl CreateSession {
    pub fn start() -> (Self, String) {
        (Self::AwaitingDescription, format::describe_prompt())
    }

    pub fn advance(self, input: &str) -> SessionOutcome {
        match self {
            Self::AwaitingDescription => {
                let description = input.trim().to_owned();
                if description.chars().count() < MIN_DESCRIPTION_CHARS {
                    return SessionOutcome::Continue {
                        session: Self::AwaitingDescription,
                        reply: format::description_too_short(),
                    };
                }
                let framework = detect_framework(&description);
                SessionOutcome::Continue {
                    session: Self::AwaitingName { description, framework },
                    reply: format::name_prompt(),
                }
            }
            Self::AwaitingName { description, framework } => match BotName::parse(input) {
                Ok(name) => SessionOutcome::Continue {
                    session: Self::AwaitingToken { description, framework, name },
                    reply: format::token_prompt(),
                },
                Err(error) => SessionOutcome::Continue {
                    session: Self::AwaitingName { description, framework },
                    reply: format::invalid_name(&error.to_string()),
                },
            },
            Self::AwaitingToken { description, framework, name } => {
                let token = input.trim();
                if validate_bot_token(token).is_err() {
                    return SessionOutcome::Continue {
                        session: Self::AwaitingToken { description, framework, name },
                        reply: format::invalid_token(),
                    };
                }
                SessionOutcome::Done(CreateRequest {
                    description,
                    name,
                    framework,
                    bot_token: SecretString::from(token),
                })
            }
        }
    }
}

/// Node keywords anywhere in the description select the telegraf stack;
/// everything else gets aiogram.
fn detect_framework(description: &str) -> Framework {
    let lowered = description.to_ascii_lowercase();
    let wants_node = lowered
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|word| matches!(word, "node" | "nodejs" | "javascript" | "telegraf"));
    if wants_node {
        Framework::Nodejs
    } else {
        Framework::Python
    }
}

/// Who sent the message. `sender_id` establishes ownership; `chat_id` is
/// where replies go and keys the create conversations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatContext {
    pub chat_id: i64,
    pub sender_id: i64,
}

#[derive(Debug, Error)]
pub enum CommandRouteError {
    #[error("command service failed: {0}")]
    Service(String),
}

/// The operations the chat surface needs from the deployment side. Replies
/// are pre-rendered MarkdownV2. Domain refusals (quota, name taken, wrong
/// state) come back as `Ok` replies explaining what happened; `Err` is
/// reserved for failures worth a log line and a generic apology.
#[async_trait]
pub trait BotCommandService: Send + Sync {
    async fn create_bot(
        &self,
        chat: &ChatContext,
        request: CreateRequest,
    ) -> Result<String, CommandRouteError>;

    async fn list_bots(&self, chat: &ChatContext) -> Result<String, CommandRouteError>;

    async fn bot_status(
        &self,
        chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError>;

    async fn start_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError>;

    async fn stop_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError>;

    async fn remove_bot(
        &self,
        chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError>;

    async fn retry_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError>;

    async fn bot_logs(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError>;
}

/// Transportless stand-in for wiring and tests.
#[derive(Default)]
pub struct NoopBotCommandService;

#[async_trait]
impl BotCommandService for NoopBotCommandService {
    async fn create_bot(
        &self,
        _chat: &ChatContext,
        request: CreateRequest,
    ) -> Result<String, CommandRouteError> {
        Ok(format!(
            "create acknowledged for {} \\({}\\)",
            format::escape_markdown(request.name.as_str()),
            request.framework.as_str()
        ))
    }

    async fn list_bots(&self, _chat: &ChatContext) -> Result<String, CommandRouteError> {
        Ok(format::bot_list(&[]))
    }

    async fn bot_status(
        &self,
        _chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        Ok(format!("status requested for {}", format::escape_markdown(name)))
    }

    async fn start_bot(
        &self,
        _chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        Ok(format::started_message(name))
    }

    async fn stop_bot(&self, _chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        Ok(format::stopped_message(name))
    }

    async fn remove_bot(
        &self,
        _chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        Ok(format::removed_message(name))
    }

    async fn retry_bot(
        &self,
        _chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        Ok(format!("retry requested for {}", format::escape_markdown(name)))
    }

    async fn bot_logs(&self, _chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        Ok(format::logs_message(name, &[]))
    }
}

/// Parses incoming text, owns the per-chat create conversations, and routes
/// everything else to the service.
pub struct CommandRouter<S> {
    service: S,
    sessions: Mutex<HashMap<i64, CreateSession>>,
}

impl<S> CommandRouter<S>
where
    S: BotCommandService,
{
    pub fn new(service: S) -> Self {
        Self { service, sessions: Mutex::new(HashMap::new()) }
    }

    /// Handles one incoming text message. `Ok(None)` means chat noise
    /// outside any conversation, which gets no reply.
    pub async fn handle_text(
        &self,
        chat: &ChatContext,
        text: &str,
    ) -> Result<Option<String>, CommandRouteError> {
        match parse_command(text) {
            Some(command) => self.handle_command(chat, command).await.map(Some),
            None => self.handle_answer(chat, text).await,
        }
    }

    async fn handle_command(
        &self,
        chat: &ChatContext,
        command: ChatCommand,
    ) -> Result<String, CommandRouteError> {
        {
            let mut sessions = self.sessions.lock().await;

            // An active conversation owns the chat: only /cancel gets
            // through, every other command is answered with a pointer back
            // to it.
            if sessions.contains_key(&chat.chat_id) {
                return Ok(match command {
                    ChatCommand::Cancel => {
                        sessions.remove(&chat.chat_id);
                        format::cancelled()
                    }
                    _ => format::create_in_progress(),
                });
            }
        }

        match command {
            ChatCommand::Create => self.open_session(chat).await,
            ChatCommand::List => self.service.list_bots(chat).await,
            ChatCommand::Status { name: Some(name) } => self.service.bot_status(chat, &name).await,
            ChatCommand::Status { name: None } => Ok(format::usage_hint("status")),
            ChatCommand::Start { name: Some(name) } => self.service.start_bot(chat, &name).await,
            ChatCommand::Start { name: None } => Ok(format::welcome_message()),
            ChatCommand::Stop { name: Some(name) } => self.service.stop_bot(chat, &name).await,
            ChatCommand::Stop { name: None } => Ok(format::usage_hint("stop")),
            ChatCommand::Remove { name: Some(name) } => self.service.remove_bot(chat, &name).await,
            ChatCommand::Remove { name: None } => Ok(format::usage_hint("remove")),
            ChatCommand::Retry { name: Some(name) } => self.service.retry_bot(chat, &name).await,
            ChatCommand::Retry { name: None } => Ok(format::usage_hint("retry")),
            ChatCommand::Logs { name: Some(name) } => self.service.bot_logs(chat, &name).await,
            ChatCommand::Logs { name: None } => Ok(format::usage_hint("logs")),
            ChatCommand::Help => Ok(format::help_message()),
            ChatCommand::Cancel => Ok(format::nothing_to_cancel()),
            ChatCommand::Unknown { command } => Ok(format::unknown_command(&command)),
        }
    }

    async fn open_session(&self, chat: &ChatContext) -> Result<String, CommandRouteError> {
        let (session, prompt) = CreateSession::start();
        self.sessions.lock().await.insert(chat.chat_id, session);
        debug!(
            event_name = "telegram.create.session_opened",
            chat_id = chat.chat_id,
            "create conversation opened"
        );
        Ok(prompt)
    }

    async fn handle_answer(
        &self,
        chat: &ChatContext,
        text: &str,
    ) -> Result<Option<String>, CommandRouteError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.remove(&chat.chat_id) {
                Some(session) => session,
                None => return Ok(None),
            }
        };

        match session.advance(text) {
            SessionOutcome::Continue { session, reply } => {
                self.sessions.lock().await.insert(chat.chat_id, session);
                Ok(Some(reply))
            }
            SessionOutcome::Done(request) => {
                debug!(
                    event_name = "telegram.create.collected",
                    chat_id = chat.chat_id,
                    bot_name = %request.name,
                    framework = %request.framework,
                    "create conversation completed"
                );
                self.service.create_bot(chat, request).await.map(Some)
            }
        }
    }
}
