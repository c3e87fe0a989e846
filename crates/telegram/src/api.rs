use serde::{Deserialize, Serialize};

pub const PARSE_MODE_MARKDOWN_V2: &str = "MarkdownV2";

/// One entry from a `getUpdates` poll. Only message updates are requested;
/// anything else the Bot API sends anyway deserializes with `message: None`
/// and is skipped after its offset is consumed.
#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Text message view over an update, with the sender resolved. Channel posts
/// and service messages have no sender and yield `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IncomingMessage<'a> {
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: &'a str,
}

impl Update {
    pub fn text_message(&self) -> Option<IncomingMessage<'_>> {
        let message = self.message.as_ref()?;
        let sender = message.from.as_ref()?;
        let text = message.text.as_deref()?;
        Some(IncomingMessage { chat_id: message.chat.id, sender_id: sender.id, text })
    }
}

/// The envelope every Bot API method responds with.
#[derive(Clone, Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRejection {
    pub error_code: Option<i64>,
    pub description: String,
}

impl std::fmt::Display for ApiRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error_code {
            Some(code) => write!(f, "{} ({code})", self.description),
            None => f.write_str(&self.description),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T, ApiRejection> {
        if !self.ok {
            return Err(ApiRejection {
                error_code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "no description provided".to_owned()),
            });
        }

        self.result.ok_or(ApiRejection {
            error_code: None,
            description: "ok response carried no result payload".to_owned(),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GetUpdatesPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub timeout: u64,
    pub allowed_updates: &'a [&'a str],
}

#[derive(Clone, Debug, Serialize)]
pub struct SendMessagePayload<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    pub parse_mode: &'a str,
}
