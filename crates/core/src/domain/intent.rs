use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::domain::bot::{BotName, BotNameError, Framework, OwnerId};

pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MIN_TOKEN_CHARS: usize = 20;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error(transparent)]
    Name(#[from] BotNameError),
    #[error("bot description must be at least {MIN_DESCRIPTION_CHARS} characters, got {0}")]
    DescriptionTooShort(usize),
    #[error("telegram bot token does not look valid (expected `<id>:<secret>`, 20+ characters)")]
    MalformedToken,
}

/// Shape check only; whether the token actually works is Telegram's call.
pub fn validate_bot_token(token: &str) -> Result<(), IntentError> {
    let token = token.trim();
    if token.len() < MIN_TOKEN_CHARS || !token.contains(':') {
        return Err(IntentError::MalformedToken);
    }
    Ok(())
}

/// A fully validated request to create one bot. Construction is the only
/// validation point; everything downstream trusts the fields.
#[derive(Clone, Debug)]
pub struct DeploymentIntent {
    pub owner_id: OwnerId,
    pub name: BotName,
    pub description: String,
    pub framework: Framework,
    pub bot_token: SecretString,
}

impl DeploymentIntent {
    pub fn new(
        owner_id: OwnerId,
        name: &str,
        description: &str,
        framework: Framework,
        bot_token: SecretString,
    ) -> Result<Self, IntentError> {
        let name = BotName::parse(name)?;

        let description = description.trim().to_string();
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(IntentError::DescriptionTooShort(description.chars().count()));
        }

        validate_bot_token(bot_token.expose_secret())?;

        Ok(Self { owner_id, name, description, framework, bot_token })
    }
}
