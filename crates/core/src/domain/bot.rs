use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identity of the user who owns a bot. For the Telegram surface this
/// is the numeric user id rendered as a string, but nothing in the registry
/// or orchestrator depends on that.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BotNameError {
    #[error("bot name must be 3 to 32 characters, got {0}")]
    Length(usize),
    #[error("bot name must start with a letter or digit")]
    BadFirstCharacter,
    #[error("bot name may contain only letters, digits, `_`, and `-` (found `{0}`)")]
    BadCharacter(char),
}

/// Validated bot name. Stored lowercase so uniqueness within an owner's
/// namespace is case-insensitive by construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotName(String);

impl BotName {
    pub fn parse(raw: &str) -> Result<Self, BotNameError> {
        let normalized = raw.trim().to_ascii_lowercase();

        if normalized.len() < 3 || normalized.len() > 32 {
            return Err(BotNameError::Length(normalized.len()));
        }

        let mut chars = normalized.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphanumeric() => {}
            _ => return Err(BotNameError::BadFirstCharacter),
        }
        for ch in chars {
            if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '-' {
                return Err(BotNameError::BadCharacter(ch));
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Python,
    Nodejs,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Nodejs => "nodejs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "python" => Some(Self::Python),
            "nodejs" | "node" | "javascript" => Some(Self::Nodejs),
            _ => None,
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime-assigned container identity. Set exactly once per record, during
/// deployment; the registry rejects any attempt to overwrite it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef(pub String);

impl ContainerRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Draft,
    Generating,
    Building,
    Deploying,
    Running,
    Stopped,
    Failed,
    Removed,
}

impl BotState {
    pub const ALL: [BotState; 8] = [
        Self::Draft,
        Self::Generating,
        Self::Building,
        Self::Deploying,
        Self::Running,
        Self::Stopped,
        Self::Failed,
        Self::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "generating" => Some(Self::Generating),
            "building" => Some(Self::Building),
            "deploying" => Some(Self::Deploying),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the container engine reports for a container, collapsed to the three
/// cases reconciliation cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Running,
    Exited,
    Absent,
}

/// The runtime status a healthy record in `state` implies, if the state
/// implies one at all. In-flight and terminal states carry no expectation.
pub fn expected_runtime(state: BotState) -> Option<RuntimeStatus> {
    match state {
        BotState::Running => Some(RuntimeStatus::Running),
        BotState::Stopped => Some(RuntimeStatus::Exited),
        _ => None,
    }
}

/// The registry's durable view of one deployed-or-deployable bot. The bot
/// token is deliberately not part of this struct; it travels separately as a
/// secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRecord {
    pub id: String,
    pub owner_id: OwnerId,
    pub name: BotName,
    pub description: String,
    pub framework: Framework,
    pub container_ref: Option<ContainerRef>,
    pub state: BotState,
    pub last_error: Option<String>,
    pub failed_from: Option<BotState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub generation: u32,
}

/// Read-only answer to a status query: the believed record, a best-effort
/// live probe, and whether the two disagree. Computing the view never writes
/// to the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatusView {
    pub record: BotRecord,
    pub runtime: Option<RuntimeStatus>,
    pub drift_detected: bool,
}

impl BotStatusView {
    pub fn new(record: BotRecord, runtime: Option<RuntimeStatus>) -> Self {
        let drift_detected = match (expected_runtime(record.state), runtime) {
            (Some(expected), Some(observed)) => expected != observed,
            _ => false,
        };
        Self { record, runtime, drift_detected }
    }
}
