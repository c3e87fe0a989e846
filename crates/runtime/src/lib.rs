//! Container runtime access for deployed bots.
//!
//! The orchestrator talks to the runtime exclusively through the
//! [`RuntimeGateway`] trait. [`docker::DockerGateway`] is the production
//! implementation; [`memory::InMemoryRuntime`] backs tests and the smoke
//! command.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use botforge_core::domain::bot::{BotName, ContainerRef, OwnerId, RuntimeStatus};

pub mod docker;
pub mod memory;

pub use docker::DockerGateway;
pub use memory::InMemoryRuntime;

/// Label that carries the owning user of a managed container.
pub const OWNER_LABEL: &str = "botforge.owner";
/// Label that carries the bot name of a managed container.
pub const BOT_LABEL: &str = "botforge.bot";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker connection failed: {message}")]
    Connect { message: String },
    #[error("runtime {operation} for `{target}` failed: {message}")]
    Operation { operation: &'static str, target: String, message: String },
    #[error("image build for `{image}` failed: {message}")]
    ImageBuild { image: String, message: String },
    #[error("container `{container}` is not present in the runtime")]
    ContainerAbsent { container: String },
    #[error("failed to package build context `{path}`: {message}")]
    BuildContext { path: PathBuf, message: String },
}

/// Tagged reference to a built bot image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Instructions for building a bot image from a materialized source tree.
///
/// The context directory must already contain a `Dockerfile` at its root.
#[derive(Clone, Debug)]
pub struct ImageBuildSpec {
    pub context_dir: PathBuf,
    pub image_tag: ImageRef,
}

/// Instructions for creating a bot container.
///
/// Environment values stay wrapped until the moment they are handed to the
/// daemon, so a stray `Debug` of this struct never prints the bot token.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageRef,
    pub env: Vec<(String, SecretString)>,
    pub labels: HashMap<String, String>,
    pub network: String,
}

#[async_trait::async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Verifies the runtime daemon is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Creates the shared bot network when it does not exist yet.
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Builds an image from the given context and returns its tag.
    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<ImageRef, RuntimeError>;

    /// Creates a container without starting it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError>;

    async fn start_container(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Stops a container, allowing `grace` before the runtime kills it.
    async fn stop_container(
        &self,
        container: &ContainerRef,
        grace: Duration,
    ) -> Result<(), RuntimeError>;

    /// Force-removes a container together with its volumes. Removing a
    /// container that is already gone is not an error.
    async fn remove_container(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Removes an image. Removing an image that is already gone is not an
    /// error.
    async fn remove_image(&self, image: &ImageRef) -> Result<(), RuntimeError>;

    /// Reports the observed state of a container, [`RuntimeStatus::Absent`]
    /// when the runtime no longer knows it.
    async fn container_status(&self, container: &ContainerRef)
        -> Result<RuntimeStatus, RuntimeError>;

    /// Returns up to `lines` trailing log lines of a container.
    async fn tail_logs(
        &self,
        container: &ContainerRef,
        lines: u32,
    ) -> Result<Vec<String>, RuntimeError>;
}

/// Maps an arbitrary owner id onto the character set docker accepts in
/// image repository and container names.
pub fn sanitize_component(raw: &str) -> String {
    let mut component: String = raw
        .to_lowercase()
        .chars()
        .map(|character| {
            if character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_' {
                character
            } else {
                '-'
            }
        })
        .collect();
    // Docker rejects empty name components.
    if component.chars().all(|character| character == '-') {
        component = format!("x{component}");
    }
    component
}

pub fn image_tag(owner: &OwnerId, name: &BotName) -> ImageRef {
    ImageRef(format!("botforge-{}-{}:latest", sanitize_component(owner.as_str()), name.as_str()))
}

pub fn container_name(owner: &OwnerId, name: &BotName) -> String {
    format!("botforge-{}-{}", sanitize_component(owner.as_str()), name.as_str())
}

pub fn bot_labels(owner: &OwnerId, name: &BotName) -> HashMap<String, String> {
    HashMap::from([
        (OWNER_LABEL.to_owned(), owner.as_str().to_owned()),
        (BOT_LABEL.to_owned(), name.as_str().to_owned()),
    ])
}
