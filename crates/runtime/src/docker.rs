//! [`RuntimeGateway`] implementation backed by a local docker daemon.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, HostConfig, NetworkCreateRequest,
    RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
    InspectNetworkOptions, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    RemoveImageOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::StreamExt;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use botforge_core::domain::bot::{ContainerRef, RuntimeStatus};

use crate::{ContainerSpec, ImageBuildSpec, ImageRef, RuntimeError, RuntimeGateway};

/// Containers restart on crash until the reconciler notices and records the
/// failure; the cap keeps a broken bot from flapping forever.
const RESTART_MAX_RETRIES: i64 = 3;

pub struct DockerGateway {
    docker: Docker,
}

impl DockerGateway {
    /// Connects to the daemon behind the platform default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|error| RuntimeError::Connect { message: error.to_string() })?;
        Ok(Self { docker })
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404
    )
}

fn operation_error(operation: &'static str, target: &str, source: BollardError) -> RuntimeError {
    RuntimeError::Operation { operation, target: target.to_owned(), message: source.to_string() }
}

#[async_trait::async_trait]
impl RuntimeGateway for DockerGateway {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|error| RuntimeError::Connect { message: error.to_string() })
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_network(name, None::<InspectNetworkOptions>).await {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => {
                self.docker
                    .create_network(NetworkCreateRequest {
                        name: name.to_owned(),
                        driver: Some("bridge".to_owned()),
                        ..Default::default()
                    })
                    .await
                    .map_err(|error| operation_error("create_network", name, error))?;
                debug!(event_name = "runtime.network_created", network = name);
                Ok(())
            }
            Err(error) => Err(operation_error("inspect_network", name, error)),
        }
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<ImageRef, RuntimeError> {
        let context = pack_build_context(&spec.context_dir).await?;
        let options = BuildImageOptionsBuilder::new()
            .dockerfile("Dockerfile")
            .t(spec.image_tag.as_str())
            .rm(true)
            .forcerm(true)
            .build();

        let mut progress =
            self.docker.build_image(options, None, Some(bollard::body_full(context.into())));
        while let Some(frame) = progress.next().await {
            let frame = frame
                .map_err(|error| operation_error("build_image", spec.image_tag.as_str(), error))?;
            if let Some(message) = frame.error {
                return Err(RuntimeError::ImageBuild {
                    image: spec.image_tag.as_str().to_owned(),
                    message,
                });
            }
            if let Some(line) = frame.stream {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(
                        event_name = "runtime.image_build_progress",
                        image = %spec.image_tag,
                        line,
                    );
                }
            }
        }
        Ok(spec.image_tag.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", value.expose_secret()))
            .collect();

        let config = ContainerCreateBody {
            image: Some(spec.image.as_str().to_owned()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::ON_FAILURE),
                    maximum_retry_count: Some(RESTART_MAX_RETRIES),
                }),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                config,
            )
            .await
            .map_err(|error| operation_error("create_container", &spec.name, error))?;
        for warning in &response.warnings {
            warn!(event_name = "runtime.container_create_warning", container = %spec.name, warning);
        }
        Ok(ContainerRef(response.id))
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        match self.docker.start_container(container.as_str(), None::<StartContainerOptions>).await
        {
            Ok(()) => Ok(()),
            // 304 means the container was already running.
            Err(BollardError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::ContainerAbsent { container: container.as_str().to_owned() })
            }
            Err(error) => Err(operation_error("start_container", container.as_str(), error)),
        }
    }

    async fn stop_container(
        &self,
        container: &ContainerRef,
        grace: Duration,
    ) -> Result<(), RuntimeError> {
        let options = StopContainerOptionsBuilder::new().t(grace.as_secs() as i32).build();
        match self.docker.stop_container(container.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            // 304 means the container was already stopped.
            Err(BollardError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::ContainerAbsent { container: container.as_str().to_owned() })
            }
            Err(error) => Err(operation_error("stop_container", container.as_str(), error)),
        }
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        match self.docker.remove_container(container.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(operation_error("remove_container", container.as_str(), error)),
        }
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let options = RemoveImageOptionsBuilder::new().force(true).build();
        match self.docker.remove_image(image.as_str(), Some(options), None).await {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(operation_error("remove_image", image.as_str(), error)),
        }
    }

    async fn container_status(
        &self,
        container: &ContainerRef,
    ) -> Result<RuntimeStatus, RuntimeError> {
        match self
            .docker
            .inspect_container(container.as_str(), None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => {
                let status = details.state.as_ref().and_then(|state| state.status);
                Ok(match status {
                    Some(ContainerStateStatusEnum::RUNNING) => RuntimeStatus::Running,
                    _ => RuntimeStatus::Exited,
                })
            }
            Err(error) if is_not_found(&error) => Ok(RuntimeStatus::Absent),
            Err(error) => Err(operation_error("inspect_container", container.as_str(), error)),
        }
    }

    async fn tail_logs(
        &self,
        container: &ContainerRef,
        lines: u32,
    ) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail(&lines.to_string())
            .build();

        let mut stream = self.docker.logs(container.as_str(), Some(options));
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    let text = String::from_utf8_lossy(&output.into_bytes()).into_owned();
                    collected.extend(
                        text.lines()
                            .filter(|line| !line.is_empty())
                            .map(|line| line.to_owned()),
                    );
                }
                Err(error) if is_not_found(&error) => {
                    return Err(RuntimeError::ContainerAbsent {
                        container: container.as_str().to_owned(),
                    });
                }
                Err(error) => return Err(operation_error("logs", container.as_str(), error)),
            }
        }
        Ok(collected)
    }
}

/// Packages a materialized source tree as the tar stream docker expects.
///
/// Entries are emitted in sorted order with fixed metadata so identical
/// trees produce identical contexts.
async fn pack_build_context(context_dir: &Path) -> Result<Vec<u8>, RuntimeError> {
    let files = collect_files(context_dir).await?;
    if !files.contains_key("Dockerfile") {
        return Err(RuntimeError::BuildContext {
            path: context_dir.to_path_buf(),
            message: "no Dockerfile at the context root".to_owned(),
        });
    }

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        builder.mode(tar::HeaderMode::Deterministic);
        for (path, content) in &files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder.append_data(&mut header, path.as_str(), content.as_slice()).map_err(
                |error| RuntimeError::BuildContext {
                    path: context_dir.to_path_buf(),
                    message: format!("failed to archive `{path}`: {error}"),
                },
            )?;
        }
        builder.finish().map_err(|error| RuntimeError::BuildContext {
            path: context_dir.to_path_buf(),
            message: error.to_string(),
        })?;
    }
    Ok(tar_bytes)
}

async fn collect_files(context_dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, RuntimeError> {
    let context_error = |message: String| RuntimeError::BuildContext {
        path: context_dir.to_path_buf(),
        message,
    };

    let mut files = BTreeMap::new();
    let mut pending: Vec<PathBuf> = vec![context_dir.to_path_buf()];
    while let Some(directory) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&directory).await.map_err(|error| {
            context_error(format!("failed to read `{}`: {error}", directory.display()))
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| context_error(error.to_string()))?
        {
            let path = entry.path();
            let file_type =
                entry.file_type().await.map_err(|error| context_error(error.to_string()))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(context_dir)
                    .map_err(|error| context_error(error.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                let content = tokio::fs::read(&path).await.map_err(|error| {
                    context_error(format!("failed to read `{}`: {error}", path.display()))
                })?;
                files.insert(relative, content);
            }
        }
    }
    Ok(files)
}
