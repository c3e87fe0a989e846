//! Deterministic [`RuntimeGateway`] fake.
//!
//! Mirrors the docker gateway's observable behavior closely enough that the
//! orchestrator test suites and the smoke command can run without a daemon.
//! Tests can arm one-shot failures per operation and flip container status
//! out of band to simulate crashes.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::Mutex;

use botforge_core::domain::bot::{ContainerRef, RuntimeStatus};

use crate::{ContainerSpec, ImageBuildSpec, ImageRef, RuntimeError, RuntimeGateway};

struct FakeContainer {
    name: String,
    image: String,
    env_keys: Vec<String>,
    labels: HashMap<String, String>,
    network: String,
    status: RuntimeStatus,
    logs: Vec<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    images: BTreeSet<String>,
    networks: BTreeSet<String>,
    containers: HashMap<String, FakeContainer>,
    armed_failures: HashMap<&'static str, String>,
}

/// Creation-time details of a fake container, for assertions.
#[derive(Clone, Debug)]
pub struct ContainerDetails {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub network: String,
}

#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a failure for the next call of `operation`; the call after that
    /// succeeds again.
    pub async fn fail_next(&self, operation: &'static str, message: &str) {
        let mut inner = self.inner.lock().await;
        inner.armed_failures.insert(operation, message.to_owned());
    }

    /// Flips a container's status out of band, simulating a crash or an
    /// operator deleting it behind the orchestrator's back.
    pub async fn set_status(&self, container: &ContainerRef, status: RuntimeStatus) {
        let mut inner = self.inner.lock().await;
        if status == RuntimeStatus::Absent {
            inner.containers.remove(container.as_str());
        } else if let Some(found) = inner.containers.get_mut(container.as_str()) {
            found.status = status;
        }
    }

    pub async fn image_exists(&self, image: &ImageRef) -> bool {
        self.inner.lock().await.images.contains(image.as_str())
    }

    pub async fn container_exists(&self, container: &ContainerRef) -> bool {
        self.inner.lock().await.containers.contains_key(container.as_str())
    }

    pub async fn details(&self, container: &ContainerRef) -> Option<ContainerDetails> {
        let inner = self.inner.lock().await;
        inner.containers.get(container.as_str()).map(|found| ContainerDetails {
            name: found.name.clone(),
            image: found.image.clone(),
            labels: found.labels.clone(),
            network: found.network.clone(),
        })
    }

    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }

    /// Environment variable names the container was created with. Values are
    /// intentionally not retained.
    pub async fn env_keys(&self, container: &ContainerRef) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .containers
            .get(container.as_str())
            .map(|found| found.env_keys.clone())
            .unwrap_or_default()
    }

    pub async fn push_log(&self, container: &ContainerRef, line: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(found) = inner.containers.get_mut(container.as_str()) {
            found.logs.push(line.to_owned());
        }
    }
}

fn take_armed(
    inner: &mut Inner,
    operation: &'static str,
    target: &str,
) -> Result<(), RuntimeError> {
    match inner.armed_failures.remove(operation) {
        Some(message) => {
            Err(RuntimeError::Operation { operation, target: target.to_owned(), message })
        }
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl RuntimeGateway for InMemoryRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "ping", "daemon")
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "ensure_network", name)?;
        inner.networks.insert(name.to_owned());
        Ok(())
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<ImageRef, RuntimeError> {
        {
            let mut inner = self.inner.lock().await;
            take_armed(&mut inner, "build_image", spec.image_tag.as_str())?;
        }

        // The fake still insists on a real context so generator regressions
        // surface in tests that never touch docker.
        let dockerfile = spec.context_dir.join("Dockerfile");
        let present = tokio::fs::try_exists(&dockerfile).await.map_err(|error| {
            RuntimeError::BuildContext {
                path: spec.context_dir.clone(),
                message: error.to_string(),
            }
        })?;
        if !present {
            return Err(RuntimeError::BuildContext {
                path: spec.context_dir.clone(),
                message: "no Dockerfile at the context root".to_owned(),
            });
        }

        let mut inner = self.inner.lock().await;
        inner.images.insert(spec.image_tag.as_str().to_owned());
        Ok(spec.image_tag.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "create_container", &spec.name)?;

        if inner.containers.values().any(|container| container.name == spec.name) {
            return Err(RuntimeError::Operation {
                operation: "create_container",
                target: spec.name.clone(),
                message: "container name already in use".to_owned(),
            });
        }

        inner.next_id += 1;
        let id = format!("mem-{}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                image: spec.image.as_str().to_owned(),
                env_keys: spec.env.iter().map(|(key, _)| key.clone()).collect(),
                labels: spec.labels.clone(),
                network: spec.network.clone(),
                status: RuntimeStatus::Exited,
                logs: Vec::new(),
            },
        );
        Ok(ContainerRef(id))
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "start_container", container.as_str())?;
        match inner.containers.get_mut(container.as_str()) {
            Some(found) => {
                found.status = RuntimeStatus::Running;
                found.logs.push("bot started".to_owned());
                Ok(())
            }
            None => {
                Err(RuntimeError::ContainerAbsent { container: container.as_str().to_owned() })
            }
        }
    }

    async fn stop_container(
        &self,
        container: &ContainerRef,
        _grace: Duration,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "stop_container", container.as_str())?;
        match inner.containers.get_mut(container.as_str()) {
            Some(found) => {
                found.status = RuntimeStatus::Exited;
                found.logs.push("bot stopped".to_owned());
                Ok(())
            }
            None => {
                Err(RuntimeError::ContainerAbsent { container: container.as_str().to_owned() })
            }
        }
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "remove_container", container.as_str())?;
        inner.containers.remove(container.as_str());
        Ok(())
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "remove_image", image.as_str())?;
        inner.images.remove(image.as_str());
        Ok(())
    }

    async fn container_status(
        &self,
        container: &ContainerRef,
    ) -> Result<RuntimeStatus, RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "container_status", container.as_str())?;
        Ok(inner
            .containers
            .get(container.as_str())
            .map(|found| found.status)
            .unwrap_or(RuntimeStatus::Absent))
    }

    async fn tail_logs(
        &self,
        container: &ContainerRef,
        lines: u32,
    ) -> Result<Vec<String>, RuntimeError> {
        let mut inner = self.inner.lock().await;
        take_armed(&mut inner, "tail_logs", container.as_str())?;
        match inner.containers.get(container.as_str()) {
            Some(found) => {
                let keep = lines as usize;
                let start = found.logs.len().saturating_sub(keep);
                Ok(found.logs[start..].to_vec())
            }
            None => {
                Err(RuntimeError::ContainerAbsent { container: container.as_str().to_owned() })
            }
        }
    }
}
