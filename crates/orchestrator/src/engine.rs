//! The lifecycle engine driving bots from description to running container.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use botforge_codegen::SourceWorkspace;
use botforge_core::config::{QuotaConfig, RuntimeConfig};
use botforge_core::{
    check_transition, BotName, BotRecord, BotState, BotStatusView, ContainerRef, DeploymentIntent,
    InvalidTransition, OwnerId, SourceGenerator,
};
use botforge_db::registry::BotRegistry;
use botforge_runtime::{
    bot_labels, container_name, image_tag, sanitize_component, ContainerSpec, ImageBuildSpec,
    RuntimeError, RuntimeGateway,
};

use crate::errors::OrchestratorError;
use crate::quota::QuotaGuard;

/// Receives lifecycle phase changes while an operation runs, so the chat
/// surface can live-edit its progress message. Implementations must be quick;
/// the engine calls them inline.
pub trait DeployObserver: Send + Sync {
    fn on_phase(&self, owner: &OwnerId, name: &BotName, state: BotState);
}

/// Default observer that ignores every phase change.
pub struct NoopObserver;

impl DeployObserver for NoopObserver {
    fn on_phase(&self, _owner: &OwnerId, _name: &BotName, _state: BotState) {}
}

/// Stateless coordinator between the registry, the source generator, and the
/// container runtime. All durable state lives in the registry; the engine
/// can be restarted at any point and the reconciler picks up whatever was in
/// flight.
pub struct Orchestrator<R, G, S> {
    registry: Arc<R>,
    gateway: Arc<G>,
    generator: Arc<S>,
    workspace: SourceWorkspace,
    quota: QuotaGuard,
    observer: Arc<dyn DeployObserver>,
    network: String,
    stop_grace: Duration,
    generate_budget: Duration,
    build_budget: Duration,
    deploy_budget: Duration,
    probe_budget: Duration,
}

impl<R, G, S> Orchestrator<R, G, S>
where
    R: BotRegistry,
    G: RuntimeGateway,
    S: SourceGenerator,
{
    pub fn new(
        registry: Arc<R>,
        gateway: Arc<G>,
        generator: Arc<S>,
        runtime: &RuntimeConfig,
        quota: &QuotaConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            generator,
            workspace: SourceWorkspace::new(&runtime.bots_dir),
            quota: QuotaGuard::new(quota.max_bots_per_owner),
            observer: Arc::new(NoopObserver),
            network: runtime.docker_network.clone(),
            stop_grace: Duration::from_secs(runtime.stop_grace_secs),
            generate_budget: Duration::from_secs(runtime.generate_timeout_secs),
            build_budget: Duration::from_secs(runtime.build_timeout_secs),
            deploy_budget: Duration::from_secs(runtime.deploy_timeout_secs),
            probe_budget: Duration::from_secs(runtime.probe_timeout_secs),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DeployObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Admits a new bot and drives it all the way to `Running`. The quota
    /// lock covers only the count-and-insert window; the build itself runs
    /// without serializing the owner's other requests.
    pub async fn create(&self, intent: &DeploymentIntent) -> Result<BotRecord, OrchestratorError> {
        let slot = self.quota.reserve(self.registry.as_ref(), &intent.owner_id).await?;
        let record = self
            .registry
            .create(
                &intent.owner_id,
                &intent.name,
                &intent.description,
                intent.framework,
                &intent.bot_token,
            )
            .await
            .map_err(|error| {
                OrchestratorError::from_registry(
                    &intent.owner_id,
                    &intent.name,
                    "create bot",
                    error,
                )
            })?;
        drop(slot);
        info!(
            event_name = "bot.create.accepted",
            owner = %intent.owner_id,
            bot = %intent.name,
            framework = %intent.framework,
        );

        let record = self.drive_pipeline(record, intent).await?;
        info!(
            event_name = "bot.create.deployed",
            owner = %record.owner_id,
            bot = %record.name,
            generation = record.generation,
        );
        Ok(record)
    }

    /// Starts a stopped bot. A gateway fault surfaces as `RuntimeFailure`
    /// and leaves the record in `Stopped`.
    pub async fn start(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
    ) -> Result<BotRecord, OrchestratorError> {
        let record = self.load(owner, name).await?;
        self.ensure_generation(&record, expected_generation)?;
        if record.state != BotState::Stopped {
            return Err(self.illegal(&record, BotState::Running));
        }

        let container = self.recorded_container(&record)?;
        self.timed(owner, name, "start container", self.deploy_budget, async {
            self.gateway.start_container(&container).await
        })
        .await?;

        let updated = self.transition(&record, BotState::Running).await?;
        info!(
            event_name = "bot.started",
            owner = %owner,
            bot = %name,
            generation = updated.generation,
        );
        Ok(updated)
    }

    /// Stops a running bot, honoring the configured grace period.
    pub async fn stop(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
    ) -> Result<BotRecord, OrchestratorError> {
        let record = self.load(owner, name).await?;
        self.ensure_generation(&record, expected_generation)?;
        if record.state != BotState::Running {
            return Err(self.illegal(&record, BotState::Stopped));
        }

        let container = self.recorded_container(&record)?;
        let budget = self.deploy_budget + self.stop_grace;
        self.timed(owner, name, "stop container", budget, async {
            self.gateway.stop_container(&container, self.stop_grace).await
        })
        .await?;

        let updated = self.transition(&record, BotState::Stopped).await?;
        info!(
            event_name = "bot.stopped",
            owner = %owner,
            bot = %name,
            generation = updated.generation,
        );
        Ok(updated)
    }

    /// Re-enters the state a failed bot fell out of and resumes the pipeline
    /// from there. The stored description and token reconstruct the intent.
    pub async fn retry(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
    ) -> Result<BotRecord, OrchestratorError> {
        let record = self.load(owner, name).await?;
        self.ensure_generation(&record, expected_generation)?;
        let target = record.failed_from.unwrap_or(record.state);
        check_transition(record.state, target, record.failed_from).map_err(|transition| {
            OrchestratorError::InvalidTransition {
                owner: owner.clone(),
                name: name.clone(),
                transition,
            }
        })?;

        let token = self
            .registry
            .bot_token(owner, name)
            .await
            .map_err(|error| OrchestratorError::from_registry(owner, name, "fetch token", error))?;
        let intent = DeploymentIntent::new(
            owner.clone(),
            record.name.as_str(),
            &record.description,
            record.framework,
            token,
        )
        .map_err(|error| OrchestratorError::Internal {
            owner: owner.clone(),
            operation: "rebuild intent",
            message: error.to_string(),
        })?;

        info!(event_name = "bot.retry", owner = %owner, bot = %name, resume_from = %target);
        let record = self.transition(&record, target).await?;
        self.drive_pipeline(record, &intent).await
    }

    /// Tears down a stopped or failed bot and frees its name and quota slot.
    /// Teardown is at-least-once: a gateway fault leaves residue behind but
    /// never blocks the removal itself.
    pub async fn remove(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
    ) -> Result<BotRecord, OrchestratorError> {
        let record = self.load(owner, name).await?;
        self.ensure_generation(&record, expected_generation)?;
        self.ensure_edge(&record, BotState::Removed)?;

        if let Some(container) = record.container_ref.clone() {
            let removal = self.timed(owner, name, "remove container", self.deploy_budget, async {
                self.gateway.remove_container(&container).await
            });
            if let Err(error) = removal.await {
                warn!(
                    event_name = "bot.remove.residual_container",
                    owner = %owner,
                    bot = %name,
                    container = %container,
                    error = %error,
                );
            }
        }
        let image = image_tag(owner, name);
        let removal = self.timed(owner, name, "remove image", self.deploy_budget, async {
            self.gateway.remove_image(&image).await
        });
        if let Err(error) = removal.await {
            warn!(
                event_name = "bot.remove.residual_image",
                owner = %owner,
                bot = %name,
                image = %image,
                error = %error,
            );
        }

        let updated = self.transition(&record, BotState::Removed).await?;
        info!(event_name = "bot.removed", owner = %owner, bot = %name);
        Ok(updated)
    }

    /// The believed record plus a best-effort live probe. Disagreement is
    /// reported, never corrected; reads stay side-effect-free.
    pub async fn status(
        &self,
        owner: &OwnerId,
        name: &BotName,
    ) -> Result<BotStatusView, OrchestratorError> {
        let record = self.load(owner, name).await?;
        let runtime = match &record.container_ref {
            Some(container) => {
                let check = self.gateway.container_status(container);
                match tokio::time::timeout(self.probe_budget, check).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(error)) => {
                        debug!(
                            event_name = "bot.status.probe_failed",
                            owner = %owner,
                            bot = %name,
                            error = %error,
                        );
                        None
                    }
                    Err(_) => {
                        debug!(
                            event_name = "bot.status.probe_timeout",
                            owner = %owner,
                            bot = %name,
                        );
                        None
                    }
                }
            }
            None => None,
        };
        Ok(BotStatusView::new(record, runtime))
    }

    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<BotRecord>, OrchestratorError> {
        self.registry.list(owner).await.map_err(|error| OrchestratorError::Internal {
            owner: owner.clone(),
            operation: "list bots",
            message: error.to_string(),
        })
    }

    /// Trailing container log lines, available whenever a container exists.
    pub async fn logs(
        &self,
        owner: &OwnerId,
        name: &BotName,
        tail: u32,
    ) -> Result<Vec<String>, OrchestratorError> {
        let record = self.load(owner, name).await?;
        let container = match record.container_ref {
            Some(container) => container,
            None => {
                return Err(OrchestratorError::RuntimeFailure {
                    owner: owner.clone(),
                    name: name.clone(),
                    operation: "fetch logs",
                    message: "no container has been deployed for this bot yet".to_owned(),
                })
            }
        };
        self.timed(owner, name, "fetch logs", self.probe_budget, async {
            self.gateway.tail_logs(&container, tail).await
        })
        .await
    }

    /// Runs the deployment forward from whatever resumable state the record
    /// is in, stopping at `Running` (or at the re-issued stop for a bot that
    /// failed while stopping). The first broken step pins the record in
    /// `Failed`; a timeout or lost race leaves it exactly where it was.
    async fn drive_pipeline(
        &self,
        mut record: BotRecord,
        intent: &DeploymentIntent,
    ) -> Result<BotRecord, OrchestratorError> {
        loop {
            match record.state {
                BotState::Draft => {
                    record = self.transition(&record, BotState::Generating).await?;
                }
                BotState::Generating => {
                    if let Err(error) = self.generate_sources(&record, intent).await {
                        return Err(self.fail_step(&record, error).await);
                    }
                    record = self.transition(&record, BotState::Building).await?;
                }
                BotState::Building => {
                    if let Err(error) = self.build_bot_image(&record).await {
                        return Err(self.fail_step(&record, error).await);
                    }
                    record = self.transition(&record, BotState::Deploying).await?;
                }
                BotState::Deploying => {
                    return self.deploy_container(record, intent).await;
                }
                BotState::Running => {
                    // Retry target for a bot that failed mid-start: the
                    // container exists, only the start was missing.
                    let container = self.recorded_container(&record)?;
                    let started = self
                        .timed(
                            &record.owner_id,
                            &record.name,
                            "start container",
                            self.deploy_budget,
                            async { self.gateway.start_container(&container).await },
                        )
                        .await;
                    if let Err(error) = started {
                        return Err(self.fail_step(&record, error).await);
                    }
                    return Ok(record);
                }
                BotState::Stopped => {
                    let container = self.recorded_container(&record)?;
                    let budget = self.deploy_budget + self.stop_grace;
                    let stopped = self
                        .timed(&record.owner_id, &record.name, "stop container", budget, async {
                            self.gateway.stop_container(&container, self.stop_grace).await
                        })
                        .await;
                    if let Err(error) = stopped {
                        return Err(self.fail_step(&record, error).await);
                    }
                    return Ok(record);
                }
                BotState::Failed | BotState::Removed => {
                    return Err(OrchestratorError::Internal {
                        owner: record.owner_id.clone(),
                        operation: "drive pipeline",
                        message: format!("pipeline entered in state {}", record.state),
                    });
                }
            }
        }
    }

    async fn generate_sources(
        &self,
        record: &BotRecord,
        intent: &DeploymentIntent,
    ) -> Result<(), OrchestratorError> {
        let generated =
            tokio::time::timeout(self.generate_budget, self.generator.generate(intent)).await;
        let source = match generated {
            Ok(Ok(source)) => source,
            Ok(Err(error)) => {
                return Err(OrchestratorError::RuntimeFailure {
                    owner: record.owner_id.clone(),
                    name: record.name.clone(),
                    operation: "generate sources",
                    message: error.to_string(),
                })
            }
            Err(_) => {
                return Err(OrchestratorError::Timeout {
                    owner: record.owner_id.clone(),
                    name: record.name.clone(),
                    operation: "generate sources",
                    budget: self.generate_budget,
                })
            }
        };

        let slug = bot_slug(&record.owner_id, &record.name);
        self.workspace.materialize(&slug, &source).await.map_err(|error| {
            OrchestratorError::RuntimeFailure {
                owner: record.owner_id.clone(),
                name: record.name.clone(),
                operation: "materialize sources",
                message: error.to_string(),
            }
        })?;
        debug!(
            event_name = "bot.sources_written",
            owner = %record.owner_id,
            bot = %record.name,
            files = source.len(),
        );
        Ok(())
    }

    async fn build_bot_image(&self, record: &BotRecord) -> Result<(), OrchestratorError> {
        let spec = ImageBuildSpec {
            context_dir: self.workspace.bot_dir(&bot_slug(&record.owner_id, &record.name)),
            image_tag: image_tag(&record.owner_id, &record.name),
        };
        self.timed(&record.owner_id, &record.name, "build image", self.build_budget, async {
            self.gateway.build_image(&spec).await
        })
        .await?;
        Ok(())
    }

    async fn deploy_container(
        &self,
        mut record: BotRecord,
        intent: &DeploymentIntent,
    ) -> Result<BotRecord, OrchestratorError> {
        let container = match record.container_ref.clone() {
            Some(existing) => existing,
            None => {
                let network = self
                    .timed(
                        &record.owner_id,
                        &record.name,
                        "ensure network",
                        self.deploy_budget,
                        async { self.gateway.ensure_network(&self.network).await },
                    )
                    .await;
                if let Err(error) = network {
                    return Err(self.fail_step(&record, error).await);
                }

                let spec = self.container_spec(intent);
                let created = self
                    .timed(
                        &record.owner_id,
                        &record.name,
                        "create container",
                        self.deploy_budget,
                        async { self.gateway.create_container(&spec).await },
                    )
                    .await;
                let created = match created {
                    Ok(created) => created,
                    Err(error) => return Err(self.fail_step(&record, error).await),
                };

                // Recorded before start, so a crash in between leaves a
                // reclaimable container instead of an orphan.
                record = self
                    .registry
                    .record_container_ref(
                        &record.owner_id,
                        &record.name,
                        record.generation,
                        &created,
                    )
                    .await
                    .map_err(|error| {
                        OrchestratorError::from_registry(
                            &record.owner_id,
                            &record.name,
                            "record container",
                            error,
                        )
                    })?;
                created
            }
        };

        let started = self
            .timed(&record.owner_id, &record.name, "start container", self.deploy_budget, async {
                self.gateway.start_container(&container).await
            })
            .await;
        if let Err(error) = started {
            return Err(self.fail_step(&record, error).await);
        }

        self.transition(&record, BotState::Running).await
    }

    fn container_spec(&self, intent: &DeploymentIntent) -> ContainerSpec {
        ContainerSpec {
            name: container_name(&intent.owner_id, &intent.name),
            image: image_tag(&intent.owner_id, &intent.name),
            env: vec![
                ("BOT_TOKEN".to_owned(), intent.bot_token.clone()),
                ("BOT_NAME".to_owned(), SecretString::from(intent.name.as_str())),
            ],
            labels: bot_labels(&intent.owner_id, &intent.name),
            network: self.network.clone(),
        }
    }

    /// Records a broken forward step. `RuntimeFailure` pins the record in
    /// `Failed` with a normalized diagnostic; a `Timeout` leaves it
    /// untouched, since the state it rests in is durably legitimate.
    async fn fail_step(
        &self,
        record: &BotRecord,
        error: OrchestratorError,
    ) -> OrchestratorError {
        if let OrchestratorError::RuntimeFailure { message, operation, .. } = &error {
            let summary = normalize_failure(message);
            let marked = self
                .registry
                .compare_and_transition(
                    &record.owner_id,
                    &record.name,
                    record.generation,
                    BotState::Failed,
                    Some(&summary),
                )
                .await;
            match marked {
                Ok(_) => {
                    info!(
                        event_name = "bot.step_failed",
                        owner = %record.owner_id,
                        bot = %record.name,
                        step = operation,
                        error = %summary,
                    );
                }
                Err(mark_error) => {
                    warn!(
                        event_name = "bot.failure_not_recorded",
                        owner = %record.owner_id,
                        bot = %record.name,
                        step = operation,
                        error = %mark_error,
                    );
                }
            }
        }
        error
    }

    async fn transition(
        &self,
        record: &BotRecord,
        to: BotState,
    ) -> Result<BotRecord, OrchestratorError> {
        let updated = self
            .registry
            .compare_and_transition(&record.owner_id, &record.name, record.generation, to, None)
            .await
            .map_err(|error| {
                OrchestratorError::from_registry(
                    &record.owner_id,
                    &record.name,
                    "advance lifecycle",
                    error,
                )
            })?;
        debug!(
            event_name = "bot.state_changed",
            owner = %updated.owner_id,
            bot = %updated.name,
            from = %record.state,
            to = %updated.state,
            generation = updated.generation,
        );
        self.observer.on_phase(&updated.owner_id, &updated.name, updated.state);
        Ok(updated)
    }

    async fn load(&self, owner: &OwnerId, name: &BotName) -> Result<BotRecord, OrchestratorError> {
        self.registry
            .get(owner, name)
            .await
            .map_err(|error| OrchestratorError::from_registry(owner, name, "load bot", error))
    }

    fn ensure_generation(
        &self,
        record: &BotRecord,
        expected: u32,
    ) -> Result<(), OrchestratorError> {
        if record.generation != expected {
            return Err(OrchestratorError::Conflict {
                owner: record.owner_id.clone(),
                name: record.name.clone(),
                expected,
                current: record.generation,
            });
        }
        Ok(())
    }

    fn ensure_edge(&self, record: &BotRecord, to: BotState) -> Result<(), OrchestratorError> {
        check_transition(record.state, to, record.failed_from).map_err(|transition| {
            OrchestratorError::InvalidTransition {
                owner: record.owner_id.clone(),
                name: record.name.clone(),
                transition,
            }
        })
    }

    fn illegal(&self, record: &BotRecord, to: BotState) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            owner: record.owner_id.clone(),
            name: record.name.clone(),
            transition: InvalidTransition { from: record.state, to },
        }
    }

    fn recorded_container(&self, record: &BotRecord) -> Result<ContainerRef, OrchestratorError> {
        record.container_ref.clone().ok_or_else(|| OrchestratorError::Internal {
            owner: record.owner_id.clone(),
            operation: "resolve container",
            message: format!("bot `{}` has no recorded container", record.name),
        })
    }

    async fn timed<T>(
        &self,
        owner: &OwnerId,
        name: &BotName,
        operation: &'static str,
        budget: Duration,
        task: impl Future<Output = Result<T, RuntimeError>> + Send,
    ) -> Result<T, OrchestratorError> {
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(OrchestratorError::RuntimeFailure {
                owner: owner.clone(),
                name: name.clone(),
                operation,
                message: error.to_string(),
            }),
            Err(_) => Err(OrchestratorError::Timeout {
                owner: owner.clone(),
                name: name.clone(),
                operation,
                budget,
            }),
        }
    }
}

/// Directory slug for a bot inside the bots workspace, aligned with the
/// image and container naming scheme.
fn bot_slug(owner: &OwnerId, name: &BotName) -> String {
    format!("{}-{}", sanitize_component(owner.as_str()), name.as_str())
}

/// Collapses a step diagnostic to one bounded line for `last_error`. Docker
/// build output in particular arrives multi-line and unbounded.
fn normalize_failure(message: &str) -> String {
    const MAX_LEN: usize = 500;

    let mut flat = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        flat = "unspecified failure".to_owned();
    }
    if flat.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !flat.is_char_boundary(end) {
            end -= 1;
        }
        flat.truncate(end);
        flat.push_str("...");
    }
    flat
}
