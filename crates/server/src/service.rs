//! Bridges the chat surface to the lifecycle engine. This is the only place
//! that sees `OrchestratorError`; everything it hands back to the router is
//! finished MarkdownV2 text.

use std::sync::Arc;

use async_trait::async_trait;

use botforge_core::{BotName, BotRecord, DeploymentIntent, OwnerId, SourceGenerator};
use botforge_db::registry::BotRegistry;
use botforge_orchestrator::{Orchestrator, OrchestratorError};
use botforge_runtime::RuntimeGateway;
use botforge_telegram::format;
use botforge_telegram::{BotCommandService, ChatContext, CommandRouteError, CreateRequest};

/// Log lines returned by `/logs`.
const LOG_TAIL: u32 = 50;

pub struct OrchestratorCommandService<R, G, S> {
    orchestrator: Arc<Orchestrator<R, G, S>>,
}

impl<R, G, S> OrchestratorCommandService<R, G, S>
where
    R: BotRegistry,
    G: RuntimeGateway,
    S: SourceGenerator,
{
    pub fn new(orchestrator: Arc<Orchestrator<R, G, S>>) -> Self {
        Self { orchestrator }
    }

    /// Each Telegram account owns its own fleet; the sender id is the owner
    /// key, so the same name can exist under different accounts.
    fn owner(chat: &ChatContext) -> OwnerId {
        OwnerId(chat.sender_id.to_string())
    }

    /// Loads the live record so the command can pass the generation it acted
    /// on. A write that lands between this read and the engine call comes
    /// back as a conflict instead of silently clobbering it.
    async fn resolve(
        &self,
        owner: &OwnerId,
        name: &BotName,
    ) -> Result<BotRecord, OrchestratorError> {
        let bots = self.orchestrator.list(owner).await?;
        bots.into_iter().find(|bot| bot.name == *name).ok_or_else(|| {
            OrchestratorError::NotFound { owner: owner.clone(), name: name.clone() }
        })
    }
}

/// Maps engine errors onto chat replies. Domain refusals become `Ok` text the
/// user can act on; only `Internal` escapes as a routing error, which the
/// runner logs and answers with a generic apology.
fn render_error(error: OrchestratorError) -> Result<String, CommandRouteError> {
    let retryable = error.is_retryable();
    let summary = match &error {
        OrchestratorError::AlreadyExists { name, .. } => {
            format!("You already have a bot named {name}. Pick another name or /remove it first.")
        }
        OrchestratorError::QuotaExceeded { limit, count, .. } => {
            format!("You are at your bot limit ({count}/{limit}). Remove one to make room.")
        }
        OrchestratorError::NotFound { name, .. } => {
            format!("You don't have a bot named {name}. Send /list to see yours.")
        }
        OrchestratorError::Conflict { name, .. } => {
            format!("{name} changed while your command was in flight.")
        }
        OrchestratorError::InvalidTransition { name, transition, .. } => {
            format!(
                "{name} is {} right now, so that command doesn't apply. Try /status {name}.",
                format::state_label(transition.from)
            )
        }
        OrchestratorError::RuntimeFailure { operation, message, .. } => {
            format!("Could not {operation}: {message}")
        }
        OrchestratorError::Timeout { operation, budget, .. } => {
            format!("Gave up waiting for {operation} after {budget:?}.")
        }
        OrchestratorError::Internal { .. } => {
            return Err(CommandRouteError::Service(error.to_string()));
        }
    };
    Ok(format::error_message(&summary, retryable))
}

/// A name that fails validation cannot exist in the registry, so the answer
/// is the validation detail rather than a not-found lookup.
fn parse_name(raw: &str) -> Result<BotName, String> {
    BotName::parse(raw).map_err(|error| format::error_message(&error.to_string(), false))
}

#[async_trait]
impl<R, G, S> BotCommandService for OrchestratorCommandService<R, G, S>
where
    R: BotRegistry,
    G: RuntimeGateway,
    S: SourceGenerator,
{
    async fn create_bot(
        &self,
        chat: &ChatContext,
        request: CreateRequest,
    ) -> Result<String, CommandRouteError> {
        let intent = DeploymentIntent {
            owner_id: Self::owner(chat),
            name: request.name,
            description: request.description,
            framework: request.framework,
            bot_token: request.bot_token,
        };
        match self.orchestrator.create(&intent).await {
            Ok(record) => Ok(format::deploy_success(&record)),
            Err(error) => render_error(error),
        }
    }

    async fn list_bots(&self, chat: &ChatContext) -> Result<String, CommandRouteError> {
        match self.orchestrator.list(&Self::owner(chat)).await {
            Ok(bots) => Ok(format::bot_list(&bots)),
            Err(error) => render_error(error),
        }
    }

    async fn bot_status(
        &self,
        chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        match self.orchestrator.status(&Self::owner(chat), &name).await {
            Ok(view) => Ok(format::status_view(&view)),
            Err(error) => render_error(error),
        }
    }

    async fn start_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        let owner = Self::owner(chat);
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        let record = match self.resolve(&owner, &name).await {
            Ok(record) => record,
            Err(error) => return render_error(error),
        };
        match self.orchestrator.start(&owner, &name, record.generation).await {
            Ok(record) => Ok(format::started_message(record.name.as_str())),
            Err(error) => render_error(error),
        }
    }

    async fn stop_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        let owner = Self::owner(chat);
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        let record = match self.resolve(&owner, &name).await {
            Ok(record) => record,
            Err(error) => return render_error(error),
        };
        match self.orchestrator.stop(&owner, &name, record.generation).await {
            Ok(record) => Ok(format::stopped_message(record.name.as_str())),
            Err(error) => render_error(error),
        }
    }

    async fn remove_bot(
        &self,
        chat: &ChatContext,
        name: &str,
    ) -> Result<String, CommandRouteError> {
        let owner = Self::owner(chat);
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        let record = match self.resolve(&owner, &name).await {
            Ok(record) => record,
            Err(error) => return render_error(error),
        };
        match self.orchestrator.remove(&owner, &name, record.generation).await {
            Ok(record) => Ok(format::removed_message(record.name.as_str())),
            Err(error) => render_error(error),
        }
    }

    async fn retry_bot(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        let owner = Self::owner(chat);
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        let record = match self.resolve(&owner, &name).await {
            Ok(record) => record,
            Err(error) => return render_error(error),
        };
        match self.orchestrator.retry(&owner, &name, record.generation).await {
            Ok(record) => Ok(format::deploy_success(&record)),
            Err(error) => render_error(error),
        }
    }

    async fn bot_logs(&self, chat: &ChatContext, name: &str) -> Result<String, CommandRouteError> {
        let name = match parse_name(name) {
            Ok(name) => name,
            Err(reply) => return Ok(reply),
        };
        match self.orchestrator.logs(&Self::owner(chat), &name, LOG_TAIL).await {
            Ok(lines) => Ok(format::logs_message(name.as_str(), &lines)),
            Err(error) => render_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;
    use tempfile::TempDir;

    use botforge_codegen::TemplateGenerator;
    use botforge_core::config::{QuotaConfig, RuntimeConfig};
    use botforge_core::{BotName, Framework};
    use botforge_db::registry::InMemoryBotRegistry;
    use botforge_orchestrator::Orchestrator;
    use botforge_runtime::InMemoryRuntime;
    use botforge_telegram::{BotCommandService, ChatContext, CreateRequest};

    use super::OrchestratorCommandService;

    const TOKEN: &str = "123456789:AAFakeTokenValue42";

    type ChatService =
        OrchestratorCommandService<InMemoryBotRegistry, InMemoryRuntime, TemplateGenerator>;

    struct Harness {
        service: ChatService,
        _bots_dir: TempDir,
    }

    fn harness(max_bots_per_owner: u32) -> Harness {
        let registry = Arc::new(InMemoryBotRegistry::new());
        let gateway = Arc::new(InMemoryRuntime::new());
        let generator = Arc::new(TemplateGenerator::new().expect("templates compile"));
        let bots_dir = TempDir::new().expect("tempdir");

        let runtime = RuntimeConfig {
            bots_dir: bots_dir.path().to_path_buf(),
            docker_network: "botforge-test".to_owned(),
            stop_grace_secs: 1,
            generate_timeout_secs: 10,
            build_timeout_secs: 10,
            deploy_timeout_secs: 10,
            probe_timeout_secs: 2,
        };
        let quota = QuotaConfig { max_bots_per_owner };
        let orchestrator =
            Arc::new(Orchestrator::new(registry, gateway, generator, &runtime, &quota));

        Harness { service: OrchestratorCommandService::new(orchestrator), _bots_dir: bots_dir }
    }

    fn chat() -> ChatContext {
        ChatContext { chat_id: 7001, sender_id: 42 }
    }

    fn request(name: &str, description: &str) -> CreateRequest {
        CreateRequest {
            description: description.to_owned(),
            name: BotName::parse(name).expect("valid name"),
            framework: Framework::Python,
            bot_token: SecretString::from(TOKEN),
        }
    }

    #[tokio::test]
    async fn create_then_list_reads_back_the_running_bot() {
        let h = harness(10);
        let chat = chat();

        let reply = h
            .service
            .create_bot(&chat, request("tracker", "tracks my habits and nags me nightly"))
            .await
            .expect("create reply");
        assert!(reply.contains("*tracker* deployed"), "got {reply}");

        let listing = h.service.list_bots(&chat).await.expect("list reply");
        assert!(listing.contains("🟢 *tracker*"), "got {listing}");
    }

    #[tokio::test]
    async fn duplicate_names_and_quota_come_back_as_explanations() {
        let h = harness(1);
        let chat = chat();
        h.service
            .create_bot(&chat, request("tracker", "tracks my habits and nags me nightly"))
            .await
            .expect("first create");

        let duplicate = h
            .service
            .create_bot(&chat, request("tracker", "tracks my habits and nags me nightly"))
            .await
            .expect("refusal is a reply, not an error");
        assert!(duplicate.contains("already have a bot named tracker"), "got {duplicate}");

        let full = h
            .service
            .create_bot(&chat, request("other", "reminds me to stretch every hour or so"))
            .await
            .expect("quota refusal is a reply");
        assert!(full.contains(r"bot limit \(1/1\)"), "got {full}");
    }

    #[tokio::test]
    async fn lifecycle_commands_act_on_the_live_generation() {
        let h = harness(10);
        let chat = chat();
        h.service
            .create_bot(&chat, request("echoer", "repeats whatever anyone says back"))
            .await
            .expect("create");

        let stopped = h.service.stop_bot(&chat, "echoer").await.expect("stop");
        assert!(stopped.contains("*echoer* stopped"), "got {stopped}");

        let started = h.service.start_bot(&chat, "echoer").await.expect("start");
        assert!(started.contains("*echoer* is running again"), "got {started}");

        h.service.stop_bot(&chat, "echoer").await.expect("stop again");
        let removed = h.service.remove_bot(&chat, "echoer").await.expect("remove");
        assert!(removed.contains("*echoer* removed"), "got {removed}");

        let listing = h.service.list_bots(&chat).await.expect("list");
        assert!(listing.contains("don't have any bots"), "got {listing}");
    }

    #[tokio::test]
    async fn commands_that_do_not_apply_name_the_current_state() {
        let h = harness(10);
        let chat = chat();
        h.service
            .create_bot(&chat, request("echoer", "repeats whatever anyone says back"))
            .await
            .expect("create");

        let reply = h.service.start_bot(&chat, "echoer").await.expect("refusal is a reply");
        assert!(reply.contains("echoer is Running right now"), "got {reply}");
    }

    #[tokio::test]
    async fn missing_and_malformed_names_explain_themselves() {
        let h = harness(10);
        let chat = chat();

        let missing = h.service.bot_status(&chat, "ghost").await.expect("reply");
        assert!(missing.contains("don't have a bot named ghost"), "got {missing}");

        let malformed = h.service.stop_bot(&chat, "x").await.expect("reply");
        assert!(malformed.contains("3 to 32 characters"), "got {malformed}");
    }

    #[tokio::test]
    async fn status_and_logs_reflect_the_deployed_container() {
        let h = harness(10);
        let chat = chat();
        h.service
            .create_bot(&chat, request("tracker", "tracks my habits and nags me nightly"))
            .await
            .expect("create");

        let status = h.service.bot_status(&chat, "tracker").await.expect("status");
        assert!(status.contains("State: Running"), "got {status}");
        assert!(status.contains("Runtime: running"), "got {status}");

        let logs = h.service.bot_logs(&chat, "tracker").await.expect("logs");
        assert!(logs.contains("```"), "got {logs}");
        assert!(logs.contains("bot started"), "got {logs}");
    }

    #[tokio::test]
    async fn owners_are_keyed_by_sender_not_chat() {
        let h = harness(10);
        let alice = ChatContext { chat_id: 1, sender_id: 100 };
        let bob = ChatContext { chat_id: 1, sender_id: 200 };

        h.service
            .create_bot(&alice, request("tracker", "tracks my habits and nags me nightly"))
            .await
            .expect("create");

        let owned = h.service.list_bots(&alice).await.expect("list");
        assert!(owned.contains("tracker"), "got {owned}");

        let empty = h.service.list_bots(&bob).await.expect("list");
        assert!(empty.contains("don't have any bots"), "got {empty}");
    }
}
