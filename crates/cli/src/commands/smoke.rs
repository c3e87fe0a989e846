use std::sync::Arc;
use std::time::Instant;

use secrecy::SecretString;
use serde::Serialize;
use tempfile::TempDir;

use botforge_codegen::TemplateGenerator;
use botforge_core::config::{QuotaConfig, RuntimeConfig};
use botforge_core::{DeploymentIntent, Framework, OwnerId};
use botforge_db::registry::InMemoryBotRegistry;
use botforge_orchestrator::Orchestrator;
use botforge_runtime::InMemoryRuntime;

use crate::commands::CommandResult;

/// Syntactically valid placeholder; it only ever reaches the in-memory fakes.
const SMOKE_TOKEN: &str = "123456789:AASmokeTokenPlaceholder";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

struct SmokeEngine {
    orchestrator: Orchestrator<InMemoryBotRegistry, InMemoryRuntime, TemplateGenerator>,
    _bots_dir: TempDir,
}

/// Drives one bot through create, stop, and remove against the in-memory
/// registry and runtime. Proves templates, lifecycle edges, and bookkeeping
/// without a Docker daemon or a database file.
pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "engine_setup",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("create_pipeline"));
            checks.push(skipped("stop_bot"));
            checks.push(skipped("remove_bot"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let setup_started = Instant::now();
    let engine = match build_engine() {
        Ok(engine) => {
            checks.push(SmokeCheck {
                name: "engine_setup",
                status: SmokeStatus::Pass,
                elapsed_ms: setup_started.elapsed().as_millis() as u64,
                message: "in-memory registry, runtime, and generator ready".to_string(),
            });
            engine
        }
        Err(message) => {
            checks.push(SmokeCheck {
                name: "engine_setup",
                status: SmokeStatus::Fail,
                elapsed_ms: setup_started.elapsed().as_millis() as u64,
                message,
            });
            checks.push(skipped("create_pipeline"));
            checks.push(skipped("stop_bot"));
            checks.push(skipped("remove_bot"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let owner = OwnerId::from("smoke");
    let intent = match DeploymentIntent::new(
        owner.clone(),
        "probe",
        "echoes whatever it hears, for pipeline checks",
        Framework::Python,
        SecretString::from(SMOKE_TOKEN),
    ) {
        Ok(intent) => intent,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "create_pipeline",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("sample intent rejected: {error}"),
            });
            checks.push(skipped("stop_bot"));
            checks.push(skipped("remove_bot"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };
    let name = intent.name.clone();

    let create_started = Instant::now();
    let record = match runtime.block_on(engine.orchestrator.create(&intent)) {
        Ok(record) => {
            checks.push(SmokeCheck {
                name: "create_pipeline",
                status: SmokeStatus::Pass,
                elapsed_ms: create_started.elapsed().as_millis() as u64,
                message: format!(
                    "deployed `{name}` to state {} at generation {}",
                    record.state.as_str(),
                    record.generation
                ),
            });
            record
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "create_pipeline",
                status: SmokeStatus::Fail,
                elapsed_ms: create_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("stop_bot"));
            checks.push(skipped("remove_bot"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let stop_started = Instant::now();
    let record = match runtime.block_on(engine.orchestrator.stop(&owner, &name, record.generation))
    {
        Ok(record) => {
            checks.push(SmokeCheck {
                name: "stop_bot",
                status: SmokeStatus::Pass,
                elapsed_ms: stop_started.elapsed().as_millis() as u64,
                message: "container stopped and record parked".to_string(),
            });
            record
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "stop_bot",
                status: SmokeStatus::Fail,
                elapsed_ms: stop_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("remove_bot"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let remove_started = Instant::now();
    match runtime.block_on(engine.orchestrator.remove(&owner, &name, record.generation)) {
        Ok(_) => checks.push(SmokeCheck {
            name: "remove_bot",
            status: SmokeStatus::Pass,
            elapsed_ms: remove_started.elapsed().as_millis() as u64,
            message: format!("container and image removed; `{name}` is free for reuse"),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "remove_bot",
            status: SmokeStatus::Fail,
            elapsed_ms: remove_started.elapsed().as_millis() as u64,
            message: error.to_string(),
        }),
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

fn build_engine() -> Result<SmokeEngine, String> {
    let bots_dir = TempDir::new().map_err(|error| format!("temp workspace: {error}"))?;
    let generator =
        TemplateGenerator::new().map_err(|error| format!("template compile: {error}"))?;

    let runtime = RuntimeConfig {
        bots_dir: bots_dir.path().to_path_buf(),
        docker_network: "botforge-smoke".to_owned(),
        stop_grace_secs: 1,
        generate_timeout_secs: 10,
        build_timeout_secs: 10,
        deploy_timeout_secs: 10,
        probe_timeout_secs: 2,
    };
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryBotRegistry::new()),
        Arc::new(InMemoryRuntime::new()),
        Arc::new(generator),
        &runtime,
        &QuotaConfig { max_bots_per_owner: 2 },
    );

    Ok(SmokeEngine { orchestrator, _bots_dir: bots_dir })
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due to a previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
