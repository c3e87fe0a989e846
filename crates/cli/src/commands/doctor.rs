use secrecy::SecretString;
use serde::Serialize;
use tokio::runtime::Runtime;

use botforge_codegen::TemplateGenerator;
use botforge_core::config::{AppConfig, LoadOptions};
use botforge_core::{DeploymentIntent, Framework, OwnerId, SourceGenerator};
use botforge_db::connect_with_settings;
use botforge_runtime::{DockerGateway, RuntimeGateway};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 7 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            None
        }
    };

    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => {
            match &config {
                Some(config) => checks.push(check_database_connectivity(&runtime, config)),
                None => checks.push(DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                }),
            }
            checks.push(check_docker_daemon(&runtime));
            checks.push(check_template_rendering(&runtime));
        }
        Err(error) => {
            for name in ["database_connectivity", "docker_daemon", "template_rendering"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database_connectivity(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_docker_daemon(runtime: &Runtime) -> DoctorCheck {
    let result =
        DockerGateway::connect().map(|gateway| runtime.block_on(async { gateway.ping().await }));

    match result {
        Ok(Ok(())) => DoctorCheck {
            name: "docker_daemon",
            status: CheckStatus::Pass,
            details: "daemon responded to ping".to_string(),
        },
        Ok(Err(error)) | Err(error) => DoctorCheck {
            name: "docker_daemon",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_template_rendering(runtime: &Runtime) -> DoctorCheck {
    let generator = match TemplateGenerator::new() {
        Ok(generator) => generator,
        Err(error) => {
            return DoctorCheck {
                name: "template_rendering",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let intent = match DeploymentIntent::new(
        OwnerId::from("doctor"),
        "probe",
        "renders the stock templates end to end",
        Framework::Python,
        SecretString::from("123456789:AADoctorPlaceholder0"),
    ) {
        Ok(intent) => intent,
        Err(error) => {
            return DoctorCheck {
                name: "template_rendering",
                status: CheckStatus::Fail,
                details: format!("sample intent rejected: {error}"),
            };
        }
    };

    match runtime.block_on(generator.generate(&intent)) {
        Ok(source) => DoctorCheck {
            name: "template_rendering",
            status: CheckStatus::Pass,
            details: format!("rendered {} files for a sample python bot", source.len()),
        },
        Err(error) => DoctorCheck {
            name: "template_rendering",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
