use std::env;
use std::sync::{Mutex, OnceLock};

use botforge_cli::commands::{config, doctor, migrate, smoke};
use serde_json::Value;

#[test]
fn migrate_applies_pending_migrations_against_memory_database() {
    with_env(&[("BOTFORGE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_config_failure_with_malformed_token() {
    with_env(
        &[
            ("BOTFORGE_DATABASE_URL", "sqlite::memory:"),
            ("BOTFORGE_TELEGRAM_BOT_TOKEN", "not-a-token"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn smoke_drives_the_pipeline_to_a_passing_report() {
    let result = smoke::run();
    assert_eq!(result.exit_code, 0, "expected passing smoke report: {}", result.output);

    let payload = parse_payload(last_line(&result.output));
    assert_eq!(payload["command"], "smoke");
    assert_eq!(payload["status"], "pass");

    for name in ["engine_setup", "create_pipeline", "stop_bot", "remove_bot"] {
        assert_eq!(check(&payload, name)["status"], "pass", "check {name} should pass");
    }
}

#[test]
fn smoke_ignores_broken_configuration() {
    // The pipeline run is hermetic; a bad environment must not reach it.
    with_env(&[("BOTFORGE_TELEGRAM_BOT_TOKEN", "not-a-token")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "smoke should not consult config: {}", result.output);
    });
}

#[test]
fn doctor_json_covers_all_readiness_checks() {
    with_env(&[("BOTFORGE_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        let payload = parse_payload(&result.output);

        assert_eq!(check(&payload, "config_validation")["status"], "pass");
        assert_eq!(check(&payload, "database_connectivity")["status"], "pass");
        assert_eq!(check(&payload, "template_rendering")["status"], "pass");
        // The daemon check reflects the host; only its presence is stable.
        let docker = check(&payload, "docker_daemon");
        assert!(docker["status"] == "pass" || docker["status"] == "fail");
    });
}

#[test]
fn doctor_human_output_lists_checks_with_markers() {
    with_env(&[("BOTFORGE_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(false);
        assert!(result.output.contains("- [ok] config_validation:"), "got {}", result.output);
        assert!(result.output.contains("template_rendering"), "got {}", result.output);
    });
}

#[test]
fn doctor_fails_and_skips_database_when_config_is_invalid() {
    with_env(&[("BOTFORGE_TELEGRAM_BOT_TOKEN", "not-a-token")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 7, "expected doctor failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(check(&payload, "config_validation")["status"], "fail");
        assert_eq!(check(&payload, "database_connectivity")["status"], "skipped");
    });
}

#[test]
fn config_attributes_sources_and_redacts_the_token() {
    with_env(
        &[
            ("BOTFORGE_DATABASE_URL", "sqlite::memory:"),
            ("BOTFORGE_TELEGRAM_BOT_TOKEN", "123456789:AAVerySecretFactoryToken"),
        ],
        || {
            let output = config::run();
            let url_line = "- database.url = sqlite::memory: (source: env (BOTFORGE_DATABASE_URL))";
            assert!(output.contains(url_line), "got {output}");
            assert!(output.contains("- telegram.bot_token = 123456789:***"), "got {output}");
            assert!(!output.contains("AAVerySecretFactoryToken"), "secret leaked: {output}");
            assert!(output.contains("- quota.max_bots_per_owner = 10 (source: default)"));
        },
    );
}

#[test]
fn config_reports_an_unset_token() {
    with_env(&[("BOTFORGE_DATABASE_URL", "sqlite::memory:")], || {
        let output = config::run();
        assert!(output.contains("- telegram.bot_token = <unset>"), "got {output}");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .expect("checks array")
        .iter()
        .find(|check| check["name"] == name)
        .unwrap_or_else(|| panic!("missing check {name}"))
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "BOTFORGE_CONFIG",
        "BOTFORGE_DATABASE_URL",
        "BOTFORGE_DATABASE_MAX_CONNECTIONS",
        "BOTFORGE_DATABASE_TIMEOUT_SECS",
        "BOTFORGE_TELEGRAM_BOT_TOKEN",
        "BOTFORGE_TELEGRAM_POLL_TIMEOUT_SECS",
        "BOTFORGE_RUNTIME_BOTS_DIR",
        "BOTFORGE_RUNTIME_DOCKER_NETWORK",
        "BOTFORGE_RUNTIME_STOP_GRACE_SECS",
        "BOTFORGE_RUNTIME_GENERATE_TIMEOUT_SECS",
        "BOTFORGE_RUNTIME_BUILD_TIMEOUT_SECS",
        "BOTFORGE_RUNTIME_DEPLOY_TIMEOUT_SECS",
        "BOTFORGE_RUNTIME_PROBE_TIMEOUT_SECS",
        "BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER",
        "BOTFORGE_RECONCILER_INTERVAL_SECS",
        "BOTFORGE_RECONCILER_DEPLOY_TIMEOUT_SECS",
        "BOTFORGE_RECONCILER_STALE_STEP_TIMEOUT_SECS",
        "BOTFORGE_SERVER_BIND_ADDRESS",
        "BOTFORGE_SERVER_HEALTH_CHECK_PORT",
        "BOTFORGE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "BOTFORGE_LOGGING_LEVEL",
        "BOTFORGE_LOGGING_FORMAT",
        "BOTFORGE_LOG_LEVEL",
        "BOTFORGE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
