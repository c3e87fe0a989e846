use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use botforge_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut out = Effective::new();

    out.push("database.url", &config.database.url);
    out.push("database.max_connections", config.database.max_connections.to_string());
    out.push("database.timeout_secs", config.database.timeout_secs.to_string());

    let token = match &config.telegram.bot_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };
    out.push("telegram.bot_token", token);
    out.push("telegram.poll_timeout_secs", config.telegram.poll_timeout_secs.to_string());

    out.push("runtime.bots_dir", config.runtime.bots_dir.display().to_string());
    out.push("runtime.docker_network", &config.runtime.docker_network);
    out.push("runtime.stop_grace_secs", config.runtime.stop_grace_secs.to_string());
    out.push("runtime.generate_timeout_secs", config.runtime.generate_timeout_secs.to_string());
    out.push("runtime.build_timeout_secs", config.runtime.build_timeout_secs.to_string());
    out.push("runtime.deploy_timeout_secs", config.runtime.deploy_timeout_secs.to_string());
    out.push("runtime.probe_timeout_secs", config.runtime.probe_timeout_secs.to_string());

    out.push("quota.max_bots_per_owner", config.quota.max_bots_per_owner.to_string());

    out.push("reconciler.interval_secs", config.reconciler.interval_secs.to_string());
    out.push("reconciler.deploy_timeout_secs", config.reconciler.deploy_timeout_secs.to_string());
    out.push(
        "reconciler.stale_step_timeout_secs",
        config.reconciler.stale_step_timeout_secs.to_string(),
    );

    out.push("server.bind_address", &config.server.bind_address);
    out.push("server.health_check_port", config.server.health_check_port.to_string());
    out.push("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string());

    out.push("logging.level", &config.logging.level);
    out.push("logging.format", format!("{:?}", config.logging.format));

    out.finish()
}

/// Renders `key = value (source: ...)` lines, attributing each value to the
/// environment, the config file, or the built-in default.
struct Effective {
    doc: Option<Value>,
    path: Option<PathBuf>,
    lines: Vec<String>,
}

impl Effective {
    fn new() -> Self {
        let path = detect_config_path();
        let doc = load_config_file_doc(path.as_deref());
        let header = "effective config (source precedence: env > file > default):".to_string();
        Self { doc, path, lines: vec![header] }
    }

    fn push(&mut self, key: &str, value: impl AsRef<str>) {
        let source = self.field_source(key);
        self.lines.push(format!("- {key} = {} (source: {source})", value.as_ref()));
    }

    fn field_source(&self, key_path: &str) -> String {
        let primary = env_key(key_path);
        if env::var_os(&primary).is_some() {
            return format!("env ({primary})");
        }

        // logging.* also answers to the short BOTFORGE_LOG_* aliases.
        if let Some(field) = key_path.strip_prefix("logging.") {
            let alias = format!("BOTFORGE_LOG_{}", field.to_uppercase());
            if env::var_os(&alias).is_some() {
                return format!("env ({alias})");
            }
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }
}

fn env_key(key_path: &str) -> String {
    format!("BOTFORGE_{}", key_path.replace('.', "_").to_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os("BOTFORGE_CONFIG").map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
    }

    let root = PathBuf::from("botforge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/botforge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// The numeric id ahead of the colon doubles as the bot's public identity;
/// only the secret half needs hiding.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once(':') {
        Some((id, _)) => format!("{id}:***"),
        None => "<redacted>".to_string(),
    }
}
