use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::validate_bot_token;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub runtime: RuntimeConfig,
    pub quota: QuotaConfig,
    pub reconciler: ReconcilerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    /// Token of the factory's own front-door bot. Absent means the server
    /// runs without a chat transport (health endpoint and CLI still work).
    pub bot_token: Option<SecretString>,
    pub poll_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Where generated bot source trees are materialized before image build.
    pub bots_dir: PathBuf,
    pub docker_network: String,
    pub stop_grace_secs: u64,
    pub generate_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct QuotaConfig {
    pub max_bots_per_owner: u32,
}

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// How long a record may sit in `deploying` before it is failed.
    pub deploy_timeout_secs: u64,
    /// How long a record may sit in `draft`/`generating`/`building` before
    /// it is failed as abandoned.
    pub stale_step_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub bots_dir: Option<PathBuf>,
    pub max_bots_per_owner: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://botforge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig { bot_token: None, poll_timeout_secs: 30 },
            runtime: RuntimeConfig {
                bots_dir: PathBuf::from("./bots"),
                docker_network: "botforge".to_string(),
                stop_grace_secs: 10,
                generate_timeout_secs: 120,
                build_timeout_secs: 600,
                deploy_timeout_secs: 120,
                probe_timeout_secs: 5,
            },
            quota: QuotaConfig { max_bots_per_owner: 10 },
            reconciler: ReconcilerConfig {
                interval_secs: 30,
                deploy_timeout_secs: 300,
                stale_step_timeout_secs: 900,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("botforge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(token_value) = telegram.bot_token {
                self.telegram.bot_token = Some(secret_value(token_value));
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(runtime) = patch.runtime {
            if let Some(bots_dir) = runtime.bots_dir {
                self.runtime.bots_dir = PathBuf::from(bots_dir);
            }
            if let Some(docker_network) = runtime.docker_network {
                self.runtime.docker_network = docker_network;
            }
            if let Some(stop_grace_secs) = runtime.stop_grace_secs {
                self.runtime.stop_grace_secs = stop_grace_secs;
            }
            if let Some(generate_timeout_secs) = runtime.generate_timeout_secs {
                self.runtime.generate_timeout_secs = generate_timeout_secs;
            }
            if let Some(build_timeout_secs) = runtime.build_timeout_secs {
                self.runtime.build_timeout_secs = build_timeout_secs;
            }
            if let Some(deploy_timeout_secs) = runtime.deploy_timeout_secs {
                self.runtime.deploy_timeout_secs = deploy_timeout_secs;
            }
            if let Some(probe_timeout_secs) = runtime.probe_timeout_secs {
                self.runtime.probe_timeout_secs = probe_timeout_secs;
            }
        }

        if let Some(quota) = patch.quota {
            if let Some(max_bots_per_owner) = quota.max_bots_per_owner {
                self.quota.max_bots_per_owner = max_bots_per_owner;
            }
        }

        if let Some(reconciler) = patch.reconciler {
            if let Some(interval_secs) = reconciler.interval_secs {
                self.reconciler.interval_secs = interval_secs;
            }
            if let Some(deploy_timeout_secs) = reconciler.deploy_timeout_secs {
                self.reconciler.deploy_timeout_secs = deploy_timeout_secs;
            }
            if let Some(stale_step_timeout_secs) = reconciler.stale_step_timeout_secs {
                self.reconciler.stale_step_timeout_secs = stale_step_timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BOTFORGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BOTFORGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("BOTFORGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BOTFORGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFORGE_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOTFORGE_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_u64("BOTFORGE_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFORGE_RUNTIME_BOTS_DIR") {
            self.runtime.bots_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_DOCKER_NETWORK") {
            self.runtime.docker_network = value;
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_STOP_GRACE_SECS") {
            self.runtime.stop_grace_secs = parse_u64("BOTFORGE_RUNTIME_STOP_GRACE_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_GENERATE_TIMEOUT_SECS") {
            self.runtime.generate_timeout_secs =
                parse_u64("BOTFORGE_RUNTIME_GENERATE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_BUILD_TIMEOUT_SECS") {
            self.runtime.build_timeout_secs =
                parse_u64("BOTFORGE_RUNTIME_BUILD_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_DEPLOY_TIMEOUT_SECS") {
            self.runtime.deploy_timeout_secs =
                parse_u64("BOTFORGE_RUNTIME_DEPLOY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RUNTIME_PROBE_TIMEOUT_SECS") {
            self.runtime.probe_timeout_secs =
                parse_u64("BOTFORGE_RUNTIME_PROBE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER") {
            self.quota.max_bots_per_owner =
                parse_u32("BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER", &value)?;
        }

        if let Some(value) = read_env("BOTFORGE_RECONCILER_INTERVAL_SECS") {
            self.reconciler.interval_secs =
                parse_u64("BOTFORGE_RECONCILER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RECONCILER_DEPLOY_TIMEOUT_SECS") {
            self.reconciler.deploy_timeout_secs =
                parse_u64("BOTFORGE_RECONCILER_DEPLOY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_RECONCILER_STALE_STEP_TIMEOUT_SECS") {
            self.reconciler.stale_step_timeout_secs =
                parse_u64("BOTFORGE_RECONCILER_STALE_STEP_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFORGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BOTFORGE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("BOTFORGE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("BOTFORGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BOTFORGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("BOTFORGE_LOGGING_LEVEL").or_else(|| read_env("BOTFORGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BOTFORGE_LOGGING_FORMAT").or_else(|| read_env("BOTFORGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(telegram_bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = Some(secret_value(telegram_bot_token));
        }
        if let Some(bots_dir) = overrides.bots_dir {
            self.runtime.bots_dir = bots_dir;
        }
        if let Some(max_bots_per_owner) = overrides.max_bots_per_owner {
            self.quota.max_bots_per_owner = max_bots_per_owner;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_runtime(&self.runtime)?;
        validate_quota(&self.quota)?;
        validate_reconciler(&self.reconciler)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    if let Some(path) = env::var_os("BOTFORGE_CONFIG").map(PathBuf::from) {
        return path.exists().then_some(path);
    }

    [PathBuf::from("botforge.toml"), PathBuf::from("config/botforge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if let Some(token) = &telegram.bot_token {
        if validate_bot_token(token.expose_secret()).is_err() {
            return Err(ConfigError::Validation(
                "telegram.bot_token does not look like a BotFather token (`<id>:<secret>`)"
                    .to_string(),
            ));
        }
    }

    // Telegram caps getUpdates long-poll timeouts at 50 seconds.
    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 50 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=50".to_string(),
        ));
    }

    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.bots_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("runtime.bots_dir must not be empty".to_string()));
    }

    let network = runtime.docker_network.trim();
    if network.is_empty() {
        return Err(ConfigError::Validation(
            "runtime.docker_network must not be empty".to_string(),
        ));
    }
    if !network.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
        return Err(ConfigError::Validation(
            "runtime.docker_network may contain only letters, digits, `_`, and `-`".to_string(),
        ));
    }

    if runtime.stop_grace_secs == 0 || runtime.stop_grace_secs > 120 {
        return Err(ConfigError::Validation(
            "runtime.stop_grace_secs must be in range 1..=120".to_string(),
        ));
    }
    if runtime.generate_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "runtime.generate_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if runtime.build_timeout_secs == 0 || runtime.build_timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "runtime.build_timeout_secs must be in range 1..=3600".to_string(),
        ));
    }
    if runtime.deploy_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "runtime.deploy_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if runtime.probe_timeout_secs == 0 || runtime.probe_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "runtime.probe_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_quota(quota: &QuotaConfig) -> Result<(), ConfigError> {
    if quota.max_bots_per_owner == 0 || quota.max_bots_per_owner > 100 {
        return Err(ConfigError::Validation(
            "quota.max_bots_per_owner must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_reconciler(reconciler: &ReconcilerConfig) -> Result<(), ConfigError> {
    if reconciler.interval_secs == 0 || reconciler.interval_secs > 3600 {
        return Err(ConfigError::Validation(
            "reconciler.interval_secs must be in range 1..=3600".to_string(),
        ));
    }
    if reconciler.deploy_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "reconciler.deploy_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if reconciler.stale_step_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "reconciler.stale_step_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    runtime: Option<RuntimePatch>,
    quota: Option<QuotaPatch>,
    reconciler: Option<ReconcilerPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    bots_dir: Option<String>,
    docker_network: Option<String>,
    stop_grace_secs: Option<u64>,
    generate_timeout_secs: Option<u64>,
    build_timeout_secs: Option<u64>,
    deploy_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotaPatch {
    max_bots_per_owner: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconcilerPatch {
    interval_secs: Option<u64>,
    deploy_timeout_secs: Option<u64>,
    stale_step_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_a_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.telegram.bot_token.is_none(), "default config should carry no token")?;
        ensure(config.quota.max_bots_per_owner == 10, "default quota should be ten")?;
        ensure(config.reconciler.interval_secs == 30, "default reconcile interval is 30s")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FACTORY_BOT_TOKEN", "123456789:AAFactoryTokenValue");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("botforge.toml");
            fs::write(
                &path,
                r#"
[telegram]
bot_token = "${TEST_FACTORY_BOT_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config
                .telegram
                .bot_token
                .as_ref()
                .ok_or_else(|| "token should be present".to_string())?;
            ensure(
                token.expose_secret() == "123456789:AAFactoryTokenValue",
                "token should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_FACTORY_BOT_TOKEN"]);
        result
    }

    #[test]
    fn config_file_can_be_pointed_at_by_environment() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("factory.toml");
            fs::write(
                &path,
                r#"
[quota]
max_bots_per_owner = 4
"#,
            )
            .map_err(|err| err.to_string())?;

            env::set_var("BOTFORGE_CONFIG", &path);

            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.quota.max_bots_per_owner == 4,
                "quota should come from the file behind BOTFORGE_CONFIG",
            )?;
            Ok(())
        })();

        clear_vars(&["BOTFORGE_CONFIG"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFORGE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("botforge.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[quota]
max_bots_per_owner = 3

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.quota.max_bots_per_owner == 7,
                "env quota should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["BOTFORGE_DATABASE_URL", "BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER"]);
        result
    }

    #[test]
    fn malformed_token_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFORGE_TELEGRAM_BOT_TOKEN", "not-a-token");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Ok(_) => Err("expected validation failure but config load succeeded".to_string()),
                Err(ConfigError::Validation(message)) => ensure(
                    message.contains("telegram.bot_token"),
                    "validation error should name the offending key",
                ),
                Err(other) => Err(format!("unexpected error kind: {other}")),
            }
        })();

        clear_vars(&["BOTFORGE_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn zero_quota_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER", "0");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Ok(_) => Err("zero quota should not validate".to_string()),
                Err(ConfigError::Validation(message)) => ensure(
                    message.contains("quota.max_bots_per_owner"),
                    "validation error should name the quota key",
                ),
                Err(other) => Err(format!("unexpected error kind: {other}")),
            }
        })();

        clear_vars(&["BOTFORGE_QUOTA_MAX_BOTS_PER_OWNER"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFORGE_LOG_LEVEL", "warn");
        env::set_var("BOTFORGE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["BOTFORGE_LOG_LEVEL", "BOTFORGE_LOG_FORMAT"]);
        result
    }
}
