//! Configuration management.

use crate::email::SmtpSettings;
use crate::mcp::{RetentionPolicy, TransportSettings};
use anyhow::Context;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".mcp-sendmail.toml";

/// Prefix of environment variables, e.g. `MCP_SENDMAIL_SERVER__PORT`.
pub const ENV_PREFIX: &str = "MCP_SENDMAIL_";

/// Unprefixed SMTP variables that map onto the `smtp` section.
const LEGACY_SMTP_VARS: &[&str] = &["host", "port", "user", "password", "use_tls"];

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
struct ConfigFile {
    #[serde(default)]
    #[garde(skip)]
    server: ServerConfig,
    #[serde(default)]
    #[garde(dive)]
    sessions: SessionsConfig,
    #[serde(default)]
    #[garde(skip)]
    smtp: SmtpConfig,
    #[serde(default)]
    #[garde(skip)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// Empty means any origin is allowed.
    #[serde(default)]
    cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct SessionsConfig {
    #[serde(default = "default_idle_timeout_secs")]
    #[garde(range(min = 1))]
    idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    #[garde(range(min = 1))]
    sweep_interval_secs: u64,
    #[serde(default = "default_max_events")]
    #[garde(range(min = 1))]
    max_events: usize,
    #[serde(default = "default_resume_window_secs")]
    #[garde(skip)]
    resume_window_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_events: default_max_events(),
            resume_window_secs: default_resume_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    host: String,
    #[serde(default = "default_smtp_port")]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    /// Unset means auto-detect from the port.
    #[serde(default)]
    use_tls: Option<bool>,
    #[serde(default = "default_smtp_timeout_secs")]
    timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
            use_tls: None,
            timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    mcp_sendmail_types::DEFAULT_PORT
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_events() -> usize {
    1000
}

fn default_resume_window_secs() -> u64 {
    300
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_secs() -> u64 {
    10
}

/// Command-line overrides, applied with the highest priority.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file; it must exist.
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins (empty = any)
    pub cors_allowed_origins: Vec<String>,
    /// Session lifetime and event retention
    pub sessions: TransportSettings,
    /// SMTP server used by the email tools
    pub smtp: SmtpSettings,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are merged in this order:
    /// 1. `config.toml` in the user config directory (~/.config/mcp-sendmail/ on Linux)
    /// 2. `.mcp-sendmail.toml` in the current directory
    /// 3. the file given with `--config`
    pub fn from_figment(cli: CliOverrides) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(LOCAL_CONFIG_FILE));
        let user_config = directories::ProjectDirs::from("", "", "mcp-sendmail")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // 1. Start with defaults
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        // 2. Merge user and local config files if they exist
        for path in [user_config, local_config].into_iter().flatten() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge the explicit config file, which must exist
        if let Some(ref path) = cli.config_file {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        // 4. Merge environment variables: legacy SMTP_* first, then MCP_SENDMAIL_*
        figment = figment
            .merge(
                Env::prefixed("SMTP_")
                    .only(LEGACY_SMTP_VARS)
                    .map(|key| format!("smtp.{}", key.as_str().to_lowercase()).into()),
            )
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        // 5. Merge CLI arguments (highest priority)
        if let Some(ref host) = cli.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = cli.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(ref level) = cli.log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        let config_file: ConfigFile = figment
            .extract()
            .context("Failed to load configuration")?;
        config_file
            .validate()
            .map_err(|report| anyhow::anyhow!("Invalid configuration: {}", report))?;

        Ok(Self::from(config_file))
    }

    /// Load configuration from a single TOML file, ignoring the environment.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config_file: ConfigFile = Figment::new()
            .merge(Serialized::defaults(ConfigFile::default()))
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("Failed to load {}", path.display()))?;
        config_file
            .validate()
            .map_err(|report| anyhow::anyhow!("Invalid configuration: {}", report))?;
        Ok(Self::from(config_file))
    }

    /// Socket address string to bind to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            cors_allowed_origins: file.server.cors_allowed_origins,
            sessions: TransportSettings {
                idle_timeout: Duration::from_secs(file.sessions.idle_timeout_secs),
                sweep_interval: Duration::from_secs(file.sessions.sweep_interval_secs),
                retention: RetentionPolicy {
                    max_events: file.sessions.max_events,
                    resume_window: Duration::from_secs(file.sessions.resume_window_secs),
                },
            },
            smtp: SmtpSettings {
                host: file.smtp.host,
                port: file.smtp.port,
                user: file.smtp.user,
                password: file.smtp.password,
                use_tls: file.smtp.use_tls,
                timeout: Duration::from_secs(file.smtp.timeout_secs),
            },
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from(ConfigFile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const TOUCHED_VARS: &[&str] = &[
        "MCP_SENDMAIL_SERVER__PORT",
        "MCP_SENDMAIL_SESSIONS__IDLE_TIMEOUT_SECS",
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_USER",
        "SMTP_PASSWORD",
        "SMTP_USE_TLS",
    ];

    fn clear_env() {
        for var in TOUCHED_VARS {
            std::env::remove_var(var);
        }
    }

    /// Run `f` with the working directory set to a fresh temp directory.
    fn in_temp_dir<T>(setup: impl FnOnce(&Path), f: impl FnOnce() -> T) -> T {
        let temp_dir = TempDir::new().unwrap();
        setup(temp_dir.path());
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = f();

        // Restore before temp_dir is dropped (ignore errors)
        let _ = std::env::set_current_dir(original_dir);
        result
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, mcp_sendmail_types::DEFAULT_PORT);
        assert_eq!(config.sessions, TransportSettings::default());
        assert_eq!(config.smtp, SmtpSettings::default());
        assert!(config.log_file.is_none());
    }

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        clear_env();

        let config = in_temp_dir(|_| {}, || Config::from_figment(CliOverrides::default()).unwrap());

        assert_eq!(config.port, 8000);
        assert_eq!(config.smtp.host, "localhost");
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(3600));
    }

    #[test]
    #[serial]
    fn test_from_figment_config_file() {
        clear_env();

        let config = in_temp_dir(
            |dir| {
                fs::write(
                    dir.join(LOCAL_CONFIG_FILE),
                    r#"
[server]
port = 7777
cors_allowed_origins = ["http://localhost:3000"]

[sessions]
idle_timeout_secs = 120
max_events = 50

[smtp]
host = "smtp.example.com"
port = 465
user = "bot@example.com"
"#,
                )
                .unwrap();
            },
            || Config::from_figment(CliOverrides::default()).unwrap(),
        );

        assert_eq!(config.port, 7777);
        assert_eq!(config.cors_allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.sessions.retention.max_events, 50);
        assert_eq!(config.sessions.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.smtp.host, "smtp.example.com");
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.user, "bot@example.com");
    }

    #[test]
    #[serial]
    fn test_env_vars_override_config_file() {
        clear_env();
        std::env::set_var("MCP_SENDMAIL_SERVER__PORT", "8888");
        std::env::set_var("MCP_SENDMAIL_SESSIONS__IDLE_TIMEOUT_SECS", "30");

        let config = in_temp_dir(
            |dir| fs::write(dir.join(LOCAL_CONFIG_FILE), "[server]\nport = 7777").unwrap(),
            || Config::from_figment(CliOverrides::default()).unwrap(),
        );
        clear_env();

        assert_eq!(config.port, 8888);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_legacy_smtp_env_vars() {
        clear_env();
        std::env::set_var("SMTP_HOST", "mail.internal");
        std::env::set_var("SMTP_PORT", "25");
        std::env::set_var("SMTP_USER", "relay");
        std::env::set_var("SMTP_USE_TLS", "false");

        let config = in_temp_dir(|_| {}, || Config::from_figment(CliOverrides::default()).unwrap());
        clear_env();

        assert_eq!(config.smtp.host, "mail.internal");
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.user, "relay");
        assert_eq!(config.smtp.use_tls, Some(false));
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env_and_config() {
        clear_env();
        std::env::set_var("MCP_SENDMAIL_SERVER__PORT", "8888");

        let config = in_temp_dir(
            |dir| fs::write(dir.join(LOCAL_CONFIG_FILE), "[server]\nport = 7777").unwrap(),
            || {
                Config::from_figment(CliOverrides {
                    port: Some(9999),
                    host: Some("127.0.0.1".to_string()),
                    log_level: Some("debug".to_string()),
                    ..Default::default()
                })
                .unwrap()
            },
        );
        clear_env();

        assert_eq!(config.port, 9999);
        assert_eq!(config.bind_address(), "127.0.0.1:9999");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_explicit_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "[smtp]\nhost = \"relay.example.com\"").unwrap();

        let config = in_temp_dir(
            |_| {},
            || {
                Config::from_figment(CliOverrides {
                    config_file: Some(path.clone()),
                    ..Default::default()
                })
                .unwrap()
            },
        );

        assert_eq!(config.smtp.host, "relay.example.com");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_file() {
        clear_env();

        let result = Config::from_figment(CliOverrides {
            config_file: Some(PathBuf::from("/nonexistent/mcp-sendmail.toml")),
            ..Default::default()
        });

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "[sessions]\nsweep_interval_secs = 0").unwrap();

        let result = Config::from_file(&path);

        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[logging]\nlog_level = \"warn\"\nlog_file = \"/tmp/mcp-sendmail.log\"",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(
            config.log_file,
            Some(PathBuf::from("/tmp/mcp-sendmail.log"))
        );
    }
}
