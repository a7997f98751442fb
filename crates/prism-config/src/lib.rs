//! Layered configuration loader (§6, §10.3).
//!
//! Precedence, lowest to highest: built-in defaults, an optional TOML file
//! (`PRISM_CONFIG` env var or an explicit path), then `PRISM_`-prefixed
//! environment variables using `__` to cross a section boundary (e.g.
//! `PRISM_SERVER__TCP_PORT`). Unknown TOML keys are ignored.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("missing required field '{0}'")]
    MissingField(String),
}

// ---------------------------------------------------------------------------
// Raw TOML shape (every field optional; env vars and defaults fill the rest)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    server: RawServerConfig,
    protocol: RawProtocolConfig,
    heartbeat: RawHeartbeatConfig,
    dns: RawDnsConfig,
    email: RawEmailConfig,
    smtp: RawSmtpConfig,
    retry: RawRetryConfig,
    breaker: RawBreakerConfig,
    store: RawStoreConfig,
    query_api: RawQueryApiConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServerConfig {
    host: Option<String>,
    tcp_port: Option<u16>,
    max_connections: Option<usize>,
    connection_timeout_secs: Option<u64>,
    graceful_shutdown_timeout_secs: Option<u64>,
    auth_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProtocolConfig {
    max_message_size: Option<usize>,
    max_buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHeartbeatConfig {
    interval_secs: Option<u64>,
    liveness_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDnsConfig {
    enabled: Option<bool>,
    default_zone: Option<String>,
    default_ttl_secs: Option<u64>,
    retraction_policy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEmailConfig {
    provider: Option<String>,
    from_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSmtpConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    use_ssl: Option<bool>,
    pool: RawSmtpPoolConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSmtpPoolConfig {
    max_size: Option<usize>,
    max_idle_time_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRetryConfig {
    max_attempts: Option<u32>,
    initial_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBreakerConfig {
    failure_threshold: Option<u32>,
    recovery_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStoreConfig {
    database_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQueryApiConfig {
    enabled: Option<bool>,
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RetractionPolicy {
    Keep,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmailProviderKind {
    Console,
    Smtp,
    Ses,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub tcp_port: u16,
    pub max_connections: usize,
    pub connection_timeout: Duration,
    pub graceful_shutdown_timeout: Duration,
    /// Shared secret `REGISTER.auth_token` must match, compared in constant
    /// time. `None` disables token enforcement (§4.5, §9 open question).
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub max_message_size: usize,
    pub max_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub liveness_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub enabled: bool,
    pub default_zone: Option<String>,
    pub default_ttl: Duration,
    pub retraction_policy: RetractionPolicy,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub provider: EmailProviderKind,
    pub from_email: String,
}

#[derive(Debug, Clone)]
pub struct SmtpPoolConfig {
    pub max_size: usize,
    pub max_idle_time: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub pool: SmtpPoolConfig,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: String,
}

#[derive(Debug, Clone)]
pub struct QueryApiConfig {
    pub enabled: bool,
    pub bind: String,
}

/// Fully resolved configuration, ready to construct the server's runtime
/// components from (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
    pub heartbeat: HeartbeatConfig,
    pub dns: DnsConfig,
    pub email: EmailConfig,
    pub smtp: SmtpConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub store: StoreConfig,
    pub query_api: QueryApiConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load layered configuration: built-in defaults, then the file named by
    /// `config_path` (or the `PRISM_CONFIG` env var if `config_path` is
    /// `None`) if one resolves, then `PRISM_`-prefixed environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::default();

        let file_path = config_path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var("PRISM_CONFIG").ok().map(std::path::PathBuf::from));

        if let Some(path) = file_path {
            if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                raw = toml::from_str(&text)?;
            }
        }

        apply_env_overrides(&mut raw)?;
        Config::from_raw(raw)
    }

    /// Built-in defaults with no file or environment overlay. Used by tests
    /// and by callers that manage config entirely in-process.
    ///
    /// `email.from_email` has no documented default (§6 marks it required),
    /// so this fills in a placeholder sender the way an empty dev
    /// configuration would -- callers that care about the real value load
    /// through [`Config::load`] instead.
    pub fn defaults() -> Self {
        let mut raw = RawConfig::default();
        raw.email.from_email = Some("noreply@localhost".to_owned());
        Config::from_raw(raw).expect("defaults are always valid")
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let dns_enabled = raw.dns.enabled.unwrap_or(false);
        let default_zone = raw.dns.default_zone;
        if dns_enabled && default_zone.is_none() {
            return Err(ConfigError::MissingField("dns.default_zone".to_owned()));
        }

        let from_email = raw
            .email
            .from_email
            .ok_or_else(|| ConfigError::MissingField("email.from_email".to_owned()))?;

        let provider = match raw.email.provider.as_deref().unwrap_or("console") {
            "console" => EmailProviderKind::Console,
            "smtp" => EmailProviderKind::Smtp,
            "ses" => EmailProviderKind::Ses,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "email.provider".to_owned(),
                    message: format!("unknown provider '{other}'"),
                })
            }
        };

        let retraction_policy = match raw.dns.retraction_policy.as_deref().unwrap_or("keep") {
            "keep" => RetractionPolicy::Keep,
            "remove" => RetractionPolicy::Remove,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "dns.retraction_policy".to_owned(),
                    message: format!("must be 'keep' or 'remove', got '{other}'"),
                })
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: raw.server.host.unwrap_or_else(|| "0.0.0.0".to_owned()),
                tcp_port: raw.server.tcp_port.unwrap_or(8080),
                max_connections: raw.server.max_connections.unwrap_or(1000),
                connection_timeout: Duration::from_secs(raw.server.connection_timeout_secs.unwrap_or(30)),
                graceful_shutdown_timeout: Duration::from_secs(
                    raw.server.graceful_shutdown_timeout_secs.unwrap_or(10),
                ),
                auth_token: raw.server.auth_token,
            },
            protocol: ProtocolConfig {
                max_message_size: raw.protocol.max_message_size.unwrap_or(65536),
                max_buffer_size: raw.protocol.max_buffer_size.unwrap_or(1_048_576),
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(raw.heartbeat.interval_secs.unwrap_or(60)),
                liveness_timeout: Duration::from_secs(raw.heartbeat.liveness_timeout_secs.unwrap_or(150)),
            },
            dns: DnsConfig {
                enabled: dns_enabled,
                default_zone,
                default_ttl: Duration::from_secs(raw.dns.default_ttl_secs.unwrap_or(60)),
                retraction_policy,
            },
            email: EmailConfig { provider, from_email },
            smtp: SmtpConfig {
                host: raw.smtp.host.unwrap_or_default(),
                port: raw.smtp.port.unwrap_or(587),
                username: raw.smtp.username,
                password: raw.smtp.password,
                use_tls: raw.smtp.use_tls.unwrap_or(false),
                use_ssl: raw.smtp.use_ssl.unwrap_or(false),
                pool: SmtpPoolConfig {
                    max_size: raw.smtp.pool.max_size.unwrap_or(5),
                    max_idle_time: Duration::from_secs(raw.smtp.pool.max_idle_time_secs.unwrap_or(300)),
                },
            },
            retry: RetryConfig {
                max_attempts: raw.retry.max_attempts.unwrap_or(3),
                initial_delay: Duration::from_secs(raw.retry.initial_delay_secs.unwrap_or(1)),
                max_delay: Duration::from_secs(raw.retry.max_delay_secs.unwrap_or(60)),
                jitter: raw.retry.jitter.unwrap_or(true),
            },
            breaker: BreakerConfig {
                failure_threshold: raw.breaker.failure_threshold.unwrap_or(5),
                recovery_timeout: Duration::from_secs(raw.breaker.recovery_timeout_secs.unwrap_or(60)),
            },
            store: StoreConfig {
                database_path: raw.store.database_path.unwrap_or_else(|| "prism.db".to_owned()),
            },
            query_api: QueryApiConfig {
                enabled: raw.query_api.enabled.unwrap_or(true),
                bind: raw.query_api.bind.unwrap_or_else(|| "127.0.0.1:8081".to_owned()),
            },
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("PRISM_{key}")).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: key.to_owned(), message: format!("'{raw}' is not valid") }),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_owned(),
                message: format!("'{other}' is not a boolean"),
            }),
        },
    }
}

/// Overlays `PRISM_SECTION__FIELD` environment variables onto an
/// already-parsed raw config, in place.
fn apply_env_overrides(raw: &mut RawConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_var("SERVER__HOST") {
        raw.server.host = Some(v);
    }
    if let Some(v) = env_parse("SERVER__TCP_PORT")? {
        raw.server.tcp_port = Some(v);
    }
    if let Some(v) = env_parse("SERVER__MAX_CONNECTIONS")? {
        raw.server.max_connections = Some(v);
    }
    if let Some(v) = env_parse("SERVER__CONNECTION_TIMEOUT_SECS")? {
        raw.server.connection_timeout_secs = Some(v);
    }
    if let Some(v) = env_parse("SERVER__GRACEFUL_SHUTDOWN_TIMEOUT_SECS")? {
        raw.server.graceful_shutdown_timeout_secs = Some(v);
    }
    if let Some(v) = env_var("SERVER__AUTH_TOKEN") {
        raw.server.auth_token = Some(v);
    }
    if let Some(v) = env_parse("PROTOCOL__MAX_MESSAGE_SIZE")? {
        raw.protocol.max_message_size = Some(v);
    }
    if let Some(v) = env_parse("PROTOCOL__MAX_BUFFER_SIZE")? {
        raw.protocol.max_buffer_size = Some(v);
    }
    if let Some(v) = env_parse("HEARTBEAT__INTERVAL_SECS")? {
        raw.heartbeat.interval_secs = Some(v);
    }
    if let Some(v) = env_parse("HEARTBEAT__LIVENESS_TIMEOUT_SECS")? {
        raw.heartbeat.liveness_timeout_secs = Some(v);
    }
    if let Some(v) = env_bool("DNS__ENABLED")? {
        raw.dns.enabled = Some(v);
    }
    if let Some(v) = env_var("DNS__DEFAULT_ZONE") {
        raw.dns.default_zone = Some(v);
    }
    if let Some(v) = env_parse("DNS__DEFAULT_TTL_SECS")? {
        raw.dns.default_ttl_secs = Some(v);
    }
    if let Some(v) = env_var("DNS__RETRACTION_POLICY") {
        raw.dns.retraction_policy = Some(v);
    }
    if let Some(v) = env_var("EMAIL__PROVIDER") {
        raw.email.provider = Some(v);
    }
    if let Some(v) = env_var("EMAIL__FROM_EMAIL") {
        raw.email.from_email = Some(v);
    }
    if let Some(v) = env_var("SMTP__HOST") {
        raw.smtp.host = Some(v);
    }
    if let Some(v) = env_parse("SMTP__PORT")? {
        raw.smtp.port = Some(v);
    }
    if let Some(v) = env_var("SMTP__USERNAME") {
        raw.smtp.username = Some(v);
    }
    if let Some(v) = env_var("SMTP__PASSWORD") {
        raw.smtp.password = Some(v);
    }
    if let Some(v) = env_bool("SMTP__USE_TLS")? {
        raw.smtp.use_tls = Some(v);
    }
    if let Some(v) = env_bool("SMTP__USE_SSL")? {
        raw.smtp.use_ssl = Some(v);
    }
    if let Some(v) = env_parse("SMTP__POOL__MAX_SIZE")? {
        raw.smtp.pool.max_size = Some(v);
    }
    if let Some(v) = env_parse("SMTP__POOL__MAX_IDLE_TIME_SECS")? {
        raw.smtp.pool.max_idle_time_secs = Some(v);
    }
    if let Some(v) = env_parse("RETRY__MAX_ATTEMPTS")? {
        raw.retry.max_attempts = Some(v);
    }
    if let Some(v) = env_parse("RETRY__INITIAL_DELAY_SECS")? {
        raw.retry.initial_delay_secs = Some(v);
    }
    if let Some(v) = env_parse("RETRY__MAX_DELAY_SECS")? {
        raw.retry.max_delay_secs = Some(v);
    }
    if let Some(v) = env_bool("RETRY__JITTER")? {
        raw.retry.jitter = Some(v);
    }
    if let Some(v) = env_parse("BREAKER__FAILURE_THRESHOLD")? {
        raw.breaker.failure_threshold = Some(v);
    }
    if let Some(v) = env_parse("BREAKER__RECOVERY_TIMEOUT_SECS")? {
        raw.breaker.recovery_timeout_secs = Some(v);
    }
    if let Some(v) = env_var("STORE__DATABASE_PATH") {
        raw.store.database_path = Some(v);
    }
    if let Some(v) = env_bool("QUERY_API__ENABLED")? {
        raw.query_api.enabled = Some(v);
    }
    if let Some(v) = env_var("QUERY_API__BIND") {
        raw.query_api.bind = Some(v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = Config::defaults();
        assert_eq!(config.server.tcp_port, 8080);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.protocol.max_message_size, 65536);
        assert_eq!(config.heartbeat.liveness_timeout, Duration::from_secs(150));
        assert!(!config.dns.enabled);
        assert_eq!(config.smtp.pool.max_size, 5);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.store.database_path, "prism.db");
        assert!(config.query_api.enabled);
        assert_eq!(config.server.auth_token, None);
    }

    #[test]
    fn auth_token_overridden_by_environment() {
        std::env::set_var("PRISM_SERVER__AUTH_TOKEN", "s3cret");
        let config = Config::load(None).unwrap();
        std::env::remove_var("PRISM_SERVER__AUTH_TOKEN");
        assert_eq!(config.server.auth_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn dns_enabled_without_zone_is_rejected() {
        let toml = "[dns]\nenabled = true\n";
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "dns.default_zone"));
    }

    #[test]
    fn missing_from_email_is_rejected() {
        let raw = RawConfig::default();
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "email.from_email"));
    }

    #[test]
    fn file_values_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\ntcp_port = 9090\n\n[email]\nfrom_email = \"noreply@example.com\"\n").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.tcp_port, 9090);
        assert_eq!(config.email.from_email, "noreply@example.com");
    }

    #[test]
    fn env_var_overrides_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\ntcp_port = 9090\n\n[email]\nfrom_email = \"noreply@example.com\"\n").unwrap();
        std::env::set_var("PRISM_SERVER__TCP_PORT", "7070");
        let config = Config::load(Some(file.path())).unwrap();
        std::env::remove_var("PRISM_SERVER__TCP_PORT");
        assert_eq!(config.server.tcp_port, 7070);
    }

    #[test]
    fn unknown_email_provider_is_rejected() {
        let mut raw = RawConfig::default();
        raw.email.from_email = Some("noreply@example.com".to_owned());
        raw.email.provider = Some("mailgun".to_owned());
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "email.provider"));
    }
}
