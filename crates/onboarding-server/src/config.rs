//! Configuration for the onboarding server.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, read from `SECTION__KEY` environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Flow lifetime and storage
    #[serde(default)]
    pub flow: FlowConfig,

    /// Verification code and message transport
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Access credential signing
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub invites: InvitesConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct FlowConfig {
    /// Fixed flow lifetime, e.g. `30m`
    #[serde(default = "default_flow_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// How often expired flows are purged
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: Duration,

    /// Enable persistence (if false, flows are in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Path to the encrypted flow registry
    #[serde(default = "default_flow_path")]
    pub path: PathBuf,

    /// Secret the registry encryption key is derived from
    #[serde(default)]
    pub encryption_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Write codes to the log (development)
    #[default]
    Log,
    /// Keep codes in memory (tests)
    Outbox,
    /// Send through the Signal CLI REST API
    Signal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Signal CLI REST API URL
    #[serde(default = "default_signal_api_url")]
    pub signal_api_url: String,

    /// Registered Signal number messages are sent from
    #[serde(default)]
    pub sender_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. A random one is generated when unset.
    #[serde(default)]
    pub jwt_secret: Option<SecretString>,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Access token lifetime
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvitesConfig {
    /// JSON file with class and school join tokens
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Mark the session cookie `Secure`
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            ttl: default_flow_ttl(),
            purge_interval: default_purge_interval(),
            persist: true,
            path: default_flow_path(),
            encryption_secret: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            signal_api_url: default_signal_api_url(),
            sender_number: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: default_issuer(),
            token_ttl: default_token_ttl(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure_cookie: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_flow_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_true() -> bool {
    true
}

fn default_flow_path() -> PathBuf {
    PathBuf::from("/data/flows.enc")
}

fn default_signal_api_url() -> String {
    "http://signal-api:8080".into()
}

fn default_issuer() -> String {
    "onboarding".into()
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_global_rpm() -> u32 {
    60
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        Self::from_source(config)
    }

    fn from_source(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Flow lifetime as a chrono duration.
    pub fn flow_ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.flow.ttl).context("Flow TTL out of range")
    }

    pub fn token_ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.auth.token_ttl).context("Token TTL out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = Config::from_source(config::Config::builder().build().unwrap()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.flow.ttl, Duration::from_secs(1800));
        assert!(config.flow.persist);
        assert!(config.flow.encryption_secret.is_none());
        assert_eq!(config.delivery.mode, DeliveryMode::Log);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(config.session.secure_cookie);
        assert_eq!(config.flow_ttl().unwrap(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_overrides() {
        let source = config::Config::builder()
            .set_override("flow.ttl", "10m")
            .unwrap()
            .set_override("flow.encryption_secret", "s3cret")
            .unwrap()
            .set_override("delivery.mode", "signal")
            .unwrap()
            .set_override("log.format", "json")
            .unwrap()
            .set_override("server.port", "9000")
            .unwrap()
            .build()
            .unwrap();

        let config = Config::from_source(source).unwrap();

        assert_eq!(config.flow.ttl, Duration::from_secs(600));
        assert_eq!(
            config.flow.encryption_secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("s3cret")
        );
        assert_eq!(config.delivery.mode, DeliveryMode::Signal);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.server.port, 9000);
    }
}
