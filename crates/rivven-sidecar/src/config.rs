//! Configuration types for rivven-sidecar
//!
//! Architecture:
//!   Input topics → decode → business endpoint → encode → output topics
//!   Ingress batches → encode → output topics
//!
//! Configuration is loaded once at startup, either from a YAML file (with
//! `${VAR}` / `${VAR:-default}` expansion) or from the flat environment
//! variables of container deployments, and then passed to every component.

use crate::health;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SidecarConfig {
    /// Kafka connection and input topics
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub schema_registry: SchemaRegistryConfig,

    /// Business endpoint called for every consumed record
    #[serde(default)]
    pub remote: RemoteConfig,

    /// HTTP ingress for externally submitted batches
    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub settings: GlobalSettings,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Bootstrap servers (host:port)
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,

    /// Input topics; empty disables the broker driver
    #[serde(default)]
    pub topics: Vec<String>,

    /// Consumer group shared by every topic reader
    #[serde(default)]
    pub consumer_group: String,

    /// Where a group without committed offsets starts reading
    #[serde(default)]
    pub start_offset: StartOffset,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Producer delivery timeout
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topics: Vec::new(),
            consumer_group: String::new(),
            start_offset: StartOffset::default(),
            session_timeout_ms: default_session_timeout_ms(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_message_timeout_ms() -> u64 {
    5000
}

/// Initial offset for a consumer group without commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

impl StartOffset {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

/// Schema registry connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaRegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// Basic auth username
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a fetched schema stays cached
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for SchemaRegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    300
}

/// Business endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// HTTP ingress
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngressConfig {
    /// Listen port; 0 disables the ingress driver
    #[serde(default)]
    pub port: u16,

    #[serde(default = "default_ingress_host")]
    pub host: String,

    #[serde(default = "default_ingress_path")]
    pub path: String,
}

impl IngressConfig {
    pub fn is_enabled(&self) -> bool {
        self.port > 0
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            port: 0,
            host: default_ingress_host(),
            path: default_ingress_path(),
        }
    }
}

fn default_ingress_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ingress_path() -> String {
    "/".to_string()
}

/// Authorization and failure policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Topics a batch may publish to; empty allows every topic
    #[serde(default)]
    pub allowed_topics: Vec<String>,

    /// Commit a consumed record once every derived record is published.
    /// When false, the sidecar never commits.
    #[serde(default = "default_true")]
    pub commit_on_success: bool,

    /// Stop on the first broker-path failure
    #[serde(default = "default_true")]
    pub terminate_on_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_topics: Vec::new(),
            commit_on_success: true,
            terminate_on_error: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Global settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalSettings {
    /// Force debug logging
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Seconds to wait before connecting to anything
    #[serde(default)]
    pub startup_delay_secs: u64,

    #[serde(default)]
    pub health: HealthConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Health check endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Enable health check HTTP endpoint
    #[serde(default)]
    pub enabled: bool,

    /// Port for health check endpoint
    #[serde(default = "default_health_port")]
    pub port: u16,

    /// Health check endpoint path
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_health_port(),
            path: default_health_path(),
        }
    }
}

fn default_health_port() -> u16 {
    8080
}
fn default_health_path() -> String {
    "/health".to_string()
}

impl SidecarConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        // Expand environment variables
        let expanded = Self::expand_env_vars(&content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Load configuration from process environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load configuration from environment-style variables
    ///
    /// | Variable                      | Field                                  |
    /// |-------------------------------|----------------------------------------|
    /// | `DEBUG`                       | `settings.debug`                       |
    /// | `KAFKA_BROKERS`               | `broker.bootstrap_servers` (comma list)|
    /// | `KAFKA_TOPICS`                | `broker.topics` (comma list)           |
    /// | `KAFKA_CONSUMER_GROUP_ID`     | `broker.consumer_group`                |
    /// | `SCHEMA_REGISTRY_URL`         | `schema_registry.url`                  |
    /// | `AVRO_SCHEMA_REFRESH_INTERVAL`| `schema_registry.refresh_interval_secs`|
    /// | `HTTP_ROUTE`                  | `remote.url`                           |
    /// | `HTTP_PORT`                   | `ingress.port`                         |
    /// | `ALLOWED_TOPICS`              | `pipeline.allowed_topics` (comma list) |
    /// | `COMMIT_ON_SUCCESS`           | `pipeline.commit_on_success`           |
    /// | `TERMINATE_ON_ERROR`          | `pipeline.terminate_on_error`          |
    /// | `STARTUP_DELAY`               | `settings.startup_delay_secs`          |
    pub fn from_env_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("DEBUG") {
            config.settings.debug = parse_bool("DEBUG", &v)?;
        }
        if let Some(v) = lookup("KAFKA_BROKERS") {
            config.broker.bootstrap_servers = split_list(&v);
        }
        if let Some(v) = lookup("KAFKA_TOPICS") {
            config.broker.topics = split_list(&v);
        }
        if let Some(v) = lookup("KAFKA_CONSUMER_GROUP_ID") {
            config.broker.consumer_group = v.trim().to_string();
        }
        if let Some(v) = lookup("SCHEMA_REGISTRY_URL") {
            config.schema_registry.url = v.trim().to_string();
        }
        if let Some(v) = lookup("AVRO_SCHEMA_REFRESH_INTERVAL") {
            config.schema_registry.refresh_interval_secs =
                parse_number("AVRO_SCHEMA_REFRESH_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("HTTP_ROUTE") {
            config.remote.url = v.trim().to_string();
        }
        if let Some(v) = lookup("HTTP_PORT") {
            config.ingress.port = parse_number("HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("ALLOWED_TOPICS") {
            config.pipeline.allowed_topics = split_list(&v);
        }
        if let Some(v) = lookup("COMMIT_ON_SUCCESS") {
            config.pipeline.commit_on_success = parse_bool("COMMIT_ON_SUCCESS", &v)?;
        }
        if let Some(v) = lookup("TERMINATE_ON_ERROR") {
            config.pipeline.terminate_on_error = parse_bool("TERMINATE_ON_ERROR", &v)?;
        }
        if let Some(v) = lookup("STARTUP_DELAY") {
            config.settings.startup_delay_secs = parse_number("STARTUP_DELAY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.broker.bootstrap_servers.is_empty() {
            anyhow::bail!("At least one bootstrap server is required");
        }

        if self.has_broker_driver() {
            if self.broker.consumer_group.is_empty() {
                anyhow::bail!("A consumer_group is required when topics are configured");
            }
            if self.remote.url.is_empty() {
                anyhow::bail!("A remote url is required when topics are configured");
            }

            let mut seen = HashSet::new();
            for topic in &self.broker.topics {
                if !seen.insert(topic.as_str()) {
                    anyhow::bail!("Topic '{}' is configured more than once", topic);
                }
            }
        }

        if !self.has_broker_driver() && !self.has_ingress_driver() {
            anyhow::bail!("Nothing to do: configure input topics, an ingress port, or both");
        }

        if self.schema_registry.refresh_interval_secs == 0 {
            anyhow::bail!("schema_registry.refresh_interval_secs must be greater than 0");
        }

        if !self.ingress.path.starts_with('/') {
            anyhow::bail!("ingress.path must start with '/'");
        }

        let health_path = self.settings.health.path.as_str();
        if !health_path.starts_with('/') {
            anyhow::bail!("settings.health.path must start with '/'");
        }
        if health_path == health::READY_PATH || health_path == health::LIVE_PATH {
            anyhow::bail!("settings.health.path '{}' is reserved", health_path);
        }

        Ok(())
    }

    pub fn has_broker_driver(&self) -> bool {
        !self.broker.topics.is_empty()
    }

    pub fn has_ingress_driver(&self) -> bool {
        self.ingress.is_enabled()
    }
}

/// Split a comma-separated list, dropping blank entries
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
    }
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} must be a number, got '{}': {}", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("SIDECAR_TEST_VAR", "hello");
        let content = "value: ${SIDECAR_TEST_VAR}";
        let expanded = SidecarConfig::expand_env_vars(content);
        assert_eq!(expanded, "value: hello");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("SIDECAR_MISSING_VAR");
        let content = "value: ${SIDECAR_MISSING_VAR:-default_value}";
        let expanded = SidecarConfig::expand_env_vars(content);
        assert_eq!(expanded, "value: default_value");
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
broker:
  bootstrap_servers:
    - kafka-1:9092
    - kafka-2:9092
  topics: [orders, payments]
  consumer_group: order-sidecar
  start_offset: latest
schema_registry:
  url: http://registry:8081
  refresh_interval_secs: 60
remote:
  url: http://localhost:3000/process
ingress:
  port: 8090
pipeline:
  allowed_topics: [orders-done]
  commit_on_success: false
settings:
  log_format: json
  health:
    enabled: true
"#;
        let config: SidecarConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.broker.bootstrap_servers.len(), 2);
        assert_eq!(config.broker.start_offset, StartOffset::Latest);
        assert_eq!(config.broker.session_timeout_ms, 10_000);
        assert_eq!(config.schema_registry.refresh_interval_secs, 60);
        assert_eq!(config.ingress.path, "/");
        assert!(!config.pipeline.commit_on_success);
        assert!(config.pipeline.terminate_on_error);
        assert_eq!(config.settings.log_format, LogFormat::Json);
        assert_eq!(config.settings.health.port, 8080);
    }

    #[test]
    fn test_from_file() {
        std::env::set_var("SIDECAR_TEST_GROUP", "file-group");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "broker:\n  topics: [orders]\n  consumer_group: ${{SIDECAR_TEST_GROUP}}\nremote:\n  url: ${{SIDECAR_TEST_REMOTE:-http://localhost:3000}}"
        )
        .unwrap();

        let config = SidecarConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.broker.consumer_group, "file-group");
        assert_eq!(config.remote.url, "http://localhost:3000");
    }

    #[test]
    fn test_from_env() {
        let config = SidecarConfig::from_env_with(env(&[
            ("DEBUG", "true"),
            ("KAFKA_BROKERS", "k1:9092, k2:9092"),
            ("KAFKA_TOPICS", "orders,,payments ,"),
            ("KAFKA_CONSUMER_GROUP_ID", "sidecar"),
            ("HTTP_ROUTE", "http://app:3000/"),
            ("HTTP_PORT", "8090"),
            ("ALLOWED_TOPICS", "orders-done"),
            ("COMMIT_ON_SUCCESS", "0"),
            ("STARTUP_DELAY", "5"),
            ("AVRO_SCHEMA_REFRESH_INTERVAL", "30"),
        ]))
        .unwrap();

        assert!(config.settings.debug);
        assert_eq!(config.broker.bootstrap_servers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(config.broker.topics, vec!["orders", "payments"]);
        assert_eq!(config.remote.url, "http://app:3000/");
        assert_eq!(config.ingress.port, 8090);
        assert_eq!(config.pipeline.allowed_topics, vec!["orders-done"]);
        assert!(!config.pipeline.commit_on_success);
        assert!(config.pipeline.terminate_on_error);
        assert_eq!(config.settings.startup_delay_secs, 5);
        assert_eq!(config.schema_registry.refresh_interval_secs, 30);
        assert_eq!(config.schema_registry.url, "http://localhost:8081");
    }

    #[test]
    fn test_from_env_invalid_bool() {
        let err = SidecarConfig::from_env_with(env(&[
            ("HTTP_PORT", "8090"),
            ("TERMINATE_ON_ERROR", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TERMINATE_ON_ERROR"));
    }

    #[test]
    fn test_validate_requires_a_driver() {
        let err = SidecarConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("Nothing to do"));
    }

    #[test]
    fn test_validate_topics_need_group_and_remote() {
        let mut config = SidecarConfig::default();
        config.broker.topics = vec!["orders".into()];
        assert!(config.validate().unwrap_err().to_string().contains("consumer_group"));

        config.broker.consumer_group = "g".into();
        assert!(config.validate().unwrap_err().to_string().contains("remote url"));

        config.remote.url = "http://app".into();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_duplicate_topics() {
        let mut config = SidecarConfig::default();
        config.broker.topics = vec!["orders".into(), "orders".into()];
        config.broker.consumer_group = "g".into();
        config.remote.url = "http://app".into();
        assert!(config.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_refresh_interval() {
        let mut config = SidecarConfig::default();
        config.ingress.port = 8090;
        config.schema_registry.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_health_path() {
        let mut config = SidecarConfig::default();
        config.ingress.port = 8090;

        config.settings.health.path = "health".into();
        assert!(config.validate().unwrap_err().to_string().contains("must start with"));

        config.settings.health.path = "/live".into();
        assert!(config.validate().unwrap_err().to_string().contains("reserved"));

        config.settings.health.path = "/healthz".into();
        config.validate().unwrap();
    }
}
