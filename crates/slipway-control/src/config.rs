//! Configuration for slipway-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cloud provider client configuration.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Deployment platform client configuration.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Pipeline policy configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `slipway.toml` in the current directory (if present)
    /// 3. Environment variables with `SLIPWAY_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("slipway.toml"))
            .merge(Env::prefixed("SLIPWAY_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SLIPWAY_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/slipway".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Type of machine provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// REST client against a real cloud provider API.
    #[default]
    Http,

    /// Mock provider for testing.
    Mock,
}

/// Cloud provider client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Type of provider client to use.
    #[serde(default)]
    pub provider_type: ProviderType,

    /// Base URL for the provider API.
    #[serde(default = "default_provider_url")]
    pub api_url: String,

    /// Bearer token for the provider API.
    #[serde(default)]
    pub api_token: String,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,

    /// Default region for machines when the submission omits one.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Default size slug when the submission omits one.
    #[serde(default = "default_size")]
    pub default_size: String,

    /// Default image slug when the submission omits one.
    #[serde(default = "default_image")]
    pub default_image: String,
}

fn default_provider_url() -> String {
    "https://api.provider.example/v2".to_owned()
}

const fn default_client_timeout_secs() -> u64 {
    30
}

fn default_region() -> String {
    "nyc1".to_owned()
}

fn default_size() -> String {
    "s-2vcpu-2gb".to_owned()
}

fn default_image() -> String {
    "ubuntu-22-04-x64".to_owned()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            api_url: default_provider_url(),
            api_token: String::new(),
            timeout_secs: default_client_timeout_secs(),
            default_region: default_region(),
            default_size: default_size(),
            default_image: default_image(),
        }
    }
}

/// Type of deployment platform client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    /// REST client against a real platform API.
    #[default]
    Http,

    /// Mock platform for testing.
    Mock,
}

/// Deployment platform client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Type of platform client to use.
    #[serde(default)]
    pub platform_type: PlatformType,

    /// Base URL for the platform API.
    #[serde(default = "default_platform_url")]
    pub api_url: String,

    /// Bearer token for the platform API.
    #[serde(default)]
    pub api_token: String,

    /// Request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,

    /// Default environment name when the submission omits one.
    #[serde(default = "default_environment")]
    pub default_environment: String,

    /// Default exposed port(s) when the submission omits one.
    #[serde(default = "default_ports_exposed")]
    pub default_ports_exposed: String,

    /// Default git branch when the submission omits one.
    #[serde(default = "default_git_branch")]
    pub default_git_branch: String,
}

fn default_platform_url() -> String {
    "https://platform.example/api/v1".to_owned()
}

fn default_environment() -> String {
    "production".to_owned()
}

fn default_ports_exposed() -> String {
    "3000".to_owned()
}

fn default_git_branch() -> String {
    "main".to_owned()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform_type: PlatformType::default(),
            api_url: default_platform_url(),
            api_token: String::new(),
            timeout_secs: default_client_timeout_secs(),
            default_environment: default_environment(),
            default_ports_exposed: default_ports_exposed(),
            default_git_branch: default_git_branch(),
        }
    }
}

/// Pipeline policy configuration.
///
/// All intervals are stage-local; there is no wall-clock deadline on the
/// whole pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of concurrently active machines.
    #[serde(default = "default_max_active_machines")]
    pub max_active_machines: u32,

    /// Interval between machine readiness polls, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub readiness_interval_secs: u64,

    /// Maximum machine readiness poll attempts.
    #[serde(default = "default_poll_max_attempts")]
    pub readiness_max_attempts: u32,

    /// Wait after target registration before triggering the deployment,
    /// in seconds.
    #[serde(default = "default_stabilize_delay_secs")]
    pub stabilize_delay_secs: u64,

    /// Wait after triggering the deployment before the first status poll,
    /// in seconds.
    #[serde(default = "default_deploy_initial_delay_secs")]
    pub deploy_initial_delay_secs: u64,

    /// Interval between deployment status polls, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub status_interval_secs: u64,

    /// Maximum deployment status poll attempts.
    #[serde(default = "default_poll_max_attempts")]
    pub status_max_attempts: u32,

    /// Maximum jobs processed concurrently by the queue.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

const fn default_max_active_machines() -> u32 {
    3
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_poll_max_attempts() -> u32 {
    12
}

const fn default_stabilize_delay_secs() -> u64 {
    90
}

const fn default_deploy_initial_delay_secs() -> u64 {
    300
}

const fn default_max_concurrent_jobs() -> usize {
    10
}

impl PipelineConfig {
    /// Interval between machine readiness polls.
    #[must_use]
    pub const fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    /// Interval between deployment status polls.
    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Wait before triggering the deployment.
    #[must_use]
    pub const fn stabilize_delay(&self) -> Duration {
        Duration::from_secs(self.stabilize_delay_secs)
    }

    /// Wait before the first deployment status poll.
    #[must_use]
    pub const fn deploy_initial_delay(&self) -> Duration {
        Duration::from_secs(self.deploy_initial_delay_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_active_machines: default_max_active_machines(),
            readiness_interval_secs: default_poll_interval_secs(),
            readiness_max_attempts: default_poll_max_attempts(),
            stabilize_delay_secs: default_stabilize_delay_secs(),
            deploy_initial_delay_secs: default_deploy_initial_delay_secs(),
            status_interval_secs: default_poll_interval_secs(),
            status_max_attempts: default_poll_max_attempts(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.pipeline.max_active_machines, 3);
        assert_eq!(config.pipeline.readiness_max_attempts, 12);
        assert_eq!(config.pipeline.readiness_interval_secs, 5);
        assert_eq!(config.pipeline.stabilize_delay_secs, 90);
        assert_eq!(config.pipeline.deploy_initial_delay_secs, 300);
        assert_eq!(config.provider.default_region, "nyc1");
        assert_eq!(config.platform.default_environment, "production");
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [database]
            url = "postgres://user:pass@db:5432/slipway"
            max_connections = 20

            [provider]
            provider_type = "mock"
            default_region = "fra1"

            [pipeline]
            max_active_machines = 5
            stabilize_delay_secs = 10
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/slipway");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.provider.provider_type, ProviderType::Mock);
        assert_eq!(config.provider.default_region, "fra1");
        assert_eq!(config.pipeline.max_active_machines, 5);
        assert_eq!(config.pipeline.stabilize_delay(), Duration::from_secs(10));
    }
}
