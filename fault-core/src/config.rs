//! Configuration loading for the agent failure scenario.
//!
//! Configuration is loaded from a TOML file (default: `agent_failure.toml`).
//! Every field except `hosts.clients` has a default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Scenario parameters.
    #[serde(default)]
    pub scenario: ScenarioConfig,
    /// Client hosts and SSH access.
    pub hosts: HostsConfig,
    /// IOR/mpirun workload parameters.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Pool and container provisioning.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Scenario parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Service stopped mid-workload (default: daos_agent).
    #[serde(default = "default_service")]
    pub service: String,
    /// Syslog identifier the service logs under (default: daos_agent).
    #[serde(default = "default_log_tag")]
    pub log_tag: String,
    /// Seconds to let the workload reach steady state before injecting (default: 5).
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Error code the first run must report (default: -1005).
    #[serde(default = "default_expected_error_code")]
    pub expected_error_code: String,
    /// Marker the service logs on shutdown (default: "shutting down").
    #[serde(default = "default_shutdown_marker")]
    pub shutdown_marker: String,
    /// Result slot used by both runs (default: 1).
    #[serde(default = "default_job_id")]
    pub job_id: u32,
    /// Target file of the first (interrupted) run.
    #[serde(default = "default_first_file")]
    pub first_file: String,
    /// Target file of the second (recovery) run.
    #[serde(default = "default_second_file")]
    pub second_file: String,
}

/// Client hosts and SSH access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostsConfig {
    /// Client hosts running the agent and the workload.
    pub clients: Vec<String>,
    /// SSH user (optional, falls back to ssh config).
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// SSH connection timeout in seconds (default: 30).
    #[serde(default = "default_ssh_timeout_secs")]
    pub ssh_timeout_secs: u64,
    /// Prefix for remote service commands (default: "sudo -n").
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,
}

/// IOR/mpirun workload parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadConfig {
    /// mpirun binary (default: mpirun).
    #[serde(default = "default_mpirun")]
    pub mpirun: PathBuf,
    /// IOR binary (default: ior).
    #[serde(default = "default_ior")]
    pub ior: PathBuf,
    /// MPI flavour (default: mpich).
    #[serde(default = "default_mpi_type")]
    pub mpi_type: String,
    /// Processes per node.
    #[serde(default = "default_ppn")]
    pub ppn: u32,
    /// Total process count. `None` lets mpirun derive it from the hostfile.
    #[serde(default)]
    pub np: Option<u32>,
    /// Hostfile slots per client.
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// IOR API (default: DFS).
    #[serde(default = "default_api")]
    pub api: String,
    /// IOR block size (default: 2G).
    #[serde(default = "default_block_size")]
    pub block_size: String,
    /// IOR transfer size (default: 1M).
    #[serde(default = "default_transfer_size")]
    pub transfer_size: String,
    /// IOR flags (default: "-v -w -k").
    #[serde(default = "default_flags")]
    pub flags: String,
    /// Object class passed to IOR, if any.
    #[serde(default)]
    pub object_class: Option<String>,
}

/// Pool and container provisioning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// dmg binary (default: dmg).
    #[serde(default = "default_dmg")]
    pub dmg: PathBuf,
    /// daos binary (default: daos).
    #[serde(default = "default_daos")]
    pub daos: PathBuf,
    /// dmg config file, if not the default.
    #[serde(default)]
    pub dmg_config: Option<PathBuf>,
    /// Pool size (default: 10G).
    #[serde(default = "default_pool_size")]
    pub size: String,
    /// Pool label prefix; a unique suffix is appended per run.
    #[serde(default = "default_pool_label")]
    pub label: String,
    /// Container label prefix; a unique suffix is appended per run.
    #[serde(default = "default_container_label")]
    pub container_label: String,
    /// DAOS server group (default: daos_server).
    #[serde(default = "default_server_group")]
    pub server_group: String,
}

// Default value functions
fn default_service() -> String {
    "daos_agent".to_string()
}

fn default_log_tag() -> String {
    "daos_agent".to_string()
}

fn default_grace_secs() -> u64 {
    5
}

fn default_expected_error_code() -> String {
    "-1005".to_string()
}

fn default_shutdown_marker() -> String {
    "shutting down".to_string()
}

fn default_job_id() -> u32 {
    1
}

fn default_first_file() -> String {
    "test_file_1".to_string()
}

fn default_second_file() -> String {
    "test_file_2".to_string()
}

fn default_ssh_timeout_secs() -> u64 {
    30
}

fn default_remote_prefix() -> String {
    "sudo -n".to_string()
}

fn default_mpirun() -> PathBuf {
    PathBuf::from("mpirun")
}

fn default_ior() -> PathBuf {
    PathBuf::from("ior")
}

fn default_mpi_type() -> String {
    "mpich".to_string()
}

fn default_ppn() -> u32 {
    4
}

fn default_slots() -> u32 {
    1
}

fn default_api() -> String {
    "DFS".to_string()
}

fn default_block_size() -> String {
    "2G".to_string()
}

fn default_transfer_size() -> String {
    "1M".to_string()
}

fn default_flags() -> String {
    "-v -w -k".to_string()
}

fn default_dmg() -> PathBuf {
    PathBuf::from("dmg")
}

fn default_daos() -> PathBuf {
    PathBuf::from("daos")
}

fn default_pool_size() -> String {
    "10G".to_string()
}

fn default_pool_label() -> String {
    "agent_failure".to_string()
}

fn default_container_label() -> String {
    "agent_failure_cont".to_string()
}

fn default_server_group() -> String {
    "daos_server".to_string()
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            log_tag: default_log_tag(),
            grace_secs: default_grace_secs(),
            expected_error_code: default_expected_error_code(),
            shutdown_marker: default_shutdown_marker(),
            job_id: default_job_id(),
            first_file: default_first_file(),
            second_file: default_second_file(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            mpirun: default_mpirun(),
            ior: default_ior(),
            mpi_type: default_mpi_type(),
            ppn: default_ppn(),
            np: None,
            slots: default_slots(),
            api: default_api(),
            block_size: default_block_size(),
            transfer_size: default_transfer_size(),
            flags: default_flags(),
            object_class: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dmg: default_dmg(),
            daos: default_daos(),
            dmg_config: None,
            size: default_pool_size(),
            label: default_pool_label(),
            container_label: default_container_label(),
            server_group: default_server_group(),
        }
    }
}

impl ScenarioConfig {
    /// Grace interval as a `Duration`.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.clients.is_empty() {
            return Err(ConfigError::Invalid("hosts.clients must not be empty".into()));
        }
        if self.hosts.clients.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid("hosts.clients contains a blank host".into()));
        }
        if self.scenario.service.trim().is_empty() {
            return Err(ConfigError::Invalid("scenario.service must not be blank".into()));
        }
        if self.scenario.expected_error_code.is_empty() {
            return Err(ConfigError::Invalid(
                "scenario.expected_error_code must not be empty".into(),
            ));
        }
        if self.scenario.first_file == self.scenario.second_file {
            return Err(ConfigError::Invalid(
                "scenario.first_file and scenario.second_file must differ".into(),
            ));
        }
        if self.workload.ppn == 0 {
            return Err(ConfigError::Invalid("workload.ppn must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is not usable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("parse config")
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [hosts]
            clients = ["client-1", "client-2"]
            "#,
        );

        assert_eq!(config.scenario.service, "daos_agent");
        assert_eq!(config.scenario.log_tag, "daos_agent");
        assert_eq!(config.scenario.grace_secs, 5);
        assert_eq!(config.scenario.expected_error_code, "-1005");
        assert_eq!(config.scenario.shutdown_marker, "shutting down");
        assert_eq!(config.scenario.job_id, 1);
        assert_eq!(config.hosts.ssh_timeout_secs, 30);
        assert_eq!(config.workload.mpi_type, "mpich");
        assert_eq!(config.pool.size, "10G");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_are_applied() {
        let config = parse(
            r#"
            [scenario]
            grace_secs = 2
            shutdown_marker = "agent stopped"

            [hosts]
            clients = ["c1"]
            ssh_user = "daos"

            [workload]
            ppn = 8
            np = 16
            "#,
        );

        assert_eq!(config.scenario.grace(), Duration::from_secs(2));
        assert_eq!(config.scenario.shutdown_marker, "agent stopped");
        assert_eq!(config.hosts.ssh_user.as_deref(), Some("daos"));
        assert_eq!(config.workload.ppn, 8);
        assert_eq!(config.workload.np, Some(16));
    }

    #[test]
    fn missing_hosts_section_fails_to_parse() {
        let result: Result<Config, _> = toml::from_str("[scenario]\ngrace_secs = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn empty_clients_rejected() {
        let config = parse("[hosts]\nclients = []\n");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn identical_run_files_rejected() {
        let config = parse(
            r#"
            [scenario]
            first_file = "same"
            second_file = "same"

            [hosts]
            clients = ["c1"]
            "#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/agent_failure.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_failure.toml");
        std::fs::write(&path, "[hosts]\nclients = [\"c1\"]\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.hosts.clients, vec!["c1".to_string()]);
    }
}
