//! Pool and container provisioning.
//!
//! The scenario needs one pool and one POSIX container for its workload.
//! [`DmgProvisioner`] creates them with the `dmg` and `daos` tools and
//! destroys them again once the scenario is over.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PoolConfig;

/// Identifiers of a provisioned pool and container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    /// Pool label or UUID.
    pub pool: String,
    /// Container label or UUID.
    pub container: String,
    /// DAOS server group the pool belongs to.
    pub server_group: String,
}

impl Provisioned {
    /// Build identifiers from their parts.
    pub fn new(
        pool: impl Into<String>,
        container: impl Into<String>,
        server_group: impl Into<String>,
    ) -> Self {
        Self {
            pool: pool.into(),
            container: container.into(),
            server_group: server_group.into(),
        }
    }
}

/// Provisioning failures. Fatal to a scenario when acquiring; collected
/// into the report when releasing.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provisioning tool could not be started.
    #[error("failed to launch {command}: {source}")]
    Launch {
        /// Program that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A provisioning tool exited non-zero.
    #[error("{step} failed: exit={exit_code}, stderr={stderr}")]
    Failed {
        /// Which step failed (pool create, container destroy, ...).
        step: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Provisioning refused for another reason.
    #[error("provisioning unavailable: {0}")]
    Unavailable(String),
}

/// Acquires the pool/container a scenario runs against.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create (or look up) the resource.
    async fn provision(&self) -> Result<Provisioned, ProvisionError>;

    /// Destroy a resource returned by [`provision`](Self::provision).
    async fn release(&self, resource: &Provisioned) -> Result<(), ProvisionError>;
}

/// Creates a pool with `dmg` and a container with `daos`.
#[derive(Debug, Clone)]
pub struct DmgProvisioner {
    dmg: PathBuf,
    daos: PathBuf,
    dmg_config: Option<PathBuf>,
    size: String,
    pool_label: String,
    container_label: String,
    server_group: String,
}

impl DmgProvisioner {
    /// Build a provisioner from config. Labels get a unique suffix so
    /// repeated runs never collide.
    pub fn from_config(config: &PoolConfig) -> Self {
        let suffix = uuid::Uuid::new_v4().as_simple().to_string();
        Self {
            dmg: config.dmg.clone(),
            daos: config.daos.clone(),
            dmg_config: config.dmg_config.clone(),
            size: config.size.clone(),
            pool_label: format!("{}_{}", config.label, &suffix[..8]),
            container_label: format!("{}_{}", config.container_label, &suffix[..8]),
            server_group: config.server_group.clone(),
        }
    }

    /// Label the pool will be created with.
    pub fn pool_label(&self) -> &str {
        &self.pool_label
    }

    /// Label the container will be created with.
    pub fn container_label(&self) -> &str {
        &self.container_label
    }

    fn dmg_prefix(&self) -> Vec<String> {
        match &self.dmg_config {
            Some(cfg) => vec!["-o".to_string(), cfg.display().to_string()],
            None => Vec::new(),
        }
    }

    /// Arguments to `dmg` for pool creation.
    pub fn pool_create_args(&self) -> Vec<String> {
        let mut args = self.dmg_prefix();
        args.extend([
            "pool".to_string(),
            "create".to_string(),
            format!("--size={}", self.size),
            format!("--sys={}", self.server_group),
            self.pool_label.clone(),
        ]);
        args
    }

    /// Arguments to `daos` for container creation.
    pub fn container_create_args(&self) -> Vec<String> {
        vec![
            "container".to_string(),
            "create".to_string(),
            "--type=POSIX".to_string(),
            format!("--sys-name={}", self.server_group),
            self.pool_label.clone(),
            self.container_label.clone(),
        ]
    }

    /// Arguments to `daos` for destroying `resource`'s container.
    pub fn container_destroy_args(&self, resource: &Provisioned) -> Vec<String> {
        vec![
            "container".to_string(),
            "destroy".to_string(),
            "--force".to_string(),
            format!("--sys-name={}", resource.server_group),
            resource.pool.clone(),
            resource.container.clone(),
        ]
    }

    /// Arguments to `dmg` for destroying `resource`'s pool.
    pub fn pool_destroy_args(&self, resource: &Provisioned) -> Vec<String> {
        let mut args = self.dmg_prefix();
        args.extend([
            "pool".to_string(),
            "destroy".to_string(),
            "--force".to_string(),
            resource.pool.clone(),
        ]);
        args
    }

    /// Identifiers of the pool and container this provisioner creates.
    pub fn resource(&self) -> Provisioned {
        Provisioned::new(
            self.pool_label.clone(),
            self.container_label.clone(),
            self.server_group.clone(),
        )
    }

    /// Full command lines, for display.
    pub fn command_lines(&self) -> Vec<String> {
        vec![
            format!("{} {}", self.dmg.display(), self.pool_create_args().join(" ")),
            format!("{} {}", self.daos.display(), self.container_create_args().join(" ")),
        ]
    }

    /// Full release command lines for the resource this provisioner creates.
    pub fn release_command_lines(&self) -> Vec<String> {
        let resource = self.resource();
        vec![
            format!(
                "{} {}",
                self.daos.display(),
                self.container_destroy_args(&resource).join(" ")
            ),
            format!(
                "{} {}",
                self.dmg.display(),
                self.pool_destroy_args(&resource).join(" ")
            ),
        ]
    }

    async fn run_step(
        &self,
        step: &str,
        program: &Path,
        args: Vec<String>,
    ) -> Result<(), ProvisionError> {
        tracing::info!("{}: {} {}", step, program.display(), args.join(" "));
        let output = tokio::process::Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| ProvisionError::Launch {
                command: program.display().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProvisionError::Failed {
                step: step.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for DmgProvisioner {
    async fn provision(&self) -> Result<Provisioned, ProvisionError> {
        self.run_step("pool create", &self.dmg, self.pool_create_args())
            .await?;
        self.run_step("container create", &self.daos, self.container_create_args())
            .await?;

        Ok(self.resource())
    }

    async fn release(&self, resource: &Provisioned) -> Result<(), ProvisionError> {
        // The pool goes even if the container would not.
        let container = self
            .run_step(
                "container destroy",
                &self.daos,
                self.container_destroy_args(resource),
            )
            .await;
        let pool = self
            .run_step("pool destroy", &self.dmg, self.pool_destroy_args(resource))
            .await;
        container.and(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique_per_provisioner() {
        let config = PoolConfig::default();
        let a = DmgProvisioner::from_config(&config);
        let b = DmgProvisioner::from_config(&config);

        assert_ne!(a.pool_label(), b.pool_label());
        assert!(a.pool_label().starts_with("agent_failure_"));
        assert!(a.container_label().starts_with("agent_failure_cont_"));
    }

    #[test]
    fn pool_args_include_config_file_when_set() {
        let config = PoolConfig {
            dmg_config: Some(PathBuf::from("/etc/daos/daos_control.yml")),
            ..PoolConfig::default()
        };
        let provisioner = DmgProvisioner::from_config(&config);
        let args = provisioner.pool_create_args();

        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "/etc/daos/daos_control.yml");
        assert!(args.contains(&"--size=10G".to_string()));
        assert_eq!(args.last().map(String::as_str), Some(provisioner.pool_label()));
    }

    #[test]
    fn container_args_target_the_pool() {
        let provisioner = DmgProvisioner::from_config(&PoolConfig::default());
        let args = provisioner.container_create_args();

        assert!(args.contains(&"--type=POSIX".to_string()));
        assert_eq!(args[args.len() - 2], provisioner.pool_label());
        assert_eq!(args[args.len() - 1], provisioner.container_label());
    }

    #[test]
    fn release_args_name_the_provisioned_resource() {
        let config = PoolConfig {
            dmg_config: Some(PathBuf::from("/etc/daos/daos_control.yml")),
            ..PoolConfig::default()
        };
        let provisioner = DmgProvisioner::from_config(&config);
        let resource = Provisioned::new("pool_a", "cont_a", "daos_server");

        assert_eq!(
            provisioner.container_destroy_args(&resource),
            [
                "container",
                "destroy",
                "--force",
                "--sys-name=daos_server",
                "pool_a",
                "cont_a"
            ]
        );
        assert_eq!(
            provisioner.pool_destroy_args(&resource),
            [
                "-o",
                "/etc/daos/daos_control.yml",
                "pool",
                "destroy",
                "--force",
                "pool_a"
            ]
        );
    }

    #[test]
    fn release_command_lines_use_own_labels() {
        let provisioner = DmgProvisioner::from_config(&PoolConfig::default());
        let lines = provisioner.release_command_lines();

        assert!(lines[0].starts_with("daos container destroy"));
        assert!(lines[0].ends_with(provisioner.container_label()));
        assert!(lines[1].starts_with("dmg pool destroy"));
        assert!(lines[1].ends_with(provisioner.pool_label()));
    }

    #[tokio::test]
    async fn release_reports_the_container_failure_first() {
        let config = PoolConfig {
            daos: PathBuf::from("/nonexistent/daos-binary"),
            dmg: PathBuf::from("/nonexistent/dmg-binary"),
            ..PoolConfig::default()
        };
        let provisioner = DmgProvisioner::from_config(&config);
        let resource = Provisioned::new("pool_a", "cont_a", "daos_server");

        let err = provisioner.release(&resource).await.unwrap_err();
        assert!(err.to_string().contains("daos-binary"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let config = PoolConfig {
            dmg: PathBuf::from("/nonexistent/dmg-binary"),
            ..PoolConfig::default()
        };
        let err = DmgProvisioner::from_config(&config)
            .provision()
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Launch { .. }));
    }
}
