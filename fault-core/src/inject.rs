//! Stopping and restarting remote services.
//!
//! [`FailureInjector`] stops a service across hosts and remembers which hosts
//! it touched so [`FailureInjector::restart_service`] brings back exactly those.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::HostsConfig;
use crate::ssh::{shell_quote, SshTarget};

/// Service lifecycle failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service failed to start on one or more hosts.
    #[error("failed to start {service}: {}", failures.join("; "))]
    StartFailed {
        /// Service name.
        service: String,
        /// One entry per failing host.
        failures: Vec<String>,
    },
}

/// Injector failures.
#[derive(Debug, Error)]
pub enum InjectorError {
    /// Restart requested for a service that was never stopped.
    #[error("{service} was never stopped, nothing to restart")]
    NothingStopped {
        /// Service name.
        service: String,
    },

    /// Restart failed.
    #[error("restart failed: {0}")]
    Restart(#[from] ServiceError),
}

/// Starts and stops a named service on remote hosts.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Stop `service` on every host. Returns one error string per host that
    /// failed, empty on full success.
    async fn stop(&self, service: &str, hosts: &[String]) -> Vec<String>;

    /// Start `service` on every host.
    async fn start(&self, service: &str, hosts: &[String]) -> Result<(), ServiceError>;
}

/// systemd units driven over SSH.
#[derive(Debug, Clone)]
pub struct SystemdOverSsh {
    user: Option<String>,
    connect_timeout_secs: u64,
    prefix: String,
}

impl SystemdOverSsh {
    /// Build from the hosts section of the config.
    pub fn from_config(config: &HostsConfig) -> Self {
        Self {
            user: config.ssh_user.clone(),
            connect_timeout_secs: config.ssh_timeout_secs,
            prefix: config.remote_prefix.clone(),
        }
    }

    /// Remote command for `systemctl <action> <service>`.
    pub fn unit_command(&self, action: &str, service: &str) -> String {
        let cmd = format!("systemctl {} {}", action, shell_quote(service));
        if self.prefix.trim().is_empty() {
            cmd
        } else {
            format!("{} {}", self.prefix.trim(), cmd)
        }
    }

    fn target(&self, host: &str) -> SshTarget {
        SshTarget::new(host, self.user.clone(), self.connect_timeout_secs)
    }

    /// Run `systemctl <action>` on all hosts concurrently, returning per-host failures.
    async fn fan_out(&self, action: &str, service: &str, hosts: &[String]) -> Vec<String> {
        let cmd = self.unit_command(action, service);
        let attempts = hosts.iter().map(|host| {
            let target = self.target(host);
            let cmd = cmd.clone();
            async move {
                match target.exec_ok(&cmd).await {
                    Ok(_) => None,
                    Err(e) => Some(format!(
                        "{}: failed to {} {}: {}",
                        target.host, action, service, e
                    )),
                }
            }
        });
        join_all(attempts).await.into_iter().flatten().collect()
    }
}

#[async_trait]
impl ServiceManager for SystemdOverSsh {
    async fn stop(&self, service: &str, hosts: &[String]) -> Vec<String> {
        self.fan_out("stop", service, hosts).await
    }

    async fn start(&self, service: &str, hosts: &[String]) -> Result<(), ServiceError> {
        let failures = self.fan_out("start", service, hosts).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::StartFailed {
                service: service.to_string(),
                failures,
            })
        }
    }
}

/// Stops a service mid-workload and restarts it afterwards.
pub struct FailureInjector {
    manager: Arc<dyn ServiceManager>,
    stopped: HashMap<String, Vec<String>>,
}

impl FailureInjector {
    /// Create an injector over `manager`.
    pub fn new(manager: Arc<dyn ServiceManager>) -> Self {
        Self {
            manager,
            stopped: HashMap::new(),
        }
    }

    /// Stop `service` on `hosts`. Returns when every host has been attempted;
    /// the returned strings name the host and cause of each failure.
    pub async fn stop_service(&mut self, service: &str, hosts: &[String]) -> Vec<String> {
        tracing::info!("stopping {} on {} host(s)", service, hosts.len());
        let errors = self.manager.stop(service, hosts).await;
        let targeted = self.stopped.entry(service.to_string()).or_default();
        for host in hosts {
            if !targeted.contains(host) {
                targeted.push(host.clone());
            }
        }
        errors
    }

    /// Hosts `service` was stopped on.
    pub fn stopped_hosts(&self, service: &str) -> &[String] {
        self.stopped.get(service).map(Vec::as_slice).unwrap_or_default()
    }

    /// Start `service` again on every host it was stopped on.
    pub async fn restart_service(&mut self, service: &str) -> Result<(), InjectorError> {
        let hosts = self
            .stopped
            .get(service)
            .cloned()
            .ok_or_else(|| InjectorError::NothingStopped {
                service: service.to_string(),
            })?;

        tracing::info!("restarting {} on {} host(s)", service, hosts.len());
        self.manager.start(service, &hosts).await?;
        self.stopped.remove(service);
        Ok(())
    }
}

impl std::fmt::Debug for FailureInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureInjector")
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServiceManager;

    fn hosts() -> Vec<String> {
        vec!["c1".into(), "c2".into()]
    }

    #[test]
    fn unit_command_uses_prefix() {
        let manager = SystemdOverSsh {
            user: None,
            connect_timeout_secs: 30,
            prefix: "sudo -n".into(),
        };
        assert_eq!(manager.unit_command("stop", "daos_agent"), "sudo -n systemctl stop daos_agent");
    }

    #[test]
    fn unit_command_without_prefix() {
        let manager = SystemdOverSsh {
            user: None,
            connect_timeout_secs: 30,
            prefix: "  ".into(),
        };
        assert_eq!(manager.unit_command("start", "daos_agent"), "systemctl start daos_agent");
    }

    #[tokio::test]
    async fn stop_errors_are_returned_per_host() {
        let fake = FakeServiceManager::new();
        fake.fail_stop_on("c2", "unit not loaded");
        let mut injector = FailureInjector::new(Arc::new(fake.clone()));

        let errors = injector.stop_service("daos_agent", &hosts()).await;

        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("c2"));
        assert!(errors[0].contains("unit not loaded"));
        assert_eq!(injector.stopped_hosts("daos_agent"), hosts().as_slice());
    }

    #[tokio::test]
    async fn restart_targets_stopped_hosts() {
        let fake = FakeServiceManager::new();
        let mut injector = FailureInjector::new(Arc::new(fake.clone()));

        injector.stop_service("daos_agent", &hosts()).await;
        injector.restart_service("daos_agent").await.unwrap();

        assert_eq!(fake.started(), vec![("daos_agent".to_string(), hosts())]);
        assert!(injector.stopped_hosts("daos_agent").is_empty());
    }

    #[tokio::test]
    async fn restart_without_stop_is_an_error() {
        let fake = FakeServiceManager::new();
        let mut injector = FailureInjector::new(Arc::new(fake.clone()));

        let err = injector.restart_service("daos_agent").await.unwrap_err();

        assert!(matches!(err, InjectorError::NothingStopped { .. }));
        assert!(fake.started().is_empty());
    }

    #[tokio::test]
    async fn restart_failure_is_surfaced() {
        let fake = FakeServiceManager::new();
        fake.fail_start("agent failed to bind socket");
        let mut injector = FailureInjector::new(Arc::new(fake.clone()));

        injector.stop_service("daos_agent", &hosts()).await;
        let err = injector.restart_service("daos_agent").await.unwrap_err();

        assert!(matches!(err, InjectorError::Restart(_)));
        assert!(err.to_string().contains("agent failed to bind socket"));
    }
}
