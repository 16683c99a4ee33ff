//! SSH execution primitives for remote hosts.
//!
//! Uses `tokio::process::Command` to shell out to `ssh`.
//! Key-based authentication must be pre-configured for the harness user.

use thiserror::Error;

/// Errors from SSH operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// SSH command failed to execute (process spawn error).
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// SSH command returned non-zero exit code.
    #[error("ssh command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

/// Result of executing a command via SSH.
#[derive(Debug, Clone)]
pub struct SshResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl SshResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A remote host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Hostname or IP address.
    pub host: String,
    /// SSH username. `None` uses the local ssh config.
    pub user: Option<String>,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl SshTarget {
    /// Create a target for `host` with an optional user.
    pub fn new(host: impl Into<String>, user: Option<String>, connect_timeout_secs: u64) -> Self {
        Self {
            host: host.into(),
            user,
            connect_timeout_secs,
        }
    }

    /// The `user@host` (or bare `host`) destination argument.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Full argument vector passed to `ssh` for `cmd`.
    pub fn ssh_args(&self, cmd: &str) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".into(),
            "BatchMode=yes".into(),
            self.destination(),
            cmd.to_string(),
        ]
    }

    /// Execute a command on the remote machine via SSH.
    ///
    /// Returns the raw result including exit code, stdout, and stderr.
    /// Does NOT fail on non-zero exit — use `exec_ok` for that.
    pub async fn exec(&self, cmd: &str) -> Result<SshResult, SshError> {
        tracing::debug!("ssh {}: {}", self.destination(), cmd);
        let output = tokio::process::Command::new("ssh")
            .args(self.ssh_args(cmd))
            .output()
            .await?;

        Ok(SshResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Execute a command on the remote machine, failing on non-zero exit.
    pub async fn exec_ok(&self, cmd: &str) -> Result<SshResult, SshError> {
        let result = self.exec(cmd).await?;
        if !result.success() {
            return Err(SshError::CommandFailed {
                host: self.host.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

/// Quote a value for a POSIX shell on the remote side.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_with_user() {
        let target = SshTarget::new("client-1", Some("daos".into()), 30);
        assert_eq!(target.destination(), "daos@client-1");
    }

    #[test]
    fn destination_without_user() {
        let target = SshTarget::new("client-1", None, 30);
        assert_eq!(target.destination(), "client-1");
    }

    #[test]
    fn ssh_args_carry_timeout_and_batch_mode() {
        let target = SshTarget::new("10.0.0.5", None, 12);
        let args = target.ssh_args("uptime");
        assert!(args.contains(&"ConnectTimeout=12".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("uptime"));
    }

    #[test]
    fn quote_plain_and_spaced_values() {
        assert_eq!(shell_quote("daos_agent"), "daos_agent");
        assert_eq!(shell_quote("2026-10-17 10:00:00"), "'2026-10-17 10:00:00'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    #[ignore = "requires cluster"]
    async fn ssh_exec_localhost_whoami() {
        let target = SshTarget::new("localhost", None, 5);
        let result = target.exec_ok("whoami").await.expect("ssh to localhost failed");
        assert!(!result.stdout.trim().is_empty());
    }
}
