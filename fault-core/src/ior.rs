//! IOR under mpirun as the scenario workload.
//!
//! Builds the mpirun + IOR command line for a [`WorkloadRequest`], writes a
//! hostfile for the client hosts, runs the command locally and parses the
//! IOR summary table into metrics.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WorkloadConfig;
use crate::job::{Workload, WorkloadError, WorkloadOutput, WorkloadRequest};

/// Lines of stdout kept as the failure text when IOR writes nothing to stderr.
const STDOUT_TAIL_LINES: usize = 20;

/// Runs IOR through mpirun from the local machine.
#[derive(Debug, Clone)]
pub struct MpirunIor {
    config: WorkloadConfig,
}

impl MpirunIor {
    /// Create a workload from config.
    pub fn new(config: WorkloadConfig) -> Self {
        Self { config }
    }

    /// Hostfile contents for `clients`.
    pub fn hostfile_contents(&self, clients: &[String]) -> String {
        clients
            .iter()
            .map(|host| format!("{} slots={}\n", host, self.config.slots))
            .collect()
    }

    /// mpirun launcher arguments (before the IOR binary).
    pub fn mpirun_args(&self, hostfile: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(np) = self.config.np {
            args.push("-np".to_string());
            args.push(np.to_string());
        }
        match self.config.mpi_type.as_str() {
            "openmpi" => {
                args.push("--map-by".to_string());
                args.push(format!("ppr:{}:node", self.config.ppn));
                args.push("--hostfile".to_string());
            }
            _ => {
                args.push("-ppn".to_string());
                args.push(self.config.ppn.to_string());
                args.push("-hostfile".to_string());
            }
        }
        args.push(hostfile.display().to_string());
        args
    }

    /// IOR arguments for `request`.
    pub fn ior_args(&self, request: &WorkloadRequest) -> Vec<String> {
        let mut args = vec![
            "-a".to_string(),
            self.config.api.clone(),
            "-b".to_string(),
            self.config.block_size.clone(),
            "-t".to_string(),
            self.config.transfer_size.clone(),
        ];
        args.extend(self.config.flags.split_whitespace().map(str::to_string));
        args.push("-o".to_string());
        args.push(request.test_file.display().to_string());
        args.push(format!("--dfs.pool={}", request.resource.pool));
        args.push(format!("--dfs.cont={}", request.resource.container));
        args.push(format!("--dfs.group={}", request.resource.server_group));
        if let Some(oclass) = &self.config.object_class {
            args.push(format!("--dfs.oclass={}", oclass));
        }
        args
    }

    /// Complete command line with a placeholder hostfile path, for display.
    pub fn command_line(&self, request: &WorkloadRequest) -> String {
        let hostfile = PathBuf::from("<hostfile>");
        let mut parts = vec![self.config.mpirun.display().to_string()];
        parts.extend(self.mpirun_args(&hostfile));
        parts.push(self.config.ior.display().to_string());
        parts.extend(self.ior_args(request));
        parts.join(" ")
    }

    fn write_hostfile(&self, dir: &Path, clients: &[String]) -> Result<PathBuf, WorkloadError> {
        let path = dir.join("hostfile_clients");
        let mut file = std::fs::File::create(&path)
            .map_err(|e| WorkloadError::Setup(format!("create hostfile: {}", e)))?;
        file.write_all(self.hostfile_contents(clients).as_bytes())
            .map_err(|e| WorkloadError::Setup(format!("write hostfile: {}", e)))?;
        Ok(path)
    }
}

#[async_trait]
impl Workload for MpirunIor {
    async fn run(&self, request: &WorkloadRequest) -> Result<WorkloadOutput, WorkloadError> {
        let workdir = tempfile::tempdir()
            .map_err(|e| WorkloadError::Setup(format!("create work dir: {}", e)))?;
        let hostfile = self.write_hostfile(workdir.path(), &request.clients)?;

        let mut args = self.mpirun_args(&hostfile);
        args.push(self.config.ior.display().to_string());
        args.extend(self.ior_args(request));

        let command = self.config.mpirun.display().to_string();
        tracing::debug!("job {}: {} {}", request.job_id, command, args.join(" "));

        let output = tokio::process::Command::new(&self.config.mpirun)
            .args(&args)
            .output()
            .await
            .map_err(|e| WorkloadError::Launch {
                command: command.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let stderr = if stderr.trim().is_empty() {
                tail_lines(&stdout, STDOUT_TAIL_LINES)
            } else {
                stderr
            };
            return Err(WorkloadError::Exit {
                command,
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let metrics = parse_ior_metrics(&stdout);
        Ok(WorkloadOutput {
            stdout,
            stderr,
            metrics,
        })
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Parse the "Summary of all tests" table of IOR output.
///
/// Each `write`/`read` row becomes a run of `<op>.<column>` pairs in column
/// order. Repeated column names get a numeric suffix.
pub fn parse_ior_metrics(output: &str) -> Vec<(String, String)> {
    let mut lines = output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Summary of all tests:"))
        .skip(1)
        .skip_while(|line| line.trim().is_empty());

    let header = match lines.next() {
        Some(line) if line.trim_start().starts_with("Operation") => column_names(line),
        _ => return Vec::new(),
    };

    let mut metrics = Vec::new();
    for line in lines {
        let mut fields = line.split_whitespace();
        let op = match fields.next() {
            Some(op @ ("write" | "read")) => op,
            _ => break,
        };
        for (name, value) in header.iter().zip(fields) {
            metrics.push((format!("{}.{}", op, name), value.to_string()));
        }
    }
    metrics
}

fn column_names(header: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for raw in header.split_whitespace().skip(1) {
        let base: String = raw
            .to_ascii_lowercase()
            .replace('(', "_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}
