//! Workload jobs: running IOR-style commands and capturing their outcome.
//!
//! A [`JobRunner`] turns every workload outcome, including launch and exit
//! failures, into a [`JobResult`]. Failures are data here; the orchestrator
//! decides what they mean.
//!
//! Jobs run either inline ([`JobRunner::run`]) or on a tokio task
//! ([`JobRunner::spawn`]). A spawned job's result is the task's return value,
//! so it only becomes visible through [`JobHandle::join`] once the command has
//! completed and all output has been captured.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::provision::Provisioned;

/// Identifier of a result slot.
pub type JobId = u32;

/// Everything a workload needs to run once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRequest {
    /// Result slot this run reports into.
    pub job_id: JobId,
    /// Absolute path of the file the workload writes.
    pub test_file: PathBuf,
    /// Client hosts the workload runs from.
    pub clients: Vec<String>,
    /// Pool and container the workload targets.
    pub resource: Provisioned,
}

/// Output of a workload that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error, verbatim.
    pub stderr: String,
    /// Parsed performance metrics, in report order.
    pub metrics: Vec<(String, String)>,
}

/// Workload command failures.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The command could not be started.
    #[error("failed to launch {command}: {source}")]
    Launch {
        /// Program that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("{command} exited with {exit_code}: {stderr}")]
    Exit {
        /// Program that failed.
        command: String,
        /// Exit code (-1 if killed by a signal).
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Preparing the command failed (hostfile, arguments).
    #[error("workload setup failed: {0}")]
    Setup(String),
}

/// A workload command against the storage system.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Run the workload to completion.
    async fn run(&self, request: &WorkloadRequest) -> Result<WorkloadOutput, WorkloadError>;
}

/// Outcome of one workload run.
///
/// Only constructed by [`JobRunner`] once the command has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    success: bool,
    error_detail: Option<String>,
    metrics: Vec<(String, String)>,
    stderr_text: String,
}

impl JobResult {
    pub(crate) fn succeeded(output: WorkloadOutput) -> Self {
        Self {
            success: true,
            error_detail: None,
            metrics: output.metrics,
            stderr_text: output.stderr,
        }
    }

    pub(crate) fn failed(cause: impl fmt::Display) -> Self {
        let cause = cause.to_string();
        let cause = if cause.trim().is_empty() {
            "unknown cause".to_string()
        } else {
            cause
        };
        Self {
            success: false,
            error_detail: Some(format!("workload failed: {}", cause)),
            metrics: Vec::new(),
            stderr_text: String::new(),
        }
    }

    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Failure cause, present iff `success()` is false.
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Parsed metrics (empty on failure).
    pub fn metrics(&self) -> &[(String, String)] {
        &self.metrics
    }

    /// Raw stderr of a successful run.
    pub fn stderr_text(&self) -> &str {
        &self.stderr_text
    }

    /// The error text a client would see: stderr on success, the failure
    /// cause otherwise.
    pub fn diagnostic_text(&self) -> &str {
        if self.success {
            &self.stderr_text
        } else {
            self.error_detail.as_deref().unwrap_or_default()
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "success, {} metrics", self.metrics.len())?;
            for (key, value) in &self.metrics {
                write!(f, ", {}={}", key, value)?;
            }
            if !self.stderr_text.is_empty() {
                write!(f, ", stderr: {}", self.stderr_text.trim_end())?;
            }
            Ok(())
        } else {
            write!(f, "failed: {}", self.diagnostic_text())
        }
    }
}

/// An in-flight job. Consumed by [`join`](JobHandle::join).
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    task: JoinHandle<JobResult>,
}

impl JobHandle {
    /// Slot the job reports into.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the job to finish and take its result.
    ///
    /// A worker that panicked or was aborted yields a failed result.
    pub async fn join(self) -> JobResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("job {} worker did not complete: {}", self.job_id, e);
                JobResult::failed(format!("job {} worker did not complete: {}", self.job_id, e))
            }
        }
    }
}

/// Published job results keyed by slot.
#[derive(Debug, Default)]
pub struct ResultSlots {
    slots: BTreeMap<JobId, JobResult>,
}

impl ResultSlots {
    /// Create an empty slot map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a result, returning whatever the slot held before.
    pub fn publish(&mut self, job_id: JobId, result: JobResult) -> Option<JobResult> {
        self.slots.insert(job_id, result)
    }

    /// Read a published result.
    pub fn get(&self, job_id: JobId) -> Option<&JobResult> {
        self.slots.get(&job_id)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Runs workload jobs against one provisioned pool/container.
#[derive(Clone)]
pub struct JobRunner {
    workload: Arc<dyn Workload>,
    resource: Provisioned,
}

impl JobRunner {
    /// Create a runner for `resource`.
    pub fn new(workload: Arc<dyn Workload>, resource: Provisioned) -> Self {
        Self { workload, resource }
    }

    /// Pool and container jobs target.
    pub fn resource(&self) -> &Provisioned {
        &self.resource
    }

    /// Build the request for one run. Relative file names resolve under `/`.
    pub fn request(&self, job_id: JobId, target_file: &str, clients: &[String]) -> WorkloadRequest {
        WorkloadRequest {
            job_id,
            test_file: Path::new("/").join(target_file),
            clients: clients.to_vec(),
            resource: self.resource.clone(),
        }
    }

    /// Run a job to completion.
    pub async fn run(&self, job_id: JobId, target_file: &str, clients: &[String]) -> JobResult {
        if clients.is_empty() {
            tracing::warn!("job {}: no client hosts given", job_id);
            return JobResult::failed("no client hosts to run from");
        }

        let request = self.request(job_id, target_file, clients);
        tracing::info!(
            "job {}: running workload on {} client(s), file {}",
            job_id,
            clients.len(),
            request.test_file.display()
        );

        match self.workload.run(&request).await {
            Ok(output) => {
                tracing::debug!("job {}: workload completed", job_id);
                JobResult::succeeded(output)
            }
            Err(e) => {
                tracing::info!("job {}: workload failed: {}", job_id, e);
                JobResult::failed(e)
            }
        }
    }

    /// Run a job on a tokio task.
    pub fn spawn(
        &self,
        job_id: JobId,
        target_file: impl Into<String>,
        clients: Vec<String>,
    ) -> JobHandle {
        let runner = self.clone();
        let target_file = target_file.into();
        let task = tokio::spawn(async move { runner.run(job_id, &target_file, &clients).await });
        JobHandle { job_id, task }
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWorkload;

    fn clients() -> Vec<String> {
        vec!["client-1".into(), "client-2".into()]
    }

    fn runner(workload: &ScriptedWorkload) -> JobRunner {
        JobRunner::new(Arc::new(workload.clone()), Provisioned::new("pool", "cont", "daos_server"))
    }

    #[tokio::test]
    async fn success_keeps_stderr_verbatim() {
        let workload = ScriptedWorkload::new();
        workload.queue_success(
            "  DER_NO_HDL(-1005)\n",
            vec![("write.max_mib".into(), "10.5".into())],
        );

        let result = runner(&workload).run(1, "test_file_1", &clients()).await;

        assert!(result.success());
        assert_eq!(result.stderr_text(), "  DER_NO_HDL(-1005)\n");
        assert_eq!(result.metrics().len(), 1);
        assert!(result.error_detail().is_none());
    }

    #[tokio::test]
    async fn exit_failure_becomes_data() {
        let workload = ScriptedWorkload::new();
        workload.queue_exit_failure(1, "pool disconnect failed: -1005");

        let result = runner(&workload).run(1, "test_file_1", &clients()).await;

        assert!(!result.success());
        let detail = result.error_detail().expect("detail present");
        assert!(detail.contains("-1005"));
        assert!(detail.contains("exited with 1"));
        assert!(result.metrics().is_empty());
    }

    #[tokio::test]
    async fn launch_failure_becomes_data() {
        let workload = ScriptedWorkload::new();
        workload.queue_launch_failure("No such file or directory");

        let result = runner(&workload).run(7, "f", &clients()).await;

        assert!(!result.success());
        assert!(result.error_detail().unwrap().contains("No such file or directory"));
    }

    #[tokio::test]
    async fn empty_hosts_fail_without_running() {
        let workload = ScriptedWorkload::new();

        let result = runner(&workload).run(1, "f", &[]).await;

        assert!(!result.success());
        assert!(result.error_detail().unwrap().contains("no client hosts"));
        assert_eq!(workload.call_count(), 0);
    }

    #[tokio::test]
    async fn request_resolves_under_root() {
        let workload = ScriptedWorkload::new();
        workload.queue_success("", vec![]);

        runner(&workload).run(3, "test_file_2", &clients()).await;

        let requests = workload.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job_id, 3);
        assert_eq!(requests[0].test_file, PathBuf::from("/test_file_2"));
        assert_eq!(requests[0].clients, clients());
        assert_eq!(requests[0].resource.pool, "pool");
    }

    #[tokio::test]
    async fn spawned_job_publishes_on_join() {
        let workload = ScriptedWorkload::new();
        workload.queue_success("late stderr", vec![]);
        workload.set_delay(std::time::Duration::from_millis(50));

        let handle = runner(&workload).spawn(1, "test_file_1", clients());
        assert_eq!(handle.job_id(), 1);

        let result = handle.join().await;
        assert!(result.success());
        assert_eq!(result.stderr_text(), "late stderr");
    }

    #[test]
    fn failed_result_never_has_empty_detail() {
        let result = JobResult::failed("   ");
        assert_eq!(result.error_detail(), Some("workload failed: unknown cause"));
        assert_eq!(result.diagnostic_text(), "workload failed: unknown cause");
    }

    #[test]
    fn slots_overwrite_returns_previous() {
        let mut slots = ResultSlots::new();
        assert!(slots.is_empty());
        assert!(slots.publish(1, JobResult::failed("first")).is_none());

        let previous = slots.publish(1, JobResult::succeeded(WorkloadOutput::default()));
        assert!(!previous.unwrap().success());
        assert!(slots.get(1).unwrap().success());
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn display_includes_metrics_and_stderr() {
        let result = JobResult::succeeded(WorkloadOutput {
            stdout: String::new(),
            stderr: "oops\n".into(),
            metrics: vec![("write.mean_mib".into(), "3.0".into())],
        });
        let text = result.to_string();
        assert!(text.contains("write.mean_mib=3.0"));
        assert!(text.contains("stderr: oops"));
    }
}
