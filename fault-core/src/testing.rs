//! Scripted collaborators for exercising the scenario without a cluster.
//!
//! Each fake is cheap to clone; clones share state, so a test keeps one
//! handle for scripting and inspection and hands another to the code under
//! test.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::inject::{ServiceError, ServiceManager};
use crate::job::{Workload, WorkloadError, WorkloadOutput, WorkloadRequest};
use crate::journal::{
    HostFailure, HostLog, JournalError, JournalReply, JournalSource, TimeWindow,
};
use crate::provision::{ProvisionError, Provisioned, Provisioner};
use crate::scenario::{Collaborators, ScenarioOrchestrator, ScenarioSettings};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ===========================================
// Workload
// ===========================================

#[derive(Debug)]
enum Scripted {
    Success {
        stderr: String,
        metrics: Vec<(String, String)>,
    },
    Exit {
        exit_code: i32,
        stderr: String,
    },
    Launch(String),
}

/// When one scripted run started and, once it returned, finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpan {
    /// Run entered the workload.
    pub started: Instant,
    /// Run returned; `None` while still in flight.
    pub finished: Option<Instant>,
}

#[derive(Debug, Default)]
struct WorkloadInner {
    outcomes: VecDeque<Scripted>,
    requests: Vec<WorkloadRequest>,
    spans: Vec<RunSpan>,
    delay: Option<Duration>,
}

/// Workload returning queued outcomes in order and recording every request.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorkload {
    inner: Arc<Mutex<WorkloadInner>>,
}

impl ScriptedWorkload {
    /// Create a workload with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful run.
    pub fn queue_success(&self, stderr: &str, metrics: Vec<(String, String)>) {
        lock(&self.inner).outcomes.push_back(Scripted::Success {
            stderr: stderr.to_string(),
            metrics,
        });
    }

    /// Queue a run that exits non-zero.
    pub fn queue_exit_failure(&self, exit_code: i32, stderr: &str) {
        lock(&self.inner).outcomes.push_back(Scripted::Exit {
            exit_code,
            stderr: stderr.to_string(),
        });
    }

    /// Queue a run that fails to launch.
    pub fn queue_launch_failure(&self, cause: &str) {
        lock(&self.inner)
            .outcomes
            .push_back(Scripted::Launch(cause.to_string()));
    }

    /// Make every run take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.inner).delay = Some(delay);
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<WorkloadRequest> {
        lock(&self.inner).requests.clone()
    }

    /// Number of runs attempted.
    pub fn call_count(&self) -> usize {
        lock(&self.inner).requests.len()
    }

    /// Start and finish times of each run, in call order.
    pub fn spans(&self) -> Vec<RunSpan> {
        lock(&self.inner).spans.clone()
    }
}

#[async_trait]
impl Workload for ScriptedWorkload {
    async fn run(&self, request: &WorkloadRequest) -> Result<WorkloadOutput, WorkloadError> {
        let (index, outcome, delay) = {
            let mut inner = lock(&self.inner);
            inner.requests.push(request.clone());
            inner.spans.push(RunSpan {
                started: Instant::now(),
                finished: None,
            });
            (inner.spans.len() - 1, inner.outcomes.pop_front(), inner.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.inner).spans[index].finished = Some(Instant::now());

        match outcome {
            Some(Scripted::Success { stderr, metrics }) => Ok(WorkloadOutput {
                stdout: String::new(),
                stderr,
                metrics,
            }),
            Some(Scripted::Exit { exit_code, stderr }) => Err(WorkloadError::Exit {
                command: "ior".to_string(),
                exit_code,
                stderr,
            }),
            Some(Scripted::Launch(cause)) => Err(WorkloadError::Launch {
                command: "mpirun".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, cause),
            }),
            None => Err(WorkloadError::Setup("no scripted outcome left".to_string())),
        }
    }
}

// ===========================================
// Journal
// ===========================================

#[derive(Debug, Clone)]
struct JournalEntry {
    host: String,
    tag: String,
    at: DateTime<Local>,
    message: String,
}

#[derive(Debug, Default)]
struct JournalInner {
    entries: Vec<JournalEntry>,
    windows: Vec<TimeWindow>,
    fail_next_query: Option<String>,
    unreachable: HashMap<String, String>,
}

/// In-memory journal with timestamped entries, filtered by window like the real one.
#[derive(Debug, Clone, Default)]
pub struct FakeJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl FakeJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry for `host` under `tag` at `at`.
    pub fn log_at(&self, host: &str, tag: &str, at: DateTime<Local>, message: &str) {
        lock(&self.inner).entries.push(JournalEntry {
            host: host.to_string(),
            tag: tag.to_string(),
            at,
            message: message.to_string(),
        });
    }

    /// Have `host` log "shutting down" under the stopped service's tag while
    /// `services` is stopping it.
    pub fn log_shutdown_during_stop(&self, services: &FakeServiceManager, host: &str) {
        services.log_during_stop(self, host, "shutting down");
    }

    /// Cause the next query to fail with `cause`.
    pub fn fail_next_query(&self, cause: &str) {
        lock(&self.inner).fail_next_query = Some(cause.to_string());
    }

    /// Make every query of `host` fail with `cause`; other hosts still answer.
    pub fn fail_host(&self, host: &str, cause: &str) {
        lock(&self.inner)
            .unreachable
            .insert(host.to_string(), cause.to_string());
    }

    /// Windows queried so far.
    pub fn queried_windows(&self) -> Vec<TimeWindow> {
        lock(&self.inner).windows.clone()
    }
}

#[async_trait]
impl JournalSource for FakeJournal {
    async fn query(
        &self,
        hosts: &[String],
        tag: &str,
        window: &TimeWindow,
    ) -> Result<JournalReply, JournalError> {
        let mut inner = lock(&self.inner);
        inner.windows.push(*window);

        if let Some(cause) = inner.fail_next_query.take() {
            return Err(JournalError::QueryFailed {
                failures: vec![cause],
            });
        }

        let mut reply = JournalReply::default();
        for host in hosts {
            if let Some(cause) = inner.unreachable.get(host) {
                reply.failures.push(HostFailure {
                    host: host.clone(),
                    cause: cause.clone(),
                });
                continue;
            }
            let data: String = inner
                .entries
                .iter()
                .filter(|e| &e.host == host && e.tag == tag && window.contains(e.at))
                .map(|e| {
                    format!(
                        "{} {} {}: {}\n",
                        e.at.format("%b %d %H:%M:%S"),
                        e.host,
                        e.tag,
                        e.message
                    )
                })
                .collect();
            reply.records.push(HostLog {
                host: host.clone(),
                data,
            });
        }
        Ok(reply)
    }
}

// ===========================================
// Service manager
// ===========================================

#[derive(Debug, Default)]
struct ServicesInner {
    stop_failures: HashMap<String, String>,
    start_failure: Option<String>,
    stop_delay: Option<Duration>,
    stopped: Vec<(String, Vec<String>)>,
    stopped_at: Vec<Instant>,
    started: Vec<(String, Vec<String>)>,
    stop_log: Vec<(FakeJournal, String, String)>,
}

/// Service manager that records calls, fails on demand and can write
/// journal entries while a stop is in progress.
#[derive(Debug, Clone, Default)]
pub struct FakeServiceManager {
    inner: Arc<Mutex<ServicesInner>>,
}

impl FakeServiceManager {
    /// Create a manager where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail stops on `host` with `cause`.
    pub fn fail_stop_on(&self, host: &str, cause: &str) {
        lock(&self.inner)
            .stop_failures
            .insert(host.to_string(), cause.to_string());
    }

    /// Fail every start with `cause`.
    pub fn fail_start(&self, cause: &str) {
        lock(&self.inner).start_failure = Some(cause.to_string());
    }

    /// Sleep `delay` before and after the stop takes effect.
    pub fn set_stop_delay(&self, delay: Duration) {
        lock(&self.inner).stop_delay = Some(delay);
    }

    /// While stopping, have `host` log `message` into `journal` under the service's name.
    pub fn log_during_stop(&self, journal: &FakeJournal, host: &str, message: &str) {
        lock(&self.inner)
            .stop_log
            .push((journal.clone(), host.to_string(), message.to_string()));
    }

    /// Stop calls so far.
    pub fn stopped(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.inner).stopped.clone()
    }

    /// When each stop took effect, in call order.
    pub fn stopped_at(&self) -> Vec<Instant> {
        lock(&self.inner).stopped_at.clone()
    }

    /// Start calls so far.
    pub fn started(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.inner).started.clone()
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn stop(&self, service: &str, hosts: &[String]) -> Vec<String> {
        let delay = lock(&self.inner).stop_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let errors = {
            let mut inner = lock(&self.inner);
            inner.stopped.push((service.to_string(), hosts.to_vec()));
            inner.stopped_at.push(Instant::now());
            for (journal, host, message) in &inner.stop_log {
                if hosts.contains(host) {
                    journal.log_at(host, service, Local::now(), message);
                }
            }
            hosts
                .iter()
                .filter_map(|host| {
                    inner
                        .stop_failures
                        .get(host)
                        .map(|cause| format!("{}: failed to stop {}: {}", host, service, cause))
                })
                .collect()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        errors
    }

    async fn start(&self, service: &str, hosts: &[String]) -> Result<(), ServiceError> {
        let mut inner = lock(&self.inner);
        inner.started.push((service.to_string(), hosts.to_vec()));
        match &inner.start_failure {
            Some(cause) => Err(ServiceError::StartFailed {
                service: service.to_string(),
                failures: hosts.iter().map(|h| format!("{}: {}", h, cause)).collect(),
            }),
            None => Ok(()),
        }
    }
}

// ===========================================
// Provisioner
// ===========================================

#[derive(Debug, Default)]
struct ProvisionerInner {
    failure: Option<String>,
    release_failure: Option<String>,
    calls: usize,
    released: Vec<Provisioned>,
}

/// Provisioner handing out a fixed pool/container.
#[derive(Debug, Clone, Default)]
pub struct FakeProvisioner {
    inner: Arc<Mutex<ProvisionerInner>>,
}

impl FakeProvisioner {
    /// Create a provisioner that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every provision call with `cause`.
    pub fn fail(&self, cause: &str) {
        lock(&self.inner).failure = Some(cause.to_string());
    }

    /// Fail every release call with `cause`.
    pub fn fail_release(&self, cause: &str) {
        lock(&self.inner).release_failure = Some(cause.to_string());
    }

    /// Number of provision calls.
    pub fn calls(&self) -> usize {
        lock(&self.inner).calls
    }

    /// Resources released so far.
    pub fn released(&self) -> Vec<Provisioned> {
        lock(&self.inner).released.clone()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(&self) -> Result<Provisioned, ProvisionError> {
        let mut inner = lock(&self.inner);
        inner.calls += 1;
        match &inner.failure {
            Some(cause) => Err(ProvisionError::Unavailable(cause.clone())),
            None => Ok(Provisioned::new("fake_pool", "fake_cont", "daos_server")),
        }
    }

    async fn release(&self, resource: &Provisioned) -> Result<(), ProvisionError> {
        let mut inner = lock(&self.inner);
        inner.released.push(resource.clone());
        match &inner.release_failure {
            Some(cause) => Err(ProvisionError::Failed {
                step: "pool destroy".to_string(),
                exit_code: 1,
                stderr: cause.clone(),
            }),
            None => Ok(()),
        }
    }
}

// ===========================================
// Bundle
// ===========================================

/// All fakes plus settings for a short scenario on two clients.
#[derive(Debug, Clone)]
pub struct Fakes {
    /// Provisioner.
    pub provisioner: FakeProvisioner,
    /// Workload.
    pub workload: ScriptedWorkload,
    /// Service manager.
    pub services: FakeServiceManager,
    /// Journal.
    pub journal: FakeJournal,
    /// Settings handed to the orchestrator.
    pub settings: ScenarioSettings,
}

impl Fakes {
    /// Fakes with nothing scripted and a 10 ms grace interval.
    pub fn new() -> Self {
        Self {
            provisioner: FakeProvisioner::new(),
            workload: ScriptedWorkload::new(),
            services: FakeServiceManager::new(),
            journal: FakeJournal::new(),
            settings: ScenarioSettings {
                service: "daos_agent".to_string(),
                log_tag: "daos_agent".to_string(),
                grace: Duration::from_millis(10),
                expected_error_code: "-1005".to_string(),
                shutdown_marker: "shutting down".to_string(),
                job_id: 1,
                first_file: "test_file_1".to_string(),
                second_file: "test_file_2".to_string(),
                clients: vec!["client-1".to_string(), "client-2".to_string()],
            },
        }
    }

    /// Fakes scripted for a passing run: the interrupted workload reports
    /// -1005, client-1 logs the shutdown, the recovery run is clean.
    pub fn passing() -> Self {
        let fakes = Self::new();
        fakes.workload.queue_success(
            "ERROR: dfs_disconnect failed: DER_NO_HDL(-1005): 'Invalid handle'\n",
            vec![("write.max_mib".to_string(), "1024.00".to_string())],
        );
        fakes
            .workload
            .queue_success("", vec![("write.max_mib".to_string(), "1100.00".to_string())]);
        fakes
            .journal
            .log_shutdown_during_stop(&fakes.services, "client-1");
        fakes
    }

    /// Collaborators backed by these fakes.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            provisioner: Arc::new(self.provisioner.clone()),
            workload: Arc::new(self.workload.clone()),
            services: Arc::new(self.services.clone()),
            journal: Arc::new(self.journal.clone()),
        }
    }

    /// An orchestrator wired to these fakes.
    pub fn orchestrator(&self) -> ScenarioOrchestrator {
        ScenarioOrchestrator::new(self.settings.clone(), self.collaborators())
    }
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}
