//! The agent failure scenario.
//!
//! Sequence:
//!
//! 1. Provision a pool and container.
//! 2. Start the workload on a tokio task.
//! 3. Wait a grace interval so the workload is doing I/O.
//! 4. Stop the agent on every client, bracketing the stop with a time window.
//! 5. Join the workload; its error must carry the disconnect error code.
//! 6. The agent's journal inside the window must contain the shutdown marker.
//! 7. Restart the agent.
//! 8. Run the workload again inline; it must finish without error text.
//! 9. Destroy the pool and container, then emit the report. The scenario
//!    passes iff the report is empty.
//!
//! Assertion mismatches are collected into the [`ErrorReport`]; only
//! provisioning and restart failures abort the run. A restart failure still
//! releases the pool and container before returning.
//!
//! The grace interval is a timed wait, not a readiness handshake: a workload
//! that has not started I/O when the agent stops can make step 5 fail
//! spuriously.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::assertions::{assert_clean_run, assert_error_code, assert_shutdown_logged};
use crate::config::Config;
use crate::inject::{FailureInjector, InjectorError, ServiceManager, SystemdOverSsh};
use crate::ior::MpirunIor;
use crate::job::{JobId, JobResult, JobRunner, ResultSlots, Workload};
use crate::journal::{JournalSource, JournalctlOverSsh, LogVerifier, TimeWindow};
use crate::provision::{DmgProvisioner, ProvisionError, Provisioned, Provisioner};
use crate::report::ErrorReport;

/// Scenario progress, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScenarioState {
    /// Acquiring the pool/container.
    Provisioning,
    /// First workload spawned.
    FirstRunStarted,
    /// Waiting for the workload to reach steady state.
    FirstRunAwaitingInjection,
    /// Stopping the service.
    Injecting,
    /// Service stop attempted on all hosts.
    Injected,
    /// Joining the first workload.
    AwaitingFirstRunCompletion,
    /// Checking error code and journal.
    Verifying,
    /// Bringing the service back.
    Restarting,
    /// Recovery workload running.
    SecondRunStarted,
    /// Recovery workload finished.
    SecondRunCompleted,
    /// Emitting the report.
    Reporting,
    /// Finished.
    Done,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Scenario-fatal errors.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The pool/container could not be acquired.
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    /// The stopped service could not be brought back.
    #[error("failed to restart {service}: {source}")]
    Restart {
        /// Service name.
        service: String,
        /// Underlying injector error.
        source: InjectorError,
    },

    /// `run` was called on an orchestrator that already ran.
    #[error("scenario already ran (state {0})")]
    AlreadyRan(ScenarioState),
}

/// Parameters of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSettings {
    /// Service to stop.
    pub service: String,
    /// Journal identifier of the service.
    pub log_tag: String,
    /// Wait between starting the workload and stopping the service.
    pub grace: Duration,
    /// Code the interrupted workload must report.
    pub expected_error_code: String,
    /// Message the service logs when it shuts down.
    pub shutdown_marker: String,
    /// Result slot used by both runs.
    pub job_id: JobId,
    /// Target file of the interrupted run.
    pub first_file: String,
    /// Target file of the recovery run.
    pub second_file: String,
    /// Client hosts for the workload and the injection.
    pub clients: Vec<String>,
}

impl ScenarioSettings {
    /// Settings from a loaded config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            service: config.scenario.service.clone(),
            log_tag: config.scenario.log_tag.clone(),
            grace: config.scenario.grace(),
            expected_error_code: config.scenario.expected_error_code.clone(),
            shutdown_marker: config.scenario.shutdown_marker.clone(),
            job_id: config.scenario.job_id,
            first_file: config.scenario.first_file.clone(),
            second_file: config.scenario.second_file.clone(),
            clients: config.hosts.clients.clone(),
        }
    }
}

/// External systems the scenario drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Pool/container provisioning.
    pub provisioner: Arc<dyn Provisioner>,
    /// Workload command.
    pub workload: Arc<dyn Workload>,
    /// Remote service lifecycle.
    pub services: Arc<dyn ServiceManager>,
    /// Remote system log.
    pub journal: Arc<dyn JournalSource>,
}

impl Collaborators {
    /// The real stack: dmg, mpirun + IOR, systemd and journalctl over SSH.
    pub fn from_config(config: &Config) -> Self {
        Self {
            provisioner: Arc::new(DmgProvisioner::from_config(&config.pool)),
            workload: Arc::new(MpirunIor::new(config.workload.clone())),
            services: Arc::new(SystemdOverSsh::from_config(&config.hosts)),
            journal: Arc::new(JournalctlOverSsh::from_config(&config.hosts)),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Everything a completed scenario produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    /// Collected discrepancies. Empty means pass.
    pub report: ErrorReport,
    /// Pool/container the workload ran against.
    pub resource: Provisioned,
    /// Injection window used for the journal query.
    pub window: TimeWindow,
    /// Result of the interrupted run.
    pub first_run: JobResult,
    /// Result of the recovery run.
    pub second_run: JobResult,
    /// States visited, in order.
    pub states: Vec<ScenarioState>,
}

impl ScenarioOutcome {
    /// True when no discrepancies were found.
    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

/// Runs the scenario once.
#[derive(Debug)]
pub struct ScenarioOrchestrator {
    settings: ScenarioSettings,
    collaborators: Collaborators,
    state: ScenarioState,
    history: Vec<ScenarioState>,
    report: ErrorReport,
    slots: ResultSlots,
}

impl ScenarioOrchestrator {
    /// Create an orchestrator. Nothing runs until [`run`](Self::run).
    pub fn new(settings: ScenarioSettings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            collaborators,
            state: ScenarioState::Provisioning,
            history: Vec::new(),
            report: ErrorReport::new(),
            slots: ResultSlots::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// States entered so far.
    pub fn history(&self) -> &[ScenarioState] {
        &self.history
    }

    /// Errors collected so far.
    pub fn report(&self) -> &ErrorReport {
        &self.report
    }

    fn enter(&mut self, state: ScenarioState) {
        tracing::debug!("scenario: {} -> {}", self.state, state);
        self.state = state;
        self.history.push(state);
    }

    async fn release(&mut self, resource: &Provisioned) {
        tracing::info!(
            "releasing pool {} container {}",
            resource.pool,
            resource.container
        );
        if let Err(e) = self.collaborators.provisioner.release(resource).await {
            self.report.push(format!(
                "failed to release pool {} container {}: {}",
                resource.pool, resource.container, e
            ));
        }
    }

    /// Run the scenario to completion.
    ///
    /// Returns `Err` only for fatal failures; everything else ends up in
    /// the outcome's report.
    pub async fn run(&mut self) -> Result<ScenarioOutcome, ScenarioError> {
        if !self.history.is_empty() {
            return Err(ScenarioError::AlreadyRan(self.state));
        }
        let settings = self.settings.clone();
        let job_id = settings.job_id;

        self.enter(ScenarioState::Provisioning);
        let resource = self.collaborators.provisioner.provision().await?;
        tracing::info!(
            "provisioned pool {} container {}",
            resource.pool,
            resource.container
        );

        let runner = JobRunner::new(Arc::clone(&self.collaborators.workload), resource.clone());
        let mut injector = FailureInjector::new(Arc::clone(&self.collaborators.services));
        let verifier = LogVerifier::new(Arc::clone(&self.collaborators.journal));

        self.enter(ScenarioState::FirstRunStarted);
        tracing::info!("starting workload {} (background)", job_id);
        let handle = runner.spawn(job_id, settings.first_file.clone(), settings.clients.clone());

        self.enter(ScenarioState::FirstRunAwaitingInjection);
        tracing::info!("waiting {:?} for the workload to start I/O", settings.grace);
        tokio::time::sleep(settings.grace).await;

        self.enter(ScenarioState::Injecting);
        let open = TimeWindow::open();
        let stop_errors = injector
            .stop_service(&settings.service, &settings.clients)
            .await;
        self.report.extend(stop_errors);
        let window = open.close();

        self.enter(ScenarioState::Injected);
        tracing::info!("{} stopped, journal window {}", settings.service, window);

        self.enter(ScenarioState::AwaitingFirstRunCompletion);
        let first_run = handle.join().await;
        tracing::info!("--- workload results 1 ---");
        tracing::info!("{}", first_run);
        self.slots.publish(job_id, first_run.clone());

        self.enter(ScenarioState::Verifying);
        match self.slots.get(job_id) {
            Some(published) => self
                .report
                .record(assert_error_code(published, &settings.expected_error_code)),
            None => self
                .report
                .push(format!("no result published for workload {}", job_id)),
        }

        match verifier
            .query_log(&settings.clients, &window, &settings.log_tag)
            .await
        {
            Ok(logs) => {
                tracing::info!("journal results:\n{}", logs);
                self.report
                    .record(assert_shutdown_logged(&logs, &settings.shutdown_marker));
            }
            Err(e) => self.report.push(format!(
                "shutdown message '{}' could not be checked: {}",
                settings.shutdown_marker, e
            )),
        }

        self.enter(ScenarioState::Restarting);
        if let Err(source) = injector.restart_service(&settings.service).await {
            self.release(&resource).await;
            return Err(ScenarioError::Restart {
                service: settings.service.clone(),
                source,
            });
        }

        self.enter(ScenarioState::SecondRunStarted);
        tracing::info!("starting workload {} (recovery)", job_id);
        let second_run = runner
            .run(job_id, &settings.second_file, &settings.clients)
            .await;

        self.enter(ScenarioState::SecondRunCompleted);
        tracing::info!("--- workload results 2 ---");
        tracing::info!("{}", second_run);
        self.slots.publish(job_id, second_run.clone());
        match self.slots.get(job_id) {
            Some(published) => self.report.record(assert_clean_run(published)),
            None => self
                .report
                .push(format!("no result published for workload {}", job_id)),
        }

        self.enter(ScenarioState::Reporting);
        self.release(&resource).await;
        self.report.emit();

        self.enter(ScenarioState::Done);
        Ok(ScenarioOutcome {
            report: self.report.clone(),
            resource,
            window,
            first_run,
            second_run,
            states: self.history.clone(),
        })
    }
}
