//! End-to-end runs of the agent failure scenario against scripted collaborators.

use std::time::Duration;

use agent_failure_core::testing::Fakes;
use agent_failure_core::{ScenarioError, ScenarioState};
use chrono::Local;

#[tokio::test]
async fn clean_scenario_passes() {
    let fakes = Fakes::passing();
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.expect("scenario should not abort");

    assert!(outcome.passed(), "unexpected errors: {}", outcome.report);
    assert!(outcome.report.is_empty());
    assert!(outcome.first_run.stderr_text().contains("-1005"));
    assert!(outcome.second_run.stderr_text().is_empty());
    assert_eq!(fakes.provisioner.calls(), 1);
    assert_eq!(fakes.workload.call_count(), 2);
    assert_eq!(fakes.services.stopped().len(), 1);
    assert_eq!(fakes.services.started().len(), 1);
    assert_eq!(fakes.provisioner.released(), vec![outcome.resource]);
}

#[tokio::test]
async fn missing_error_code_is_the_only_error() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("", vec![]);
    fakes.workload.queue_success("", vec![]);
    fakes.journal.log_shutdown_during_stop(&fakes.services, "client-1");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("-1005"));
}

#[tokio::test]
async fn missing_shutdown_message_is_the_only_error() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("DER_NO_HDL(-1005)", vec![]);
    fakes.workload.queue_success("", vec![]);
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("shutdown message"));
    assert!(outcome.report.entries()[0].contains("shutting down"));
}

#[tokio::test]
async fn shutdown_on_other_host_only_is_not_enough() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("DER_NO_HDL(-1005)", vec![]);
    fakes.workload.queue_success("", vec![]);
    fakes.journal.log_shutdown_during_stop(&fakes.services, "client-2");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("client-1"));
}

#[tokio::test]
async fn unclean_second_run_is_the_only_error() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("DER_NO_HDL(-1005)", vec![]);
    fakes.workload.queue_success("WARNING: dfs_write retried", vec![]);
    fakes.journal.log_shutdown_during_stop(&fakes.services, "client-1");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("second workload run"));
    assert!(outcome.report.entries()[0].contains("dfs_write retried"));
}

#[tokio::test]
async fn all_discrepancies_are_reported_together() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("", vec![]);
    fakes.workload.queue_exit_failure(1, "pool connect failed");
    fakes.services.fail_stop_on("client-2", "unit not found");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    let entries = outcome.report.entries();
    assert_eq!(entries.len(), 4, "report: {}", outcome.report);
    assert!(entries[0].contains("client-2"));
    assert!(entries[1].contains("-1005"));
    assert!(entries[2].contains("shutdown message"));
    assert!(entries[3].contains("pool connect failed"));
}

#[tokio::test]
async fn restart_failure_skips_second_run() {
    let fakes = Fakes::passing();
    fakes.services.fail_start("daos_agent.service: start request repeated too quickly");
    let mut orchestrator = fakes.orchestrator();

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ScenarioError::Restart { .. }));
    assert!(err.to_string().contains("daos_agent"));
    assert_eq!(orchestrator.state(), ScenarioState::Restarting);
    assert_eq!(fakes.workload.call_count(), 1);
    assert_eq!(fakes.services.started().len(), 1);
    assert_eq!(fakes.provisioner.released().len(), 1);
    assert_eq!(fakes.provisioner.released()[0].pool, "fake_pool");
}

#[tokio::test]
async fn restart_failure_reports_release_failure_too() {
    let fakes = Fakes::passing();
    fakes.services.fail_start("unit masked");
    fakes.provisioner.fail_release("pool busy");
    let mut orchestrator = fakes.orchestrator();

    orchestrator.run().await.unwrap_err();

    let entries = orchestrator.report().entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("pool busy"));
}

#[tokio::test]
async fn window_brackets_the_stop_call() {
    let fakes = Fakes::passing();
    fakes.services.set_stop_delay(Duration::from_millis(100));
    let mut orchestrator = fakes.orchestrator();

    let before = Local::now();
    let outcome = orchestrator.run().await.unwrap();

    let window = outcome.window;
    assert!(window.start() <= window.end());
    assert!(window.start() >= before);
    assert!(window.end() - window.start() >= chrono::Duration::milliseconds(200));
    assert_eq!(fakes.journal.queried_windows(), vec![window]);
    assert!(outcome.passed(), "unexpected errors: {}", outcome.report);
}

#[tokio::test]
async fn entries_outside_the_window_are_ignored() {
    let fakes = Fakes::new();
    fakes.workload.queue_success("DER_NO_HDL(-1005)", vec![]);
    fakes.workload.queue_success("", vec![]);
    fakes.services.set_stop_delay(Duration::from_millis(50));
    // An earlier restart of the agent, well before the injection.
    fakes.journal.log_at(
        "client-1",
        "daos_agent",
        Local::now() - chrono::Duration::seconds(30),
        "shutting down",
    );
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("shutdown message"));
}

#[tokio::test]
async fn first_run_is_still_running_when_the_agent_stops() {
    let fakes = Fakes::passing();
    fakes.workload.set_delay(Duration::from_millis(200));
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    let spans = fakes.workload.spans();
    let stops = fakes.services.stopped_at();
    assert_eq!(spans.len(), 2);
    assert_eq!(stops.len(), 1);
    let first = spans[0];
    let finished = first.finished.expect("first run finished");
    assert!(first.started < stops[0], "first run started after the stop");
    assert!(finished > stops[0], "first run finished before the stop");
    assert!(spans[1].started > stops[0]);
    assert!(outcome.passed(), "unexpected errors: {}", outcome.report);
}

#[tokio::test]
async fn unreachable_second_client_does_not_hide_the_first() {
    let fakes = Fakes::passing();
    fakes
        .journal
        .fail_host("client-2", "ssh: connect to host client-2 port 22: No route to host");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert!(outcome.passed(), "unexpected errors: {}", outcome.report);
}

#[tokio::test]
async fn unreachable_first_client_cannot_be_checked() {
    let fakes = Fakes::passing();
    fakes.journal.fail_host("client-1", "No route to host");
    let mut orchestrator = fakes.orchestrator();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.report.len(), 1);
    assert!(outcome.report.entries()[0].contains("could not be checked"));
    assert!(outcome.report.entries()[0].contains("client-1: No route to host"));
}
