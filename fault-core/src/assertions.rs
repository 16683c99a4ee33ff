//! Assertion helpers for the agent failure scenario.
//!
//! These are pure functions over collected results. They return pass/fail
//! and never abort; failures are folded into the [`ErrorReport`](crate::report::ErrorReport).

use crate::job::JobResult;
use crate::journal::LogQueryResult;

/// Result of an assertion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }
}

/// Assert the interrupted run surfaced `code` to the client.
///
/// Checks stderr of a successful run, or the failure cause of a failed one.
pub fn assert_error_code(result: &JobResult, code: &str) -> AssertionResult {
    let text = result.diagnostic_text();
    if text.contains(code) {
        AssertionResult::pass(&format!("{} reported by interrupted workload", code))
    } else {
        AssertionResult::fail(
            "Interrupted workload error code",
            &format!("{} is not in workload error! {}", code, text),
        )
    }
}

/// Assert host 0 logged `marker` during the injection window.
pub fn assert_shutdown_logged(logs: &LogQueryResult, marker: &str) -> AssertionResult {
    match logs.host(0) {
        Some(record) if record.data.contains(marker) => AssertionResult::pass(&format!(
            "shutdown message '{}' logged on {}",
            marker, record.host
        )),
        Some(record) => AssertionResult::fail(
            "Shutdown logged",
            &format!(
                "shutdown message '{}' not found in journal on {}! Output = {}",
                marker,
                record.host,
                logs.to_string().trim_end()
            ),
        ),
        None => AssertionResult::fail(
            "Shutdown logged",
            &format!("shutdown message '{}' not found: no journal records returned", marker),
        ),
    }
}

/// Assert the recovery run finished without any error text.
pub fn assert_clean_run(result: &JobResult) -> AssertionResult {
    let text = result.diagnostic_text();
    if text.is_empty() {
        AssertionResult::pass("recovery workload completed cleanly")
    } else {
        AssertionResult::fail(
            "Recovery workload clean",
            &format!("Error found in second workload run! {}", text),
        )
    }
}
