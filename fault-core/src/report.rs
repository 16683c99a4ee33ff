//! Append-only error report for one scenario run.

use serde::Serialize;
use std::fmt;

use crate::assertions::AssertionResult;

/// Ordered discrepancies found during a scenario. Entries are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    errors: Vec<String>,
}

impl ErrorReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one error.
    pub fn push(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::debug!("{}", error);
        self.errors.push(error);
    }

    /// Append several errors in order.
    pub fn extend<I>(&mut self, errors: I)
    where
        I: IntoIterator<Item = String>,
    {
        for error in errors {
            self.push(error);
        }
    }

    /// Fold an assertion in: failures are appended, passes are logged.
    pub fn record(&mut self, assertion: AssertionResult) {
        if assertion.passed {
            tracing::info!("PASS: {}", assertion.description);
            return;
        }
        let details = assertion
            .failure_details
            .unwrap_or_else(|| assertion.description.clone());
        tracing::warn!("FAIL: {}", assertion.description);
        self.push(details);
    }

    /// Entries in the order they were found.
    pub fn entries(&self) -> &[String] {
        &self.errors
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when nothing went wrong.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The scenario passes iff the report is empty.
    pub fn passed(&self) -> bool {
        self.is_empty()
    }

    /// Log the full report between banners.
    pub fn emit(&self) {
        tracing::info!("########## Errors ##########");
        if self.errors.is_empty() {
            tracing::info!("no errors detected");
        }
        for (i, error) in self.errors.iter().enumerate() {
            tracing::error!("error {}/{}: {}", i + 1, self.errors.len(), error);
        }
        tracing::info!("############################");
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no errors");
        }
        writeln!(f, "{} error(s) detected:", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_passes() {
        let report = ErrorReport::new();
        assert!(report.passed());
        assert_eq!(report.to_string(), "no errors");
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut report = ErrorReport::new();
        report.push("first");
        report.extend(vec!["second".to_string(), "third".to_string()]);

        assert_eq!(report.entries(), ["first", "second", "third"]);
        assert!(!report.passed());
    }

    #[test]
    fn record_appends_only_failures() {
        let mut report = ErrorReport::new();
        report.record(AssertionResult::pass("fine"));
        report.record(AssertionResult::fail("check", "it broke"));

        assert_eq!(report.entries(), ["it broke"]);
    }

    #[test]
    fn display_lists_entries() {
        let mut report = ErrorReport::new();
        report.push("c1: failed to stop daos_agent");
        let text = report.to_string();
        assert!(text.starts_with("1 error(s) detected:"));
        assert!(text.contains("  - c1: failed to stop daos_agent"));
    }

    #[test]
    fn serializes_as_list() {
        let mut report = ErrorReport::new();
        report.push("x");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"errors": ["x"]}));
    }
}
