//! Run the scenario.

use anyhow::{Context, Result};
use std::process::ExitCode;

use fault_core::{Collaborators, Config, ScenarioOrchestrator, ScenarioSettings};

/// Exit code when the scenario completed but found discrepancies.
const EXIT_ERRORS: u8 = 1;

/// Exit code when the scenario aborted (provisioning or restart failed).
const EXIT_FATAL: u8 = 2;

/// Run the scenario against the configured cluster.
pub async fn run(config: &Config, json: bool) -> Result<ExitCode> {
    let settings = ScenarioSettings::from_config(config);
    let collaborators = Collaborators::from_config(config);
    let mut orchestrator = ScenarioOrchestrator::new(settings, collaborators);

    let outcome = match orchestrator.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("scenario aborted in {}: {}", orchestrator.state(), e);
            if !orchestrator.report().is_empty() {
                tracing::error!("errors collected before abort:\n{}", orchestrator.report());
            }
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };

    if json {
        let rendered =
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        println!("{}", rendered);
    } else {
        println!("{}", outcome.report);
    }

    if outcome.passed() {
        tracing::info!("agent failure scenario passed");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(
            "agent failure scenario failed with {} error(s)",
            outcome.report.len()
        );
        Ok(ExitCode::from(EXIT_ERRORS))
    }
}
