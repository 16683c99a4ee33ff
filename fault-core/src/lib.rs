//! # agent-failure-core
//!
//! Fault injection and recovery verification for the DAOS client agent.
//!
//! The scenario stops `daos_agent` underneath a running IOR workload,
//! checks that the client saw the expected error and that the agent logged
//! its shutdown, restarts the agent and proves a second workload runs clean.
//!
//! - [`job`]: workload runs and their results
//! - [`inject`]: stopping and restarting the agent
//! - [`journal`]: time-windowed log verification
//! - [`scenario`]: the orchestrator tying it together
//! - [`testing`]: scripted collaborators for running the scenario without a cluster

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod config;
pub mod inject;
pub mod ior;
pub mod job;
pub mod journal;
pub mod provision;
pub mod report;
pub mod scenario;
pub mod ssh;
pub mod testing;

pub use config::{Config, ConfigError};
pub use job::{JobHandle, JobId, JobResult, JobRunner};
pub use journal::{LogQueryResult, LogVerifier, TimeWindow};
pub use report::ErrorReport;
pub use scenario::{
    Collaborators, ScenarioError, ScenarioOrchestrator, ScenarioOutcome, ScenarioSettings,
    ScenarioState,
};
