//! System log verification scoped to the injection window.
//!
//! The window is taken from wall-clock timestamps immediately before and
//! after the stop call. Journals are appended to continuously, so a wider
//! window risks matching an unrelated earlier shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, SubsecRound};
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::HostsConfig;
use crate::ssh::{shell_quote, SshTarget};

/// Timestamp format accepted by `journalctl --since/--until`.
pub const JOURNAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Half-open wall-clock interval `[start, end)` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Local>,
    end: DateTime<Local>,
}

/// A window whose start has been recorded but whose end has not.
#[derive(Debug, Clone, Copy)]
pub struct OpenWindow {
    start: DateTime<Local>,
}

impl OpenWindow {
    /// When the window was opened.
    pub fn start(&self) -> DateTime<Local> {
        self.start
    }

    /// Record the end as now. A clock that stepped backwards yields an
    /// empty window rather than an inverted one.
    pub fn close(self) -> TimeWindow {
        let end = Local::now().max(self.start);
        TimeWindow {
            start: self.start,
            end,
        }
    }
}

impl TimeWindow {
    /// Start a window now.
    pub fn open() -> OpenWindow {
        OpenWindow { start: Local::now() }
    }

    /// Build a window from explicit bounds. `None` if `start > end`.
    pub fn new(start: DateTime<Local>, end: DateTime<Local>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> DateTime<Local> {
        self.start
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> DateTime<Local> {
        self.end
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Local>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// `--since` argument: start truncated to the second.
    pub fn since(&self) -> String {
        self.start.format(JOURNAL_TIME_FORMAT).to_string()
    }

    /// `--until` argument: end rounded up to the next whole second, since
    /// the journal only filters at second resolution.
    pub fn until(&self) -> String {
        let truncated = self.end.trunc_subsecs(0);
        let end = if truncated < self.end {
            truncated + Duration::seconds(1)
        } else {
            truncated
        };
        end.format(JOURNAL_TIME_FORMAT).to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.since(), self.until())
    }
}

/// Log lines from one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostLog {
    /// Host the log came from.
    pub host: String,
    /// Matching log text; empty when nothing matched.
    pub data: String,
}

/// A host whose journal could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFailure {
    /// Host that failed.
    pub host: String,
    /// What went wrong.
    pub cause: String,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.cause)
    }
}

/// What a [`JournalSource`] got back: records from the hosts that answered
/// and a failure for each host that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalReply {
    /// Records from hosts that answered, in any order.
    pub records: Vec<HostLog>,
    /// Hosts that could not be queried.
    pub failures: Vec<HostFailure>,
}

/// One record per queried host, in the order the hosts were given.
///
/// Hosts that could not be queried get an empty record and an entry in
/// [`failures`](Self::failures).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogQueryResult {
    records: Vec<HostLog>,
    failures: Vec<HostFailure>,
}

impl LogQueryResult {
    /// All records.
    pub fn records(&self) -> &[HostLog] {
        &self.records
    }

    /// Record for the host at `index`.
    pub fn host(&self, index: usize) -> Option<&HostLog> {
        self.records.get(index)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no hosts were queried.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hosts whose journal could not be read.
    pub fn failures(&self) -> &[HostFailure] {
        &self.failures
    }
}

impl From<Vec<HostLog>> for LogQueryResult {
    fn from(records: Vec<HostLog>) -> Self {
        Self {
            records,
            failures: Vec::new(),
        }
    }
}

impl fmt::Display for LogQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{}: {}", record.host, record.data.trim_end())?;
        }
        for failure in &self.failures {
            writeln!(f, "{} (query failed)", failure)?;
        }
        Ok(())
    }
}

/// Journal query failures.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The source, or the host whose record is checked, could not be queried.
    #[error("journal query failed: {}", failures.join("; "))]
    QueryFailed {
        /// One entry per failing host.
        failures: Vec<String>,
    },
}

/// Source of per-host system logs.
#[async_trait]
pub trait JournalSource: Send + Sync {
    /// Entries tagged `tag` inside `window`. A host that cannot be reached
    /// is a [`HostFailure`] in the reply, not an error.
    async fn query(
        &self,
        hosts: &[String],
        tag: &str,
        window: &TimeWindow,
    ) -> Result<JournalReply, JournalError>;
}

/// `journalctl` run over SSH.
#[derive(Debug, Clone)]
pub struct JournalctlOverSsh {
    user: Option<String>,
    connect_timeout_secs: u64,
    prefix: String,
}

impl JournalctlOverSsh {
    /// Build from the hosts section of the config.
    pub fn from_config(config: &HostsConfig) -> Self {
        Self {
            user: config.ssh_user.clone(),
            connect_timeout_secs: config.ssh_timeout_secs,
            prefix: config.remote_prefix.clone(),
        }
    }

    /// Remote command for one host.
    pub fn command(&self, tag: &str, window: &TimeWindow) -> String {
        let cmd = format!(
            "journalctl --system -t {} --since {} --until {}",
            shell_quote(tag),
            shell_quote(&window.since()),
            shell_quote(&window.until()),
        );
        if self.prefix.trim().is_empty() {
            cmd
        } else {
            format!("{} {}", self.prefix.trim(), cmd)
        }
    }
}

#[async_trait]
impl JournalSource for JournalctlOverSsh {
    async fn query(
        &self,
        hosts: &[String],
        tag: &str,
        window: &TimeWindow,
    ) -> Result<JournalReply, JournalError> {
        let cmd = self.command(tag, window);
        let queries = hosts.iter().map(|host| {
            let target =
                SshTarget::new(host.as_str(), self.user.clone(), self.connect_timeout_secs);
            let cmd = cmd.clone();
            async move {
                target
                    .exec_ok(&cmd)
                    .await
                    .map(|result| HostLog {
                        host: target.host.clone(),
                        data: result.stdout,
                    })
                    .map_err(|e| HostFailure {
                        host: target.host.clone(),
                        cause: e.to_string(),
                    })
            }
        });

        let mut reply = JournalReply::default();
        for outcome in join_all(queries).await {
            match outcome {
                Ok(record) => reply.records.push(record),
                Err(failure) => reply.failures.push(failure),
            }
        }
        Ok(reply)
    }
}

/// Queries a journal source and checks for markers.
#[derive(Clone)]
pub struct LogVerifier {
    source: Arc<dyn JournalSource>,
}

impl LogVerifier {
    /// Create a verifier over `source`.
    pub fn new(source: Arc<dyn JournalSource>) -> Self {
        Self { source }
    }

    /// Query `hosts` for entries tagged `service_tag` inside `window`.
    ///
    /// The result has exactly one record per host, in `hosts` order; hosts
    /// the source returned nothing for get an empty record. Only a failure
    /// on the first host, whose record is the one checked, is an error.
    pub async fn query_log(
        &self,
        hosts: &[String],
        window: &TimeWindow,
        service_tag: &str,
    ) -> Result<LogQueryResult, JournalError> {
        tracing::debug!(
            "querying {} log on {} host(s) for {}",
            service_tag,
            hosts.len(),
            window
        );
        let JournalReply {
            records: mut returned,
            failures,
        } = self.source.query(hosts, service_tag, window).await?;

        if let Some(first) = hosts.first() {
            if failures.iter().any(|f| &f.host == first) {
                return Err(JournalError::QueryFailed {
                    failures: failures.iter().map(ToString::to_string).collect(),
                });
            }
        }
        for failure in &failures {
            tracing::warn!("journal query failed on {}", failure);
        }

        let records = hosts
            .iter()
            .map(|host| match returned.iter().position(|r| &r.host == host) {
                Some(pos) => returned.remove(pos),
                None => HostLog {
                    host: host.clone(),
                    data: String::new(),
                },
            })
            .collect();

        Ok(LogQueryResult { records, failures })
    }

    /// Whether the host at `index` logged `marker`. A missing record counts
    /// as not found.
    pub fn contains_marker(result: &LogQueryResult, index: usize, marker: &str) -> bool {
        result
            .host(index)
            .is_some_and(|record| record.data.contains(marker))
    }
}

impl fmt::Debug for LogVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogVerifier").finish_non_exhaustive()
    }
}
