//! Notification policy and the dispatch seams.
//!
//! Recording never notifies anyone. At finalize time the [`Reporter`]
//! consults the report's [`NotificationPolicy`] through [`route`] and then
//! hands the report to a [`Notifier`], either inline or by pushing a
//! [`SendReportJob`] onto a [`DispatchQueue`].
//!
//! [`Reporter`]: crate::reporter::Reporter

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReportResult;
use crate::level::{Level, LevelCounts};
use crate::report::Report;
use crate::storage::ReportStore;

/// How a report email is delivered once the policy says it should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailMethod {
    /// Push a delayed job onto the dispatch queue
    #[default]
    #[serde(rename = "emailViaQueue", alias = "via_queue")]
    ViaQueue,

    /// Send inline while finalizing
    #[serde(rename = "emailOnShutdown", alias = "on_shutdown")]
    OnShutdown,
}

/// Notification fields carried by (and persisted with) a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Who receives the report; empty means nobody is notified
    pub recipients: Vec<String>,

    /// Only notify when at least one error entry was recorded
    pub send_email_only_on_error: bool,

    /// Send every entry rather than only the counts and summary entries
    pub email_full_report: bool,

    pub email_method: EmailMethod,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            send_email_only_on_error: true,
            email_full_report: false,
            email_method: EmailMethod::ViaQueue,
        }
    }
}

impl NotificationPolicy {
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a report with these counts should be sent at all.
    pub fn should_dispatch(&self, counts: &LevelCounts) -> bool {
        !self.recipients.is_empty()
            && (!self.send_email_only_on_error || counts.get(Level::Error) > 0)
    }
}

/// Where a finished report goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    /// Policy says nobody needs to hear about it
    Skip,
    /// Send during finalize
    Inline,
    /// Queue requested but unavailable; send during finalize instead
    FallbackInline,
    /// Push a job after the artifact is written
    Queue,
}

/// Decide how a report with `counts` is dispatched under `policy`.
pub fn route(policy: &NotificationPolicy, counts: &LevelCounts, queue_available: bool) -> DispatchRoute {
    if !policy.should_dispatch(counts) {
        return DispatchRoute::Skip;
    }
    match policy.email_method {
        EmailMethod::OnShutdown => DispatchRoute::Inline,
        EmailMethod::ViaQueue if queue_available => DispatchRoute::Queue,
        EmailMethod::ViaQueue => DispatchRoute::FallbackInline,
    }
}

/// What finalize ended up doing about notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Policy did not call for a notification
    NotRequired,
    /// Sent inline as configured
    Sent,
    /// Sent inline because the queue was unavailable
    SentFallback,
    /// Job pushed onto the queue
    Queued,
    /// Required configuration is missing; nothing was sent
    MissingConfig(String),
    /// The notifier or queue returned an error
    Failed(String),
}

/// Delivers a report to its recipients (mail, chat, ...).
pub trait Notifier: Send + Sync {
    fn dispatch(&self, report: &Report, recipients: &[String], full_report: bool) -> ReportResult<()>;

    /// Check that everything needed to send is configured.
    ///
    /// Returns [`ReportError::Config`](crate::ReportError::Config) naming
    /// what is missing.
    fn ready(&self) -> ReportResult<()> {
        Ok(())
    }
}

/// Asynchronous worker that sends reports later.
pub trait DispatchQueue: Send + Sync {
    fn push(&self, job: SendReportJob) -> ReportResult<()>;

    /// Whether a pushed job will actually be picked up.
    fn is_available(&self) -> bool {
        true
    }
}

/// A deferred notification for a report already written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReportJob {
    /// Where the artifact was written
    pub path: PathBuf,
    pub recipients: Vec<String>,
    pub email_full_report: bool,
}

impl SendReportJob {
    /// Reload the artifact and hand it to the notifier.
    pub fn execute(&self, store: &ReportStore, notifier: &dyn Notifier) -> ReportResult<()> {
        let report = store.load(&self.path)?;
        debug!(path = ?self.path, title = %report.title(), "Executing queued report dispatch");
        notifier.dispatch(&report, &self.recipients, self.email_full_report)?;
        info!(path = ?self.path, recipients = self.recipients.len(), "Queued report sent");
        Ok(())
    }
}

/// One call received by a [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub title: String,
    pub recipients: Vec<String>,
    pub full_report: bool,
    pub error_count: u64,
}

/// Notifier that keeps every dispatch in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Dispatched>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Dispatched> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Notifier for MemoryNotifier {
    fn dispatch(&self, report: &Report, recipients: &[String], full_report: bool) -> ReportResult<()> {
        self.sent.lock().push(Dispatched {
            title: report.title().to_string(),
            recipients: recipients.to_vec(),
            full_report,
            error_count: report.count(Level::Error),
        });
        Ok(())
    }
}
