//! Reporting configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::{EmailMethod, NotificationPolicy};
use crate::error::{ReportError, ReportResult};

/// Where reports go and who hears about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Directory reports are written under
    pub base_path: PathBuf,

    /// Notification recipients; empty disables notification
    pub recipients: Vec<String>,

    /// Only notify when a report contains errors
    pub send_email_only_on_error: bool,

    /// Mail every entry instead of counts and summary only
    pub email_full_report: bool,

    pub email_method: EmailMethod,

    /// Sender address; required to send mail
    pub from_email: Option<String>,

    /// Prefix of mail subjects
    pub app_name: String,

    /// Delay before a queued report is sent
    pub queue_delay_secs: u64,

    /// Echo entries to stdout as they are recorded
    pub console_echo: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./reports"),
            recipients: Vec::new(),
            send_email_only_on_error: true,
            email_full_report: false,
            email_method: EmailMethod::ViaQueue,
            from_email: None,
            app_name: "runreport".to_string(),
            queue_delay_secs: 60,
            console_echo: false,
        }
    }
}

impl ReportingConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ReportResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ReportError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ReportError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_from_email(mut self, from_email: impl Into<String>) -> Self {
        self.from_email = Some(from_email.into());
        self
    }

    pub fn with_email_method(mut self, email_method: EmailMethod) -> Self {
        self.email_method = email_method;
        self
    }

    pub fn with_console_echo(mut self, console_echo: bool) -> Self {
        self.console_echo = console_echo;
        self
    }

    /// Notification fields stamped onto new reports.
    pub fn policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            recipients: self.recipients.clone(),
            send_email_only_on_error: self.send_email_only_on_error,
            email_full_report: self.email_full_report,
            email_method: self.email_method,
        }
    }

    pub fn queue_delay(&self) -> Duration {
        Duration::from_secs(self.queue_delay_secs)
    }
}
