//! Report emails.
//!
//! A [`MailNotifier`] turns a report into a [`ReportMail`] and hands it to a
//! [`MailTransport`]. No SMTP transport ships with the crate; the
//! [`OutboxTransport`] drops each mail as a JSON file for a relay (or a test)
//! to pick up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dispatch::Notifier;
use crate::error::{ReportError, ReportResult};
use crate::render::render_markdown;
use crate::report::Report;

/// A composed report email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Markdown body
    pub body: String,
}

impl ReportMail {
    /// Compose the mail for `report`. `full` includes every entry rather
    /// than only the counts and summary entries.
    pub fn compose(report: &Report, from: &str, app_name: &str, to: &[String], full: bool) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_vec(),
            subject: format!("{}: {}", app_name, report.title()),
            body: render_markdown(report, full),
        }
    }
}

/// Delivers composed mails.
pub trait MailTransport: Send + Sync {
    fn send(&self, mail: &ReportMail) -> ReportResult<()>;
}

/// [`Notifier`] that sends reports as mail.
#[derive(Debug)]
pub struct MailNotifier<T> {
    from_email: Option<String>,
    app_name: String,
    transport: T,
}

impl<T: MailTransport> MailNotifier<T> {
    pub fn new(from_email: Option<String>, app_name: impl Into<String>, transport: T) -> Self {
        Self {
            from_email,
            app_name: app_name.into(),
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn sender(&self) -> ReportResult<&str> {
        self.from_email
            .as_deref()
            .filter(|from| !from.trim().is_empty())
            .ok_or_else(|| {
                ReportError::Config("no sender address configured (from_email)".to_string())
            })
    }
}

impl<T: MailTransport> Notifier for MailNotifier<T> {
    fn dispatch(&self, report: &Report, recipients: &[String], full_report: bool) -> ReportResult<()> {
        let from = self.sender()?;
        let mail = ReportMail::compose(report, from, &self.app_name, recipients, full_report);
        debug!(subject = %mail.subject, to = ?mail.to, full_report, "Sending report mail");
        self.transport.send(&mail)
    }

    fn ready(&self) -> ReportResult<()> {
        self.sender().map(|_| ())
    }
}

/// Writes each mail as `{timestamp}-{n}.json` into a directory.
#[derive(Debug)]
pub struct OutboxTransport {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every mail currently in the outbox, oldest file name first.
    pub fn read_all(&self) -> ReportResult<Vec<ReportMail>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                let bytes = fs::read(path)?;
                serde_json::from_slice(&bytes).map_err(|e| ReportError::Serialization(e.to_string()))
            })
            .collect()
    }
}

impl MailTransport for OutboxTransport {
    fn send(&self, mail: &ReportMail) -> ReportResult<()> {
        fs::create_dir_all(&self.dir)?;
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{:04}.json", Utc::now().format("%Y%m%dT%H%M%S%.3f"), n);
        let path = self.dir.join(name);

        let json = serde_json::to_vec_pretty(mail).map_err(|e| ReportError::Serialization(e.to_string()))?;
        fs::write(&path, json)?;
        info!(path = ?path, subject = %mail.subject, "Mail written to outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report() -> Report {
        let mut report = Report::new("Nightly import");
        report.add_summary("3 rows").add_info("detail").add_error("boom");
        report
    }

    #[test]
    fn test_compose() {
        let to = vec!["ops@example.com".to_string()];
        let mail = ReportMail::compose(&report(), "bot@example.com", "runreport", &to, false);

        assert_eq!(mail.subject, "runreport: Nightly import");
        assert_eq!(mail.from, "bot@example.com");
        assert!(mail.body.contains("3 rows"));
        assert!(!mail.body.contains("detail"));

        let full = ReportMail::compose(&report(), "bot@example.com", "runreport", &to, true);
        assert!(full.body.contains("detail"));
    }

    #[test]
    fn test_notifier_writes_outbox() {
        let temp = TempDir::new().unwrap();
        let notifier = MailNotifier::new(
            Some("bot@example.com".into()),
            "runreport",
            OutboxTransport::new(temp.path()),
        );

        assert!(notifier.ready().is_ok());
        notifier.dispatch(&report(), &["a@example.com".into()], false).unwrap();
        notifier.dispatch(&report(), &["b@example.com".into()], true).unwrap();

        let mails = notifier.transport().read_all().unwrap();
        assert_eq!(mails.len(), 2);
        assert_eq!(mails[0].to, vec!["a@example.com"]);
        assert_eq!(mails[1].to, vec!["b@example.com"]);
    }

    #[test]
    fn test_missing_sender() {
        let temp = TempDir::new().unwrap();
        let notifier = MailNotifier::new(None, "runreport", OutboxTransport::new(temp.path()));

        assert!(matches!(notifier.ready(), Err(ReportError::Config(_))));
        let err = notifier.dispatch(&report(), &["a@example.com".into()], false).unwrap_err();
        assert!(err.to_string().contains("from_email"));
        assert!(notifier.transport().read_all().unwrap().is_empty());

        let blank = MailNotifier::new(Some("  ".into()), "runreport", OutboxTransport::new(temp.path()));
        assert!(blank.ready().is_err());
    }
}
