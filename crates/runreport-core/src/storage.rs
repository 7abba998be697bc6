//! File storage for report artifacts.
//!
//! Reports live under a base directory, one subdirectory per title:
//!
//! ```text
//! reports/
//! ├── nightly-import/
//! │   ├── 2026-01-21T02-00-03.json
//! │   └── 2026-01-22T02-00-04.json
//! ├── anonymous-report/
//! │   └── 2026-01-21T14-13-48.json
//! └── errors-during-reporting.jsonl     # diagnostic channel, not a report
//! ```
//!
//! Two reports with the same title started within the same second map to
//! the same file; the later write wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec;
use crate::error::{ReportError, ReportResult};
use crate::level::Level;
use crate::report::Report;

/// Extension of report artifacts.
pub const REPORT_EXTENSION: &str = "json";

/// Raw byte storage used for artifacts.
pub trait ReportStorage: Send + Sync {
    /// Write `bytes` to `path`, creating parent directories as needed.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Local filesystem storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl ReportStorage for FsStorage {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// URL-safe path segment for a title: lowercase ASCII alphanumerics joined
/// by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("report");
    }
    slug
}

/// File name (without extension) derived from a report timestamp.
pub fn file_stem_for(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Title and headline counts of a persisted report, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOverview {
    pub path: PathBuf,
    pub title: String,
    pub warnings: u64,
    pub errors: u64,
    /// File stem, i.e. the timestamp segment of the path
    pub date: String,
}

/// Report artifacts under one base directory.
#[derive(Clone)]
pub struct ReportStore {
    base: PathBuf,
    backend: Arc<dyn ReportStorage>,
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore").field("base", &self.base).finish()
    }
}

impl ReportStore {
    /// Store backed by the local filesystem.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_backend(base, Arc::new(FsStorage))
    }

    pub fn with_backend(base: impl Into<PathBuf>, backend: Arc<dyn ReportStorage>) -> Self {
        Self {
            base: base.into(),
            backend,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// `{base}/{slug(title)}/{timestamp}.json`
    pub fn path_for(&self, report: &Report) -> PathBuf {
        self.base
            .join(slugify(report.title()))
            .join(format!("{}.{}", file_stem_for(report.timestamp()), REPORT_EXTENSION))
    }

    /// Serialize `report` and write it to `path`.
    pub fn save_to(&self, report: &Report, path: &Path) -> ReportResult<()> {
        let bytes = codec::serialize(report)?;
        self.backend.write(path, &bytes)?;
        info!(path = ?path, title = %report.title(), entries = report.total_entries(), "Report saved");
        Ok(())
    }

    /// Serialize `report` to its derived path and return that path.
    pub fn save(&self, report: &Report) -> ReportResult<PathBuf> {
        let path = self.path_for(report);
        self.save_to(report, &path)?;
        Ok(path)
    }

    /// Read and decode a read-only report.
    pub fn load(&self, path: &Path) -> ReportResult<Report> {
        let bytes = self.backend.read(path)?;
        codec::deserialize(&bytes)
    }

    /// Every report artifact under the base directory, sorted by path.
    pub fn list(&self) -> ReportResult<Vec<PathBuf>> {
        if !self.base.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.base) {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io_err) => ReportError::Io(io_err),
                None => ReportError::Io(io::Error::other("filesystem loop while listing reports")),
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().map(|e| e == REPORT_EXTENSION).unwrap_or(false)
            {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();
        debug!(base = ?self.base, count = paths.len(), "Listed reports");
        Ok(paths)
    }

    /// Headline data for one artifact.
    pub fn overview(&self, path: &Path) -> ReportResult<ReportOverview> {
        let report = self.load(path)?;
        Ok(ReportOverview {
            path: path.to_path_buf(),
            title: report.title().to_string(),
            warnings: report.count(Level::Warning),
            errors: report.count(Level::Error),
            date: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }

    /// Overviews of every readable artifact. Unreadable ones are skipped
    /// with a warning.
    pub fn overviews(&self) -> ReportResult<Vec<ReportOverview>> {
        let mut overviews = Vec::new();
        for path in self.list()? {
            match self.overview(&path) {
                Ok(overview) => overviews.push(overview),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable report"),
            }
        }
        Ok(overviews)
    }

    /// Delete one artifact. Paths outside the base directory are refused.
    pub fn delete(&self, path: &Path) -> ReportResult<()> {
        let base = self.base.canonicalize()?;
        let target = path.canonicalize()?;
        if !target.starts_with(&base) {
            return Err(ReportError::Config(format!(
                "refusing to delete {} outside of {}",
                path.display(),
                self.base.display()
            )));
        }
        fs::remove_file(&target)?;
        info!(path = ?target, "Report deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Nightly Import"), "nightly-import");
        assert_eq!(slugify("  Sync: users / groups!  "), "sync-users-groups");
        assert_eq!(slugify("ÄÖÜ"), "report");
        assert_eq!(slugify(""), "report");
        assert_eq!(slugify("v2.1 release"), "v2-1-release");
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 21, 14, 13, 48).unwrap();
        let report = Report::new("Nightly Import").with_timestamp(ts);
        let store = ReportStore::new("/var/reports");

        assert_eq!(
            store.path_for(&report),
            PathBuf::from("/var/reports/nightly-import/2026-01-21T14-13-48.json")
        );
    }

    #[test]
    fn test_save_creates_directories_and_loads_back() {
        let temp = TempDir::new().unwrap();
        let store = ReportStore::new(temp.path().join("reports"));

        let mut report = Report::new("Import");
        report.add_warning("slow").add_error("failed");
        let path = store.save(&report).unwrap();

        assert!(path.exists());
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.entries(), report.entries());
        assert!(!loaded.is_active());
    }

    #[test]
    fn test_list_and_overview() {
        let temp = TempDir::new().unwrap();
        let store = ReportStore::new(temp.path());

        let mut a = Report::new("Alpha");
        a.add_warning("w1").add_warning("w2");
        let mut b = Report::new("Beta");
        b.add_error("e");
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        fs::write(temp.path().join("errors-during-reporting.jsonl"), "{}\n").unwrap();

        let paths = store.list().unwrap();
        assert_eq!(paths.len(), 2);

        let overviews = store.overviews().unwrap();
        let alpha = overviews.iter().find(|o| o.title == "Alpha").unwrap();
        assert_eq!(alpha.warnings, 2);
        assert_eq!(alpha.errors, 0);
        assert_eq!(alpha.date, file_stem_for(a.timestamp()));
    }

    #[test]
    fn test_overviews_skip_malformed() {
        let temp = TempDir::new().unwrap();
        let store = ReportStore::new(temp.path());
        store.save(&Report::new("Good")).unwrap();
        fs::create_dir_all(temp.path().join("bad")).unwrap();
        fs::write(temp.path().join("bad/broken.json"), "{\"title\":").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        let overviews = store.overviews().unwrap();
        assert_eq!(overviews.len(), 1);
        assert_eq!(overviews[0].title, "Good");

        let err = store.overview(&temp.path().join("bad/broken.json")).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_list_missing_base_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ReportStore::new(temp.path().join("nothing-here"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_inside_and_outside_base() {
        let temp = TempDir::new().unwrap();
        let store = ReportStore::new(temp.path().join("reports"));
        let path = store.save(&Report::new("Doomed")).unwrap();

        let outside = temp.path().join("keep.json");
        fs::write(&outside, "{}").unwrap();
        assert!(store.delete(&outside).is_err());
        assert!(outside.exists());

        store.delete(&path).unwrap();
        assert!(!path.exists());
    }
}
