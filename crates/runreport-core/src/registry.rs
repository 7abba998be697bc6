//! Process-wide map of live reporters by id.
//!
//! The registry is an ordinary value the host creates and passes around;
//! there is no global instance. Each reporter sits behind its own mutex so
//! different tasks can write different reports at the same time.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{ReportError, ReportResult};
use crate::report::Report;
use crate::reporter::{Collaborators, FinalizeOutcome, Reporter};

pub type SharedReporter = Arc<Mutex<Reporter>>;

#[derive(Debug, Default)]
pub struct ReportRegistry {
    reporters: Mutex<BTreeMap<String, SharedReporter>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new reporter for `report` under `id`.
    ///
    /// The report takes `id` as its identity. Fails with
    /// [`ReportError::DuplicateId`] if the id is taken.
    pub fn create(&self, id: impl Into<String>, report: Report, collaborators: Collaborators) -> ReportResult<SharedReporter> {
        let id = id.into();
        let mut reporters = self.reporters.lock();
        if reporters.contains_key(&id) {
            return Err(ReportError::DuplicateId(id));
        }

        let reporter = Arc::new(Mutex::new(Reporter::new(report.with_id(id.clone()), collaborators)?));
        reporters.insert(id.clone(), Arc::clone(&reporter));
        debug!(%id, "Reporter registered");
        Ok(reporter)
    }

    pub fn get(&self, id: &str) -> ReportResult<SharedReporter> {
        self.reporters
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ReportError::NotFound(id.to_string()))
    }

    /// Unregister a reporter. The caller decides whether to finalize it.
    pub fn remove(&self, id: &str) -> ReportResult<SharedReporter> {
        let removed = self
            .reporters
            .lock()
            .remove(id)
            .ok_or_else(|| ReportError::NotFound(id.to_string()))?;
        debug!(%id, "Reporter removed");
        Ok(removed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.reporters.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.reporters.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reporters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.lock().is_empty()
    }

    /// Finalize and unregister every reporter; the shutdown path.
    pub fn finalize_all(&self) -> Vec<(String, ReportResult<FinalizeOutcome>)> {
        let drained: Vec<(String, SharedReporter)> = std::mem::take(&mut *self.reporters.lock()).into_iter().collect();

        drained
            .into_iter()
            .map(|(id, reporter)| {
                let result = reporter.lock().finalize();
                if let Err(e) = &result {
                    error!(%id, error = %e, "Failed to finalize report at shutdown");
                }
                (id, result)
            })
            .collect()
    }
}
