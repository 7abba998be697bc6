//! The report engine: recording, grouping and counting.
//!
//! A [`Report`] is written by one task in program order. Entries are appended
//! and never reordered; every entry bumps the counter of its level; groups are
//! opened and closed with strict LIFO discipline and entries are tagged with
//! whatever group is innermost at the moment they are recorded.
//!
//! ```
//! use runreport_core::{Level, Report};
//!
//! let mut report = Report::new("Nightly import");
//! report.add_info("Fetching feed");
//! report.start_group();
//! report.add_warning("Row 17 skipped").add_success("Imported 412 rows");
//! report.end_group();
//!
//! assert_eq!(report.count(Level::Warning), 1);
//! assert_eq!(report.groups().len(), 1);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::dispatch::NotificationPolicy;
use crate::entry::{Entry, Group, GroupId};
use crate::level::{Level, LevelCounts};
use crate::tree::{self, TreeEvents};

/// Title used when a report is started without one.
pub const DEFAULT_TITLE: &str = "Anonymous Report";

/// Accumulated entries, groups and counters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    id: Option<String>,
    title: String,
    timestamp: DateTime<Utc>,
    entries: Vec<Entry>,
    groups: BTreeMap<GroupId, Group>,
    level_counts: LevelCounts,
    open_groups: Vec<GroupId>,
    group_id_counter: u64,
    policy: NotificationPolicy,
    active: bool,
}

/// Everything a persisted report carries; used to rebuild a read-only report.
#[derive(Debug, Clone)]
pub(crate) struct ReportParts {
    pub id: Option<String>,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<Entry>,
    pub groups: BTreeMap<GroupId, Group>,
    pub level_counts: LevelCounts,
    pub policy: NotificationPolicy,
}

impl Default for Report {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE)
    }
}

impl Report {
    /// Start a live report stamped with the current time.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            timestamp: Utc::now(),
            entries: Vec::new(),
            groups: BTreeMap::new(),
            level_counts: LevelCounts::new(),
            open_groups: Vec::new(),
            group_id_counter: 0,
            policy: NotificationPolicy::default(),
            active: true,
        }
    }

    /// Set the external identity used to tell concurrent reports apart.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn from_parts(parts: ReportParts) -> Self {
        Self {
            id: parts.id,
            title: parts.title,
            timestamp: parts.timestamp,
            entries: parts.entries,
            groups: parts.groups,
            level_counts: parts.level_counts,
            open_groups: Vec::new(),
            group_id_counter: 0,
            policy: parts.policy,
            active: false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Recording
    // ═══════════════════════════════════════════════════════════════════════

    /// Record an entry at `level`.
    ///
    /// The entry is tagged with the innermost open group, if any. Calls on an
    /// inactive report are ignored.
    pub fn record(
        &mut self,
        level: Level,
        message: impl Into<String>,
        category: impl Into<String>,
    ) -> &mut Self {
        if !self.active {
            warn!(title = %self.title, %level, "Ignoring entry recorded on an inactive report");
            return self;
        }

        let entry = Entry::new(level, message, category).in_group(self.active_group());
        self.level_counts.increment(level);
        self.entries.push(entry);
        self
    }

    pub fn add_summary(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Summary, message, "")
    }

    pub fn add_info(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Info, message, "")
    }

    pub fn add_notice(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Notice, message, "")
    }

    pub fn add_success(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Success, message, "")
    }

    pub fn add_warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Warning, message, "")
    }

    pub fn add_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Error, message, "")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Grouping
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a group nested in the currently active one.
    ///
    /// Returns the new group's id, or `None` if the report is inactive.
    pub fn start_group(&mut self) -> Option<GroupId> {
        if !self.active {
            warn!(title = %self.title, "Ignoring start_group on an inactive report");
            return None;
        }

        let parent_id = self.active_group();
        self.group_id_counter += 1;
        let id = GroupId(self.group_id_counter);
        self.open_groups.push(id);
        self.groups.insert(id, Group::new(id, parent_id));
        trace!(group = %id, depth = self.open_groups.len(), "Group started");
        Some(id)
    }

    /// Close the most recently opened group.
    ///
    /// With no group open this is a no-op returning `None`.
    pub fn end_group(&mut self) -> Option<GroupId> {
        if !self.active {
            warn!(title = %self.title, "Ignoring end_group on an inactive report");
            return None;
        }

        let closed = self.open_groups.pop();
        match closed {
            Some(id) => trace!(group = %id, depth = self.open_groups.len(), "Group ended"),
            None => warn!(title = %self.title, "end_group called with no open group"),
        }
        closed
    }

    /// Close every open group, innermost first. Returns how many were closed.
    pub fn unwind(&mut self) -> usize {
        let mut closed = 0;
        while !self.open_groups.is_empty() {
            if self.end_group().is_none() {
                break;
            }
            closed += 1;
        }
        closed
    }

    /// Group new entries are attached to.
    pub fn active_group(&self) -> Option<GroupId> {
        self.open_groups.last().copied()
    }

    pub fn is_grouping(&self) -> bool {
        !self.open_groups.is_empty()
    }

    /// Number of currently open groups.
    pub fn depth(&self) -> usize {
        self.open_groups.len()
    }

    pub fn open_groups(&self) -> &[GroupId] {
        &self.open_groups
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }

    /// Entries of one level, in recording order.
    pub fn entries_by_level(&self, level: Level) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.iter().filter(move |e| e.level == level)
    }

    pub fn groups(&self) -> &BTreeMap<GroupId, Group> {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn level_counts(&self) -> &LevelCounts {
        &self.level_counts
    }

    pub fn count(&self, level: Level) -> u64 {
        self.level_counts.get(level)
    }

    pub fn has_errors(&self) -> bool {
        self.count(Level::Error) > 0
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// `true` for the live, recording instance.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop accepting writes. Used once the report has been finalized.
    pub(crate) fn freeze(&mut self) {
        self.active = false;
    }

    /// Nested render events for this report's entries.
    pub fn tree(&self) -> TreeEvents<'_> {
        tree::reconstruct(&self.entries, &self.groups)
    }
}
