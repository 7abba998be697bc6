//! Entry and group records.
//!
//! Entries are the leveled messages of a report. Groups carry no entries of
//! their own: an entry points at its group, and a group points at its parent,
//! so nesting is recovered at display time (see [`crate::tree`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::Level;

/// Identifier of a group, unique within one report.
///
/// Ids are handed out from a per-report counter starting at 1, so a parent
/// always has a smaller id than any of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl GroupId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A single leveled message in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub level: Level,

    pub message: String,

    /// Display/filter hint, often empty
    pub category: String,

    /// Innermost group open when the entry was recorded; `None` at top level
    pub group_id: Option<GroupId>,

    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Create a new ungrouped entry stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            category: category.into(),
            group_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Tag the entry with a group.
    pub fn in_group(mut self, group_id: Option<GroupId>) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id.is_some()
    }
}

/// A grouping marker with a pointer to the group that enclosed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,

    /// Group on top of the stack when this one was started; `None` at top level
    pub parent_id: Option<GroupId>,
}

impl Group {
    pub fn new(id: GroupId, parent_id: Option<GroupId>) -> Self {
        Self { id, parent_id }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}
