//! Report <-> persisted JSON artifact.
//!
//! The artifact is flat: one counters map, one group list and one entry list
//! in recording order. Runtime-only state (the open-group stack and the group
//! id counter) is not written; a decoded report is read-only.
//!
//! ```json
//! {
//!   "id": null,
//!   "title": "Nightly import",
//!   "recipients": ["ops@example.com"],
//!   "sendEmailOnlyOnError": true,
//!   "emailFullReport": false,
//!   "emailMethod": "emailViaQueue",
//!   "entryLevels": {"summary": 0, "info": 1, "notice": 0, "success": 0, "warning": 1, "error": 0},
//!   "groups": [{"id": 1, "parentId": null}],
//!   "entries": [
//!     {"level": "info", "message": "Fetching", "category": "", "groupId": null, "timestamp": "..."},
//!     {"level": "warning", "message": "Row skipped", "category": "", "groupId": 1, "timestamp": "..."}
//!   ],
//!   "timestamp": "2026-01-21T14:13:48Z"
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{EmailMethod, NotificationPolicy};
use crate::entry::{Entry, Group, GroupId};
use crate::error::{ReportError, ReportResult};
use crate::level::LevelCounts;
use crate::report::{Report, ReportParts};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactOut<'a> {
    id: Option<&'a str>,
    title: &'a str,
    recipients: &'a [String],
    send_email_only_on_error: bool,
    email_full_report: bool,
    email_method: EmailMethod,
    entry_levels: &'a LevelCounts,
    groups: Vec<&'a Group>,
    entries: &'a [Entry],
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactIn {
    id: Option<String>,
    title: String,
    recipients: Vec<String>,
    send_email_only_on_error: bool,
    email_full_report: bool,
    email_method: EmailMethod,
    entry_levels: LevelCounts,
    groups: Vec<Group>,
    entries: Vec<Entry>,
    timestamp: DateTime<Utc>,
}

/// Encode a report as a pretty-printed JSON artifact.
pub fn serialize(report: &Report) -> ReportResult<Vec<u8>> {
    let policy = report.policy();
    let artifact = ArtifactOut {
        id: report.id(),
        title: report.title(),
        recipients: &policy.recipients,
        send_email_only_on_error: policy.send_email_only_on_error,
        email_full_report: policy.email_full_report,
        email_method: policy.email_method,
        entry_levels: report.level_counts(),
        groups: report.groups().values().collect(),
        entries: report.entries(),
        timestamp: report.timestamp(),
    };
    serde_json::to_vec_pretty(&artifact).map_err(|e| ReportError::Serialization(e.to_string()))
}

/// Decode an artifact into a read-only report.
///
/// Fails with [`ReportError::Malformed`] if the bytes are not a complete,
/// internally consistent artifact.
pub fn deserialize(bytes: &[u8]) -> ReportResult<Report> {
    let artifact: ArtifactIn =
        serde_json::from_slice(bytes).map_err(|e| ReportError::Malformed(e.to_string()))?;
    let groups = validate(&artifact).map_err(ReportError::Malformed)?;

    Ok(Report::from_parts(ReportParts {
        id: artifact.id,
        title: artifact.title,
        timestamp: artifact.timestamp,
        entries: artifact.entries,
        groups,
        level_counts: artifact.entry_levels,
        policy: NotificationPolicy {
            recipients: artifact.recipients,
            send_email_only_on_error: artifact.send_email_only_on_error,
            email_full_report: artifact.email_full_report,
            email_method: artifact.email_method,
        },
    }))
}

fn validate(artifact: &ArtifactIn) -> Result<BTreeMap<GroupId, Group>, String> {
    let mut groups = BTreeMap::new();
    for group in &artifact.groups {
        if groups.insert(group.id, *group).is_some() {
            return Err(format!("duplicate group id {}", group.id.get()));
        }
    }

    for group in groups.values() {
        if let Some(parent) = group.parent_id {
            if !groups.contains_key(&parent) {
                return Err(format!(
                    "group {} references unknown parent {}",
                    group.id.get(),
                    parent.get()
                ));
            }
            if parent >= group.id {
                return Err(format!(
                    "group {} has parent {} that was not created before it",
                    group.id.get(),
                    parent.get()
                ));
            }
        }
    }

    for (index, entry) in artifact.entries.iter().enumerate() {
        if let Some(group_id) = entry.group_id {
            if !groups.contains_key(&group_id) {
                return Err(format!(
                    "entry {} references unknown group {}",
                    index,
                    group_id.get()
                ));
            }
        }
    }

    let tally = LevelCounts::tally(artifact.entries.iter().map(|e| &e.level));
    if tally != artifact.entry_levels {
        let mismatched: Vec<String> = tally
            .iter()
            .filter(|(level, n)| artifact.entry_levels.get(*level) != *n)
            .map(|(level, n)| {
                format!(
                    "{} (recorded {}, counted {})",
                    level,
                    artifact.entry_levels.get(level),
                    n
                )
            })
            .collect();
        return Err(format!("entry level counts disagree with entries: {}", mismatched.join(", ")));
    }

    Ok(groups)
}
