//! Property-based tests for the report engine
//!
//! Uses proptest to drive reports through arbitrary recording and grouping
//! sequences and check the counting, tagging, persistence and
//! reconstruction invariants.

use std::collections::HashSet;

use proptest::prelude::*;
use runreport_core::{codec, GroupId, Level, LevelCounts, RenderEvent, Report};

// ============================================================================
// Strategy Generators
// ============================================================================

fn level_strategy() -> impl Strategy<Value = Level> {
    prop::sample::select(Level::ALL.to_vec())
}

fn message_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 .:\n]{0,40}").expect("valid regex")
}

/// Operations a task can perform on a live report
#[derive(Debug, Clone)]
enum ReportOp {
    Record(Level, String),
    StartGroup,
    EndGroup,
}

fn ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<ReportOp>> {
    prop::collection::vec(
        prop_oneof![
            5 => (level_strategy(), message_strategy()).prop_map(|(l, m)| ReportOp::Record(l, m)),
            2 => Just(ReportOp::StartGroup),
            2 => Just(ReportOp::EndGroup),
        ],
        0..max_ops,
    )
}

/// Apply `ops`, returning the report and the group each entry should carry.
fn apply(ops: &[ReportOp]) -> (Report, Vec<Option<GroupId>>) {
    let mut report = Report::new("Property");
    let mut model_stack: Vec<GroupId> = Vec::new();
    let mut expected_tags = Vec::new();

    for op in ops {
        match op {
            ReportOp::Record(level, message) => {
                report.record(*level, message.clone(), "");
                expected_tags.push(model_stack.last().copied());
            }
            ReportOp::StartGroup => {
                if let Some(id) = report.start_group() {
                    model_stack.push(id);
                }
            }
            ReportOp::EndGroup => {
                report.end_group();
                model_stack.pop();
            }
        }
    }
    (report, expected_tags)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Counters always equal the per-level tally of entries
    #[test]
    fn counts_equal_tally(ops in ops_strategy(200)) {
        let (report, _) = apply(&ops);
        let tally = LevelCounts::tally(report.entries().iter().map(|e| &e.level));
        prop_assert_eq!(report.level_counts(), &tally);
        prop_assert_eq!(report.level_counts().total() as usize, report.total_entries());
    }

    /// Every entry carries the innermost group open when it was recorded
    #[test]
    fn entries_tagged_with_innermost_group(ops in ops_strategy(200)) {
        let (report, expected) = apply(&ops);
        let actual: Vec<Option<GroupId>> = report.entries().iter().map(|e| e.group_id).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Parents are always created before their children
    #[test]
    fn parents_precede_children(ops in ops_strategy(200)) {
        let (report, _) = apply(&ops);
        for group in report.groups().values() {
            if let Some(parent) = group.parent_id {
                prop_assert!(parent < group.id);
                prop_assert!(report.group(parent).is_some());
            }
        }
    }

    /// Persisting and loading preserves everything but the live state
    #[test]
    fn roundtrip_preserves_content(ops in ops_strategy(150)) {
        let (mut report, _) = apply(&ops);
        report.unwind();
        let loaded = codec::deserialize(&codec::serialize(&report).unwrap()).unwrap();

        prop_assert_eq!(loaded.title(), report.title());
        prop_assert_eq!(loaded.level_counts(), report.level_counts());
        prop_assert_eq!(loaded.groups(), report.groups());
        prop_assert_eq!(loaded.entries(), report.entries());
        prop_assert!(!loaded.is_active());
    }

    /// Reconstruction is balanced, emits every entry once, and only enters
    /// groups that were registered
    #[test]
    fn reconstruction_is_balanced(ops in ops_strategy(200)) {
        let (report, _) = apply(&ops);
        let mut depth: i64 = 0;
        let mut leaves = 0;
        let mut open: Vec<GroupId> = Vec::new();
        let mut entered = HashSet::new();

        for event in report.tree() {
            match event {
                RenderEvent::EnterGroup(id) => {
                    prop_assert!(report.group(id).is_some());
                    prop_assert_eq!(report.group(id).unwrap().parent_id, open.last().copied());
                    open.push(id);
                    entered.insert(id);
                    depth += 1;
                }
                RenderEvent::ExitGroup(id) => {
                    prop_assert_eq!(open.pop(), Some(id));
                    depth -= 1;
                    prop_assert!(depth >= 0);
                }
                RenderEvent::Leaf(entry) => {
                    prop_assert_eq!(entry.group_id, open.last().copied());
                    leaves += 1;
                }
            }
        }

        prop_assert_eq!(depth, 0);
        prop_assert_eq!(leaves, report.total_entries());
        prop_assert!(entered.len() <= report.groups().len());
    }

    /// Any level name parses back to itself
    #[test]
    fn level_names_roundtrip(level in level_strategy()) {
        prop_assert_eq!(level.as_str().parse::<Level>().unwrap(), level);
    }
}
