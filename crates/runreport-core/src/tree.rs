//! Rebuilding nesting from flat entries.
//!
//! Reports store entries as a flat list where each entry points at its group
//! and each group at its parent. [`reconstruct`] walks that list once and
//! yields balanced [`RenderEvent`]s for a presentation layer.
//!
//! For every entry the root-to-group path is computed and the reconstruction
//! stack is moved onto it: every open group that is not on the path is closed
//! (possibly several at once, when the writer returned from deep nesting),
//! then every path element not yet open is entered, outermost first. Groups
//! that never received an entry directly are still entered when one of their
//! descendants did.

use std::collections::BTreeMap;
use std::fmt;

use crate::entry::{Entry, Group, GroupId};

/// One step of a nested rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent<'a> {
    EnterGroup(GroupId),
    Leaf(&'a Entry),
    ExitGroup(GroupId),
}

impl fmt::Display for RenderEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderEvent::EnterGroup(id) => write!(f, "Enter({})", id),
            RenderEvent::Leaf(entry) => write!(f, "Leaf({})", entry.message),
            RenderEvent::ExitGroup(id) => write!(f, "Exit({})", id),
        }
    }
}

/// Produce the render events for `entries` grouped by `groups`.
pub fn reconstruct<'a>(entries: &'a [Entry], groups: &'a BTreeMap<GroupId, Group>) -> TreeEvents<'a> {
    TreeEvents {
        entries: entries.iter(),
        groups,
        stack: Vec::new(),
        target: Vec::new(),
        keep: 0,
        current: None,
    }
}

/// Lazy iterator over [`RenderEvent`]s. Consumed once.
#[derive(Debug, Clone)]
pub struct TreeEvents<'a> {
    entries: std::slice::Iter<'a, Entry>,
    groups: &'a BTreeMap<GroupId, Group>,
    /// Groups currently entered, outermost first
    stack: Vec<GroupId>,
    /// Root-to-group path of the pending entry
    target: Vec<GroupId>,
    /// Length of the prefix shared by `stack` and `target`
    keep: usize,
    current: Option<&'a Entry>,
}

impl<'a> TreeEvents<'a> {
    /// Nesting depth after the most recently yielded event.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn path_to(&self, group_id: Option<GroupId>) -> Vec<GroupId> {
        let mut path = Vec::new();
        let mut current = group_id;
        while let Some(id) = current {
            // bounded by the registry size even if the parent chain loops
            if path.len() > self.groups.len() {
                break;
            }
            path.push(id);
            current = self.groups.get(&id).and_then(|g| g.parent_id);
        }
        path.reverse();
        path
    }

    fn aim_at(&mut self, entry: &'a Entry) {
        self.target = self.path_to(entry.group_id);
        self.keep = self
            .stack
            .iter()
            .zip(&self.target)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        self.current = Some(entry);
    }
}

impl<'a> Iterator for TreeEvents<'a> {
    type Item = RenderEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stack.len() > self.keep {
                let id = self.stack.pop()?;
                return Some(RenderEvent::ExitGroup(id));
            }
            if self.stack.len() < self.target.len() {
                let id = self.target[self.stack.len()];
                self.stack.push(id);
                return Some(RenderEvent::EnterGroup(id));
            }
            if let Some(entry) = self.current.take() {
                return Some(RenderEvent::Leaf(entry));
            }
            match self.entries.next() {
                Some(entry) => self.aim_at(entry),
                None => {
                    if self.stack.is_empty() {
                        return None;
                    }
                    self.target.clear();
                    self.keep = 0;
                }
            }
        }
    }
}

impl std::iter::FusedIterator for TreeEvents<'_> {}
