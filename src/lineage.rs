//! Precedent and subtree lineage over revisited identities
//!
//! Both queries walk the same shape in opposite directions:
//!
//! - [`precedents`] follows parent identities backwards. Every distinct parent
//!   that ever produced the queried identity (up to the queried step) opens a
//!   branch, resolved to that parent's most recent prior occurrence.
//! - [`subtree`] follows child identities forwards. Every distinct child
//!   identity opens a branch, resolved to its earliest occurrence at or after
//!   the current step.
//!
//! # Cycle safety
//!
//! Backward walks never expand the same *step* twice; forward walks never
//! expand the same *identity* twice. A node reached again still appears as a
//! key, with an empty subtree. Each walk therefore performs at most one
//! expansion per step and terminates on any input, including traces whose
//! parent links form loops.
//!
//! The walk uses an explicit stack and an arena, so deep lineages do not
//! consume call stack.

use crate::identity_index::{earliest_at_or_after, latest_at_or_before, IdentityIndex};
use crate::trace_event::Trace;
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Step-keyed recursive lineage tree; a leaf is an empty map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subtree(BTreeMap<usize, Subtree>);

impl Subtree {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{step: tree}`, the shape highlight consumers expect
    pub fn rooted_at(step: usize, tree: Subtree) -> Self {
        let mut root = Self::new();
        root.insert(step, tree);
        root
    }

    pub fn insert(&mut self, step: usize, tree: Subtree) {
        self.0.insert(step, tree);
    }

    pub fn get(&self, step: usize) -> Option<&Subtree> {
        self.0.get(&step)
    }

    pub fn contains_key(&self, step: usize) -> bool {
        self.0.contains_key(&step)
    }

    /// Immediate keys, ascending
    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Subtree)> + '_ {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of keys at every depth, counting repeats
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            count += tree.len();
            stack.extend(tree.0.values());
        }
        count
    }
}

/// Every step in `tree`, once each, in depth-first first-seen order
pub fn flatten(tree: &Subtree) -> Vec<usize> {
    let mut seen = FnvHashSet::default();
    let mut steps = Vec::new();
    let mut stack = vec![tree.0.iter()];

    while let Some(level) = stack.last_mut() {
        match level.next() {
            Some((&step, child)) => {
                if seen.insert(step) {
                    steps.push(step);
                }
                stack.push(child.0.iter());
            }
            None => {
                stack.pop();
            }
        }
    }

    steps
}

/// Ancestor lineage of `step` across every parent that produced its identity
///
/// Root events and out-of-range steps yield an empty tree.
pub fn precedents(index: &IdentityIndex, trace: &Trace, step: usize) -> Subtree {
    walk(Direction::Ancestors, index, trace, step).tree
}

/// Descendant lineage of `step` across every child identity it produced
///
/// Terminal events and out-of-range steps yield an empty tree.
pub fn subtree(index: &IdentityIndex, trace: &Trace, step: usize) -> Subtree {
    walk(Direction::Descendants, index, trace, step).tree
}

/// A finished lineage walk and how many nodes it expanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageWalk {
    pub tree: Subtree,

    /// Nodes whose neighbours were resolved; never more than the trace length
    pub expanded: usize,
}

/// [`precedents`] together with its expansion count
pub fn walk_precedents(index: &IdentityIndex, trace: &Trace, step: usize) -> LineageWalk {
    walk(Direction::Ancestors, index, trace, step)
}

/// [`subtree`] together with its expansion count
pub fn walk_subtree(index: &IdentityIndex, trace: &Trace, step: usize) -> LineageWalk {
    walk(Direction::Descendants, index, trace, step)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ancestors,
    Descendants,
}

impl Direction {
    /// Key that must not be expanded twice
    ///
    /// Forward walks key on identity; the first occurrence step stands in
    /// for the identity so both directions share one `usize` visited set.
    fn visit_key(self, index: &IdentityIndex, trace: &Trace, step: usize) -> Option<usize> {
        match self {
            Direction::Ancestors => Some(step),
            Direction::Descendants => {
                let event = trace.event(step)?;
                index.steps_for_id(&event.id).first().copied()
            }
        }
    }

    /// Resolved neighbour steps of `step`, ascending and deduplicated
    fn neighbours(self, index: &IdentityIndex, trace: &Trace, step: usize) -> Vec<usize> {
        let Some(event) = trace.event(step) else {
            return Vec::new();
        };

        let mut resolved = match self {
            Direction::Ancestors => {
                // Latest occurrence of this identity per distinct parent
                let occurrences = index.steps_for_id(&event.id);
                let upto = occurrences.partition_point(|&s| s <= step);
                let mut latest_by_parent: FnvHashMap<&str, usize> = FnvHashMap::default();
                for &occurrence in &occurrences[..upto] {
                    if let Some(parent) = trace
                        .event(occurrence)
                        .and_then(|e| e.parent_id.as_deref())
                    {
                        latest_by_parent.insert(parent, occurrence);
                    }
                }

                latest_by_parent
                    .into_iter()
                    .filter_map(|(parent, occurrence)| {
                        latest_at_or_before(index.steps_for_id(parent), occurrence)
                    })
                    .collect::<Vec<_>>()
            }
            Direction::Descendants => {
                // Earliest occurrence at or after `step` per distinct child id
                let children = index.steps_with_parent(Some(&event.id));
                let mut by_id: FnvHashMap<&str, Vec<usize>> = FnvHashMap::default();
                for &child in children {
                    if let Some(child_event) = trace.event(child) {
                        by_id.entry(child_event.id.as_str()).or_default().push(child);
                    }
                }

                by_id
                    .values()
                    .filter_map(|occurrences| earliest_at_or_after(occurrences, step))
                    .collect::<Vec<_>>()
            }
        };

        resolved.sort_unstable();
        resolved.dedup();
        resolved
    }
}

/// Arena node used while walking
struct Node {
    step: usize,
    children: Vec<usize>,
}

fn walk(direction: Direction, index: &IdentityIndex, trace: &Trace, step: usize) -> LineageWalk {
    if trace.event(step).is_none() {
        return LineageWalk {
            tree: Subtree::new(),
            expanded: 0,
        };
    }

    let mut arena = vec![Node {
        step,
        children: Vec::new(),
    }];
    let mut visited = FnvHashSet::default();
    let mut stack = vec![0usize];

    // Depth-first, expanding a node only on its first visit
    while let Some(node) = stack.pop() {
        let current = arena[node].step;
        let Some(key) = direction.visit_key(index, trace, current) else {
            continue;
        };
        if !visited.insert(key) {
            continue;
        }

        let neighbours = direction.neighbours(index, trace, current);
        let first_child = arena.len();
        for &neighbour in &neighbours {
            arena.push(Node {
                step: neighbour,
                children: Vec::new(),
            });
        }
        arena[node].children = (first_child..arena.len()).collect();

        // Reverse so the lowest step is expanded first
        stack.extend((first_child..arena.len()).rev());
    }

    let expanded = visited.len();
    tracing::trace!(?direction, step, nodes = arena.len(), expanded, "lineage walk finished");

    // Children always sit after their parent in the arena
    let mut built: Vec<Subtree> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), Subtree::new);
    for node in (0..arena.len()).rev() {
        let mut tree = Subtree::new();
        for &child in &arena[node].children {
            tree.insert(arena[child].step, std::mem::take(&mut built[child]));
        }
        built[node] = tree;
    }

    LineageWalk {
        tree: built.swap_remove(0),
        expanded,
    }
}
