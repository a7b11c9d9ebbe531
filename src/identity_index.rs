//! Multi-valued identity lookups over a trace
//!
//! A logical node can appear at many steps (search algorithms revisit
//! nodes), so both tables map an identity to the ascending list of steps
//! where it occurs rather than to a single event.
//!
//! The index is built once per trace and never mutated. Replacing a trace
//! means building a new index.
//!
//! # Example
//!
//! ```
//! use retrace::identity_index::IdentityIndex;
//! use retrace::trace_event::{Event, Trace, TraceFormat};
//!
//! let trace = Trace::new("1.4.0", TraceFormat::Current, vec![
//!     Event::new("a", None, "source"),
//!     Event::new("b", Some("a"), "expand"),
//!     Event::new("b", Some("a"), "expand"),
//! ]);
//! let index = IdentityIndex::build(&trace);
//!
//! assert_eq!(index.steps_for_id("b"), &[1, 2]);
//! assert_eq!(index.steps_with_parent(Some("a")), &[1, 2]);
//! assert_eq!(index.roots(), &[0]);
//! ```

use crate::trace_event::Trace;
use fnv::FnvHashMap;

/// Lookup tables keyed by identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityIndex {
    /// id -> steps where that id occurs
    by_id: FnvHashMap<String, Vec<usize>>,

    /// parent id -> steps whose event names that parent
    by_parent_id: FnvHashMap<String, Vec<usize>>,

    /// steps with no parent
    roots: Vec<usize>,

    len: usize,
}

impl IdentityIndex {
    /// Build both tables in a single pass over the trace
    pub fn build(trace: &Trace) -> Self {
        let mut index = Self {
            len: trace.len(),
            ..Self::default()
        };

        for (step, event) in trace.events().iter().enumerate() {
            index.by_id.entry(event.id.clone()).or_default().push(step);

            match &event.parent_id {
                Some(parent) => index
                    .by_parent_id
                    .entry(parent.clone())
                    .or_default()
                    .push(step),
                None => index.roots.push(step),
            }
        }

        index
    }

    /// Steps where `id` occurs, ascending
    pub fn steps_for_id(&self, id: &str) -> &[usize] {
        self.by_id.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Steps whose parent is `parent`, ascending; `None` selects roots
    pub fn steps_with_parent(&self, parent: Option<&str>) -> &[usize] {
        match parent {
            Some(parent) => self
                .by_parent_id
                .get(parent)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            None => &self.roots,
        }
    }

    /// Steps with no parent identity
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Number of distinct identities
    pub fn identity_count(&self) -> usize {
        self.by_id.len()
    }

    /// Number of steps in the indexed trace
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Most recent step in `steps` that does not exceed `bound`
///
/// `steps` must be ascending, as every index bucket is.
pub fn latest_at_or_before(steps: &[usize], bound: usize) -> Option<usize> {
    let end = steps.partition_point(|&s| s <= bound);
    end.checked_sub(1).map(|i| steps[i])
}

/// Earliest step in `steps` that is not below `bound`
///
/// `steps` must be ascending, as every index bucket is.
pub fn earliest_at_or_after(steps: &[usize], bound: usize) -> Option<usize> {
    let start = steps.partition_point(|&s| s < bound);
    steps.get(start).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_event::{Event, TraceFormat};

    fn revisit_trace() -> Trace {
        Trace::new(
            "1.4.0",
            TraceFormat::Current,
            vec![
                Event::new("A", None, "source"),
                Event::new("B", Some("A"), "generate"),
                Event::new("C", Some("B"), "generate"),
                Event::new("B", Some("A"), "expand"),
            ],
        )
    }

    #[test]
    fn test_build_groups_revisits() {
        let index = IdentityIndex::build(&revisit_trace());
        assert_eq!(index.len(), 4);
        assert_eq!(index.identity_count(), 3);
        assert_eq!(index.steps_for_id("A"), &[0]);
        assert_eq!(index.steps_for_id("B"), &[1, 3]);
        assert_eq!(index.steps_with_parent(Some("A")), &[1, 3]);
        assert_eq!(index.steps_with_parent(Some("B")), &[2]);
        assert_eq!(index.steps_with_parent(None), &[0]);
    }

    #[test]
    fn test_every_step_in_exactly_one_bucket() {
        let trace = revisit_trace();
        let index = IdentityIndex::build(&trace);

        let mut by_id: Vec<usize> = ["A", "B", "C"]
            .iter()
            .flat_map(|id| index.steps_for_id(id).to_vec())
            .collect();
        by_id.sort_unstable();
        assert_eq!(by_id, vec![0, 1, 2, 3]);

        let mut by_parent: Vec<usize> = [None, Some("A"), Some("B"), Some("C")]
            .iter()
            .flat_map(|p| index.steps_with_parent(*p).to_vec())
            .collect();
        by_parent.sort_unstable();
        assert_eq!(by_parent, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_identity_is_empty() {
        let index = IdentityIndex::build(&revisit_trace());
        assert!(index.steps_for_id("Z").is_empty());
        assert!(index.steps_with_parent(Some("C")).is_empty());
    }

    #[test]
    fn test_empty_trace() {
        let index = IdentityIndex::build(&Trace::new("1.4.0", TraceFormat::Current, vec![]));
        assert!(index.is_empty());
        assert!(index.roots().is_empty());
        assert_eq!(index.identity_count(), 0);
    }

    #[test]
    fn test_latest_at_or_before() {
        let steps = [2, 5, 9];
        assert_eq!(latest_at_or_before(&steps, 1), None);
        assert_eq!(latest_at_or_before(&steps, 2), Some(2));
        assert_eq!(latest_at_or_before(&steps, 8), Some(5));
        assert_eq!(latest_at_or_before(&steps, 100), Some(9));
        assert_eq!(latest_at_or_before(&[], 3), None);
    }

    #[test]
    fn test_earliest_at_or_after() {
        let steps = [2, 5, 9];
        assert_eq!(earliest_at_or_after(&steps, 0), Some(2));
        assert_eq!(earliest_at_or_after(&steps, 5), Some(5));
        assert_eq!(earliest_at_or_after(&steps, 6), Some(9));
        assert_eq!(earliest_at_or_after(&steps, 10), None);
        assert_eq!(earliest_at_or_after(&[], 0), None);
    }
}
