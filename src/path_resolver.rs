//! Backtracking path resolution
//!
//! Walks from a step back to its root by repeatedly resolving the parent
//! identity. Because identities are revisited, each parent id is resolved to
//! its most recent occurrence at or before the current step.
//!
//! ```text
//! step  id  pId
//!  0    A   -
//!  1    B   A
//!  2    C   B
//!  3    B   A        get_path(3) = [0, 3]
//!                    get_path(2) = [0, 1, 2]
//! ```

use crate::identity_index::{latest_at_or_before, IdentityIndex};
use crate::trace_event::Trace;
use thiserror::Error;

/// The parent chain of a step is longer than the trace itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cycle detected while resolving the path to step {step}")]
pub struct CycleDetected {
    /// Step the resolution started from
    pub step: usize,
}

/// Ancestor chain of `step`, root first, `step` last
///
/// A path of length 1 means no ancestor occurrence was found. A step outside
/// the trace yields an empty path.
pub fn get_path(index: &IdentityIndex, trace: &Trace, step: usize) -> Result<Vec<usize>, CycleDetected> {
    let Some(mut event) = trace.event(step) else {
        return Ok(Vec::new());
    };

    let mut path = vec![step];
    let mut current = step;

    while let Some(parent) = event.parent_id.as_deref() {
        let Some(ancestor) = latest_at_or_before(index.steps_for_id(parent), current) else {
            break;
        };

        path.push(ancestor);
        if path.len() > trace.len() {
            tracing::warn!(step, "parent chain exceeds trace length");
            return Err(CycleDetected { step });
        }

        current = ancestor;
        match trace.event(current) {
            Some(next) => event = next,
            None => break,
        }
    }

    path.reverse();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_event::{Event, TraceFormat};

    fn trace_of(events: Vec<Event>) -> (Trace, IdentityIndex) {
        let trace = Trace::new("1.4.0", TraceFormat::Current, events);
        let index = IdentityIndex::build(&trace);
        (trace, index)
    }

    fn revisit() -> (Trace, IdentityIndex) {
        trace_of(vec![
            Event::new("A", None, "source"),
            Event::new("B", Some("A"), "generate"),
            Event::new("C", Some("B"), "generate"),
            Event::new("B", Some("A"), "expand"),
        ])
    }

    #[test]
    fn test_revisited_node_resolves_original_ancestor() {
        let (trace, index) = revisit();
        assert_eq!(get_path(&index, &trace, 3).unwrap(), vec![0, 3]);
        assert_eq!(get_path(&index, &trace, 2).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_root_has_singleton_path() {
        let (trace, index) = revisit();
        assert_eq!(get_path(&index, &trace, 0).unwrap(), vec![0]);
    }

    #[test]
    fn test_most_recent_prior_occurrence_wins() {
        let (trace, index) = trace_of(vec![
            Event::new("A", None, "source"),
            Event::new("B", Some("A"), "generate"),
            Event::new("B", Some("A"), "generate"),
            Event::new("C", Some("B"), "expand"),
            Event::new("B", Some("A"), "generate"),
        ]);
        // B occurs at 1, 2 and 4; the latest not after 3 is 2
        assert_eq!(get_path(&index, &trace, 3).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_parent_only_seen_later_stops_the_walk() {
        let (trace, index) = trace_of(vec![
            Event::new("C", Some("B"), "expand"),
            Event::new("B", None, "source"),
        ]);
        assert_eq!(get_path(&index, &trace, 0).unwrap(), vec![0]);
    }

    #[test]
    fn test_unknown_parent_stops_the_walk() {
        let (trace, index) = trace_of(vec![Event::new("A", Some("ghost"), "expand")]);
        assert_eq!(get_path(&index, &trace, 0).unwrap(), vec![0]);
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let (trace, index) = trace_of(vec![
            Event::new("A", None, "source"),
            Event::new("L", Some("L"), "expand"),
        ]);
        assert_eq!(get_path(&index, &trace, 1), Err(CycleDetected { step: 1 }));
    }

    #[test]
    fn test_out_of_range_step_is_empty() {
        let (trace, index) = revisit();
        assert!(get_path(&index, &trace, 99).unwrap().is_empty());
    }
}
