//! Property-based tests for lineage queries, breakpoints and playback
//!
//! Traces are generated from a small identity pool so revisits, shared
//! parents and orphaned parent references all show up often.

use proptest::prelude::*;
use retrace::breakpoint::{evaluate, Breakpoint, BreakpointSet, Comparator, EvaluationResult};
use retrace::identity_index::{latest_at_or_before, IdentityIndex};
use retrace::lineage;
use retrace::path_resolver::get_path;
use retrace::playback::PlaybackState;
use retrace::trace_event::{Event, Trace, TraceFormat};

fn arb_event() -> impl Strategy<Value = Event> {
    (0u8..6, prop::option::of(0u8..6), -20i64..20).prop_map(|(id, parent, f)| {
        let parent = parent.map(|p| format!("n{}", p));
        Event::new(format!("n{}", id), parent.as_deref(), "expand").with_property("f", f)
    })
}

fn arb_trace() -> impl Strategy<Value = Trace> {
    prop::collection::vec(arb_event(), 1..40)
        .prop_map(|events| Trace::new("1.4.0", TraceFormat::Current, events))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_path_ends_at_step_and_links_parents(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());

        // Self-parent chains are reported instead of walked
        if let Ok(path) = get_path(&index, &trace, step) {
            prop_assert_eq!(path.last().copied(), Some(step));

            let first = trace.event(path[0]).unwrap();
            if let Some(parent) = first.parent_id.as_deref() {
                prop_assert!(latest_at_or_before(index.steps_for_id(parent), path[0]).is_none());
            }

            for pair in path.windows(2) {
                let child = trace.event(pair[1]).unwrap();
                let parent = child.parent_id.as_deref().unwrap();
                prop_assert_eq!(latest_at_or_before(index.steps_for_id(parent), pair[1]), Some(pair[0]));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_precedents_never_look_ahead(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());

        let steps = lineage::flatten(&lineage::precedents(&index, &trace, step));
        prop_assert!(steps.iter().all(|&s| s <= step));
    }

    #[test]
    fn prop_subtree_never_looks_back(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());

        let steps = lineage::flatten(&lineage::subtree(&index, &trace, step));
        prop_assert!(steps.iter().all(|&s| s >= step && s < trace.len()));
    }

    #[test]
    fn prop_lineage_queries_are_idempotent(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());

        prop_assert_eq!(
            lineage::precedents(&index, &trace, step),
            lineage::precedents(&index, &trace, step)
        );
        prop_assert_eq!(
            lineage::subtree(&index, &trace, step),
            lineage::subtree(&index, &trace, step)
        );
    }

    #[test]
    fn prop_flatten_has_no_duplicates(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());

        let mut steps = lineage::flatten(&lineage::subtree(&index, &trace, step));
        let total = steps.len();
        steps.sort_unstable();
        steps.dedup();
        prop_assert_eq!(steps.len(), total);
    }

    #[test]
    fn prop_walks_stay_bounded(trace in arb_trace(), pick in any::<prop::sample::Index>()) {
        let index = IdentityIndex::build(&trace);
        let step = pick.index(trace.len());
        let n = trace.len();

        // Each step (backwards) or identity (forwards) expands at most once
        let ancestors = lineage::walk_precedents(&index, &trace, step);
        prop_assert!(ancestors.expanded >= 1 && ancestors.expanded <= n);
        prop_assert!(ancestors.tree.node_count() <= ancestors.expanded * n);

        let descendants = lineage::walk_subtree(&index, &trace, step);
        prop_assert!(descendants.expanded >= 1 && descendants.expanded <= n);
        prop_assert!(descendants.tree.node_count() <= descendants.expanded * n);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_breakpoint_order_follows_index(f in -20i64..20, first in 0i64..10, second in 0i64..10) {
        let event = Event::new("n0", None, "expand").with_property("f", f);
        let low = Breakpoint::on_property("f", Comparator::GreaterOrEqual, -100).with_index(first);
        let high = Breakpoint::on_property("f", Comparator::LessThan, 100).with_index(second);

        let expected = first.min(second);
        let set = BreakpointSet::new([low.clone(), high.clone()]);
        let result = set.evaluate(&event).unwrap();
        let EvaluationResult::Match(hit) = result else {
            return Err(TestCaseError::fail("expected a match"));
        };
        prop_assert_eq!(hit.index, expected);

        // Same winning index regardless of the order breakpoints are handed over
        let EvaluationResult::Match(reversed) = evaluate(&[high, low], &event).unwrap() else {
            return Err(TestCaseError::fail("expected a match"));
        };
        prop_assert_eq!(reversed.index, hit.index);
    }

    #[test]
    fn prop_step_to_clamps(bound in 1usize..500, n in any::<i64>()) {
        let state = PlaybackState::new(bound).step_to(n);
        prop_assert!(state.step >= state.start() && state.step <= state.end());

        if n < 0 {
            prop_assert_eq!(state.step, state.start());
        }
        if n > i64::try_from(state.end()).unwrap() {
            prop_assert_eq!(state.step, state.end());
        }
    }
}
