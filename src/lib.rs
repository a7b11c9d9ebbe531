//! Retrace - replay engine for recorded search-algorithm traces
//!
//! This library normalizes versioned trace payloads into a flat event list,
//! indexes events by identity, answers lineage queries (backtracking path,
//! precedents, subtree) and drives a breakpoint-aware playback cursor.

pub mod breakpoint;
pub mod cli;
pub mod config;
pub mod identity_index;
pub mod lineage;
pub mod path_resolver;
pub mod playback;
pub mod session;
pub mod trace_event;
pub mod trace_normalizer;
