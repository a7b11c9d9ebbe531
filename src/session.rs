//! Trace slot: superseding loads, copy-on-replace queries, highlights
//!
//! A [`TraceSession`] owns one loaded trace at a time. Loading parses the
//! payload on a blocking worker and installs the result by swapping an
//! `Arc<LoadedTrace>`; queries that already hold the previous `Arc` finish
//! against it undisturbed. When loads overlap, only the most recently
//! requested one may install.
//!
//! # Example
//!
//! ```
//! use retrace::session::{HighlightKind, TraceSession};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let session = TraceSession::new("search");
//! let payload = r#"{"version": "1.4.0", "events": [
//!     {"type": "source", "id": "A"},
//!     {"type": "expand", "id": "B", "pId": "A"}
//! ]}"#;
//!
//! let loaded = session.load(payload.to_string(), "1.4.0".to_string()).await?;
//! assert_eq!(loaded.get_path(1)?, vec![0, 1]);
//!
//! let highlight = loaded.highlight(HighlightKind::Subtree, 0)?.unwrap();
//! assert_eq!(highlight.steps(), vec![0, 1]);
//! # Ok(())
//! # }
//! ```

use crate::identity_index::IdentityIndex;
use crate::lineage::{self, Subtree};
use crate::path_resolver::{self, CycleDetected};
use crate::playback::{PlaybackController, DEFAULT_SCAN_BATCH};
use crate::trace_event::{Event, EventSource, Trace};
use crate::trace_normalizer::{self, NormalizationError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// A trace together with its identity index; immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTrace {
    trace: Trace,
    index: IdentityIndex,
}

impl LoadedTrace {
    pub fn new(trace: Trace) -> Self {
        let index = IdentityIndex::build(&trace);
        Self { trace, index }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    /// Ancestor chain of `step`, root first
    pub fn get_path(&self, step: usize) -> Result<Vec<usize>, CycleDetected> {
        path_resolver::get_path(&self.index, &self.trace, step)
    }

    /// Ancestor lineage of `step`
    pub fn precedents(&self, step: usize) -> Subtree {
        lineage::precedents(&self.index, &self.trace, step)
    }

    /// Descendant lineage of `step`
    pub fn subtree(&self, step: usize) -> Subtree {
        lineage::subtree(&self.index, &self.trace, step)
    }

    /// Highlight of `kind` anchored at `step`, or `None` when nothing relates
    pub fn highlight(&self, kind: HighlightKind, step: usize) -> Result<Option<Highlight>, CycleDetected> {
        let shape = match kind {
            HighlightKind::Backtracking => {
                let path = self.get_path(step)?;
                if path.len() <= 1 {
                    return Ok(None);
                }
                HighlightShape::Path(path)
            }
            HighlightKind::Precedent | HighlightKind::Subtree => {
                let tree = if kind == HighlightKind::Precedent {
                    self.precedents(step)
                } else {
                    self.subtree(step)
                };
                if tree.is_empty() {
                    return Ok(None);
                }
                HighlightShape::Tree(Subtree::rooted_at(step, tree))
            }
        };

        Ok(Some(Highlight { kind, step, shape }))
    }
}

impl EventSource for LoadedTrace {
    fn len(&self) -> usize {
        self.trace.len()
    }

    fn event(&self, step: usize) -> Option<&Event> {
        self.trace.event(step)
    }
}

/// Relationship a highlight shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    /// Every event from the root to the selected one
    Backtracking,
    /// Every precedent of the selected node
    Precedent,
    /// Every consequence of the selected node
    Subtree,
}

/// Highlight payload: a flat path or a `{step: tree}` lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HighlightShape {
    Path(Vec<usize>),
    Tree(Subtree),
}

/// Derived view handed to visualization collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(rename = "type")]
    pub kind: HighlightKind,
    pub step: usize,
    #[serde(rename = "path")]
    pub shape: HighlightShape,
}

impl Highlight {
    /// Every involved step, each once
    pub fn steps(&self) -> Vec<usize> {
        match &self.shape {
            HighlightShape::Path(path) => path.clone(),
            HighlightShape::Tree(tree) => lineage::flatten(tree),
        }
    }
}

/// Why a load did not install a trace
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error("Load superseded by a newer request for slot '{0}'")]
    Superseded(String),

    #[error("Normalization worker failed: {0}")]
    Worker(String),
}

/// One trace slot with its playback controller
#[derive(Debug)]
pub struct TraceSession {
    name: String,
    current: RwLock<Option<Arc<LoadedTrace>>>,
    generation: Mutex<u64>,
    playback: PlaybackController,
}

impl TraceSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scan_batch(name, DEFAULT_SCAN_BATCH)
    }

    pub fn with_scan_batch(name: impl Into<String>, scan_batch: usize) -> Self {
        Self {
            name: name.into(),
            current: RwLock::new(None),
            generation: Mutex::new(0),
            playback: PlaybackController::with_scan_batch(0, scan_batch),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Snapshot of the installed trace
    pub fn current(&self) -> Option<Arc<LoadedTrace>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        *generation
    }

    /// Parse `payload` off the calling task and install it unless superseded
    ///
    /// The generation is taken when the load is requested, so a later call
    /// supersedes this one even if this future has not been polled yet.
    pub fn load(
        &self,
        payload: String,
        version: String,
    ) -> impl std::future::Future<Output = Result<Arc<LoadedTrace>, LoadError>> + '_ {
        let generation = self.next_generation();

        async move {
            let parsed = tokio::task::spawn_blocking(move || {
                trace_normalizer::normalize(&payload, &version).map(LoadedTrace::new)
            })
            .await;

            // A superseded load reports nothing of its own, not even a parse failure
            if !self.is_current(generation) {
                tracing::debug!(slot = %self.name, generation, "discarding superseded trace load");
                return Err(LoadError::Superseded(self.name.clone()));
            }

            let parsed = parsed.map_err(|e| LoadError::Worker(e.to_string()))??;
            self.install_if_current(generation, parsed)
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner) == generation
    }

    /// Install an already-normalized trace, superseding outstanding loads
    pub fn install(&self, trace: Trace) -> Result<Arc<LoadedTrace>, LoadError> {
        let generation = self.next_generation();
        self.install_if_current(generation, LoadedTrace::new(trace))
    }

    fn install_if_current(&self, generation: u64, loaded: LoadedTrace) -> Result<Arc<LoadedTrace>, LoadError> {
        // Hold the generation lock across the swap so a newer request cannot
        // interleave between the check and the install
        let latest = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *latest != generation {
            tracing::debug!(slot = %self.name, generation, latest = *latest, "discarding superseded trace load");
            return Err(LoadError::Superseded(self.name.clone()));
        }

        let loaded = Arc::new(loaded);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&loaded));
        self.playback.reload(loaded.trace().len());
        drop(latest);

        tracing::info!(
            slot = %self.name,
            steps = loaded.trace().len(),
            format = ?loaded.trace().format,
            "trace installed"
        );
        Ok(loaded)
    }
}
