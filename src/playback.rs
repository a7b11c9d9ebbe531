//! Stepwise playback with breakpoint checks
//!
//! [`PlaybackState`] is a plain value with pure transitions; the host owns it
//! and decides when to apply them. [`PlaybackController`] is the single
//! control point that serializes transitions for one trace and runs the
//! asynchronous breakpoint-checked advance.
//!
//! # Cancellation
//!
//! Every operation on the controller starts a new request epoch. A
//! breakpoint-checked scan captures the epoch when it is *requested* and only
//! commits if the epoch is unchanged when it finishes, so the last requested
//! operation wins even when an older scan completes later.
//!
//! ```text
//! step_with_breakpoint_check(5)   epoch 1 ──scan──────────────┐
//! stop()                          epoch 2 → {step: 0, paused}  │
//!                                                   commit? 1 ≠ 2 → Cancelled
//! ```

use crate::breakpoint::{BreakpointHit, BreakpointSet, EvaluationError, EvaluationResult};
use crate::trace_event::EventSource;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Events evaluated between scheduler yields during a scan
pub const DEFAULT_SCAN_BATCH: usize = 64;

/// Transport mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Cursor over a trace of `bound` steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub step: usize,
    pub mode: PlaybackMode,
    bound: usize,
}

impl PlaybackState {
    /// Idle cursor at the first step of a trace with `bound` steps
    pub fn new(bound: usize) -> Self {
        Self {
            step: 0,
            mode: PlaybackMode::Idle,
            bound,
        }
    }

    /// First addressable step (always 0)
    pub fn start(&self) -> usize {
        0
    }

    /// Last addressable step (0 for an empty trace)
    pub fn end(&self) -> usize {
        self.bound.saturating_sub(1)
    }

    /// Number of steps the cursor ranges over
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// A trace is loaded
    pub fn is_ready(&self) -> bool {
        self.bound > 0
    }

    pub fn is_playing(&self) -> bool {
        self.mode == PlaybackMode::Playing
    }

    pub fn can_play(&self) -> bool {
        self.is_ready() && !self.is_playing() && self.step < self.end()
    }

    pub fn can_pause(&self) -> bool {
        self.is_ready() && self.is_playing()
    }

    pub fn can_stop(&self) -> bool {
        self.is_ready() && self.step > self.start()
    }

    pub fn can_step_forward(&self) -> bool {
        self.is_ready() && !self.is_playing() && self.step < self.end()
    }

    pub fn can_step_backward(&self) -> bool {
        self.is_ready() && !self.is_playing() && self.step > self.start()
    }

    /// Clamp any step request into `[start, end]`
    pub fn clamp(&self, n: i64) -> usize {
        let end = i64::try_from(self.end()).unwrap_or(i64::MAX);
        // Both bounds are non-negative and fit usize
        n.clamp(0, end) as usize
    }

    /// Step reached by moving `delta` from the cursor, clamped
    pub fn step_by(&self, delta: i64) -> usize {
        let current = i64::try_from(self.step).unwrap_or(i64::MAX);
        self.clamp(current.saturating_add(delta))
    }

    pub fn step_to(self, n: i64) -> Self {
        Self {
            step: self.clamp(n),
            ..self
        }
    }

    pub fn step_forward(self) -> Self {
        Self {
            step: self.step_by(1),
            ..self
        }
    }

    pub fn step_backward(self) -> Self {
        Self {
            step: self.step_by(-1),
            ..self
        }
    }

    pub fn stop(self) -> Self {
        Self {
            step: self.start(),
            mode: PlaybackMode::Paused,
            ..self
        }
    }

    pub fn play(self) -> Self {
        Self {
            step: self.step_by(1),
            mode: PlaybackMode::Playing,
            ..self
        }
    }

    pub fn pause(self, offset: i64) -> Self {
        Self {
            step: self.step_by(offset),
            mode: PlaybackMode::Paused,
            ..self
        }
    }

    /// One playing tick of `count` steps
    pub fn tick(self, count: i64) -> Self {
        Self {
            step: self.step_by(count),
            mode: PlaybackMode::Playing,
            ..self
        }
    }

    /// Rebind to a newly loaded trace of `bound` steps
    pub fn reload(self, bound: usize) -> Self {
        let rebound = Self { bound, ..self };
        Self {
            step: self.step.min(rebound.end()),
            mode: if bound == 0 {
                PlaybackMode::Idle
            } else {
                self.mode
            },
            bound,
        }
    }
}

/// Direction of a breakpoint search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Why a scan stopped at a step
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Hit(BreakpointHit),
    Failed(EvaluationError),
}

/// A step where a scan stopped
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointStop {
    pub step: usize,
    pub reason: StopReason,
}

impl BreakpointStop {
    /// Message suitable for a notification
    pub fn message(&self) -> String {
        match &self.reason {
            StopReason::Hit(hit) => format!("Breakpoint hit: {} (step {})", hit.description, self.step),
            StopReason::Failed(error) => {
                format!("{} (step {})", error.to_string().trim_end_matches('.'), self.step)
            }
        }
    }
}

/// Evaluate the breakpoints at one step; events outside the source never stop
fn check_step<E>(events: &E, breakpoints: &BreakpointSet, step: usize) -> Option<StopReason>
where
    E: EventSource + ?Sized,
{
    let event = events.event(step)?;
    match breakpoints.evaluate(event) {
        Ok(EvaluationResult::Match(hit)) => Some(StopReason::Hit(hit)),
        Ok(EvaluationResult::NoMatch) => None,
        Err(error) => Some(StopReason::Failed(error)),
    }
}

/// First step after the cursor (in `direction`) that stops on a breakpoint
///
/// Evaluation failures stop the search too, so they are never skipped.
pub fn find_breakpoint<E>(
    state: &PlaybackState,
    events: &E,
    breakpoints: &BreakpointSet,
    direction: ScanDirection,
) -> Option<BreakpointStop>
where
    E: EventSource + ?Sized,
{
    if !state.is_ready() {
        return None;
    }

    let candidates: Box<dyn Iterator<Item = usize>> = match direction {
        ScanDirection::Forward => Box::new(state.step.saturating_add(1)..=state.end()),
        ScanDirection::Backward => Box::new((state.start()..state.step).rev()),
    };

    candidates
        .into_iter()
        .find_map(|step| check_step(events, breakpoints, step).map(|reason| BreakpointStop { step, reason }))
}

/// A newer playback operation superseded this request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Playback request was superseded by a newer operation")]
pub struct CancelledOperation;

/// What a committed breakpoint-checked advance did
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// No breakpoint in range; advanced `count` steps while playing
    Advanced { count: usize },
    /// Paused at a breakpoint hit or evaluation failure
    Stopped(BreakpointStop),
}

/// Result of a committed scan and the state it produced
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub state: PlaybackState,
}

#[derive(Debug)]
struct Shared {
    state: PlaybackState,
    epoch: u64,
}

/// Serializes playback operations for one trace
#[derive(Debug, Clone)]
pub struct PlaybackController {
    shared: Arc<Mutex<Shared>>,
    scan_batch: usize,
}

impl PlaybackController {
    pub fn new(bound: usize) -> Self {
        Self::with_scan_batch(bound, DEFAULT_SCAN_BATCH)
    }

    /// Controller that yields to the scheduler every `scan_batch` evaluations
    pub fn with_scan_batch(bound: usize, scan_batch: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: PlaybackState::new(bound),
                epoch: 0,
            })),
            scan_batch: scan_batch.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // State is a plain Copy value; a panic elsewhere cannot leave it torn
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state snapshot
    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// Start a new request epoch and apply `transition`
    fn apply(&self, transition: impl FnOnce(PlaybackState) -> PlaybackState) -> PlaybackState {
        let mut shared = self.lock();
        shared.epoch += 1;
        shared.state = transition(shared.state);
        shared.state
    }

    pub fn step_to(&self, n: i64) -> PlaybackState {
        self.apply(|s| s.step_to(n))
    }

    pub fn step_forward(&self) -> PlaybackState {
        self.apply(PlaybackState::step_forward)
    }

    pub fn step_backward(&self) -> PlaybackState {
        self.apply(PlaybackState::step_backward)
    }

    pub fn stop(&self) -> PlaybackState {
        self.apply(PlaybackState::stop)
    }

    pub fn play(&self) -> PlaybackState {
        self.apply(PlaybackState::play)
    }

    pub fn pause(&self, offset: i64) -> PlaybackState {
        self.apply(|s| s.pause(offset))
    }

    pub fn tick(&self, count: i64) -> PlaybackState {
        self.apply(|s| s.tick(count))
    }

    /// Rebind to a new trace length; cancels any outstanding scan
    pub fn reload(&self, bound: usize) -> PlaybackState {
        self.apply(|s| s.reload(bound))
    }

    /// Search from the current cursor without moving it
    pub fn find_breakpoint<E>(
        &self,
        events: &E,
        breakpoints: &BreakpointSet,
        direction: ScanDirection,
    ) -> Option<BreakpointStop>
    where
        E: EventSource + ?Sized,
    {
        find_breakpoint(&self.state(), events, breakpoints, direction)
    }

    /// Advance `count` steps unless a breakpoint stops the way
    ///
    /// Steps `step + offset .. step + count` are evaluated (never past the
    /// end). The request epoch is taken now, before the returned future is
    /// polled; any operation issued afterwards makes the future resolve to
    /// [`CancelledOperation`] without touching state.
    ///
    /// On commit: a hit pauses at the hit step, an evaluation failure pauses
    /// at the failing step, and a clear range ticks forward `count` steps.
    pub fn step_with_breakpoint_check<E>(
        &self,
        events: Arc<E>,
        breakpoints: Arc<BreakpointSet>,
        count: usize,
        offset: usize,
    ) -> impl Future<Output = Result<ScanReport, CancelledOperation>> + Send + 'static
    where
        E: EventSource + Send + Sync + ?Sized + 'static,
    {
        let (epoch, origin) = {
            let mut shared = self.lock();
            shared.epoch += 1;
            (shared.epoch, shared.state)
        };
        let shared = Arc::clone(&self.shared);
        let scan_batch = self.scan_batch;

        async move {
            let is_current = || {
                shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .epoch
                    == epoch
            };

            let mut stop = None;
            let mut evaluated = 0usize;
            for i in offset..count {
                let step = origin.step.saturating_add(i);
                if !origin.is_ready() || step > origin.end() {
                    break;
                }
                if let Some(reason) = check_step(&*events, &breakpoints, step) {
                    stop = Some((i, BreakpointStop { step, reason }));
                    break;
                }

                evaluated += 1;
                if evaluated % scan_batch == 0 {
                    tokio::task::yield_now().await;
                    if !is_current() {
                        tracing::debug!(epoch, step, "breakpoint scan superseded mid-scan");
                        return Err(CancelledOperation);
                    }
                }
            }

            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.epoch != epoch {
                tracing::debug!(epoch, current = guard.epoch, "discarding superseded breakpoint scan");
                return Err(CancelledOperation);
            }

            if !origin.is_ready() {
                // Nothing loaded: no transition, mode stays as it was
                return Ok(ScanReport {
                    outcome: ScanOutcome::Advanced { count: 0 },
                    state: guard.state,
                });
            }

            let delta = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
            let (state, outcome) = match stop {
                Some((i, stop)) => {
                    match &stop.reason {
                        StopReason::Hit(hit) => {
                            tracing::info!(step = stop.step, breakpoint = hit.index, "breakpoint hit")
                        }
                        StopReason::Failed(error) => {
                            tracing::warn!(step = stop.step, %error, "breakpoint evaluation failed")
                        }
                    }
                    (origin.pause(delta(i)), ScanOutcome::Stopped(stop))
                }
                None => (origin.tick(delta(count)), ScanOutcome::Advanced { count }),
            };
            guard.state = state;

            Ok(ScanReport { outcome, state })
        }
    }
}
