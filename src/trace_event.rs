//! Normalized search trace events
//!
//! Every wire format is reduced to the same [`Event`] shape before anything
//! downstream sees it. An event's *step* is never stored on the event: it is
//! the event's position in [`Trace::events`] and is the address used by every
//! query and by playback.
//!
//! # Example
//!
//! ```
//! use retrace::trace_event::{Event, Trace, TraceFormat};
//!
//! let trace = Trace::new(
//!     "1.4.0",
//!     TraceFormat::Current,
//!     vec![Event::new("a", None, "source"), Event::new("b", Some("a"), "expand")],
//! );
//! assert_eq!(trace.len(), 2);
//! assert_eq!(trace.event(1).and_then(|e| e.parent_id.as_deref()), Some("a"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire format a trace was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceFormat {
    /// Pre-1.4 payloads (`eventList`, nested `variables`)
    Legacy,
    /// 1.4 and later payloads (`events`, flat properties)
    Current,
}

/// One recorded occurrence in a search trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Logical node identity; the same id may occur at many steps
    pub id: String,

    /// Identity of the node that caused this event (absent for roots)
    #[serde(rename = "pId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Event tag (e.g. "source", "expand", "generate", "end")
    #[serde(rename = "type", default)]
    pub event_type: String,

    /// Free-form event data (heuristic values, coordinates, metadata)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Event {
    /// Create an event with no properties
    pub fn new(id: impl Into<String>, parent_id: Option<&str>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.map(str::to_string),
            event_type: event_type.into(),
            properties: Map::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// True when the event has no parent identity
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// An ordered, immutable-once-loaded sequence of events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Version tag the payload was parsed under
    pub version: String,

    /// Format resolved from the version tag
    pub format: TraceFormat,

    events: Vec<Event>,
}

impl Trace {
    pub fn new(version: impl Into<String>, format: TraceFormat, events: Vec<Event>) -> Self {
        Self {
            version: version.into(),
            format,
            events,
        }
    }

    /// All events in step order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Event at `step`, if the step is inside the trace
    pub fn event(&self, step: usize) -> Option<&Event> {
        self.events.get(step)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct event types in first-seen order
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for event in &self.events {
            if !types.contains(&event.event_type.as_str()) {
                types.push(&event.event_type);
            }
        }
        types
    }
}

/// Host-supplied access to events by step
///
/// Playback only needs a length and random access, so hosts can drive it from
/// a [`Trace`], a plain slice, or their own storage.
pub trait EventSource {
    /// Number of addressable steps
    fn len(&self) -> usize;

    /// Event at `step`
    fn event(&self, step: usize) -> Option<&Event>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSource for Trace {
    fn len(&self) -> usize {
        self.events.len()
    }

    fn event(&self, step: usize) -> Option<&Event> {
        self.events.get(step)
    }
}

impl EventSource for [Event] {
    fn len(&self) -> usize {
        <[Event]>::len(self)
    }

    fn event(&self, step: usize) -> Option<&Event> {
        self.get(step)
    }
}

impl EventSource for Vec<Event> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn event(&self, step: usize) -> Option<&Event> {
        self.get(step)
    }
}
