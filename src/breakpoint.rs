//! Breakpoint conditions and their evaluation against single events
//!
//! Breakpoints are authored elsewhere (an editor, or `retrace.toml`) and
//! arrive here as plain values. Evaluation visits the active breakpoints in
//! ascending `index` order and stops at the first match.
//!
//! Reading a property that does not exist is an error, not a silent "no
//! match": a breakpoint that can never fire because of a typo should be
//! reported, and playback pauses on it.
//!
//! # Example
//!
//! ```
//! use retrace::breakpoint::{evaluate, Breakpoint, Comparator, EvaluationResult};
//! use retrace::trace_event::Event;
//!
//! let breakpoints = vec![Breakpoint::on_property("f", Comparator::GreaterThan, 10)
//!     .with_type("expand")];
//!
//! let hot = Event::new("n", None, "expand").with_property("f", 12);
//! assert!(matches!(evaluate(&breakpoints, &hot), Ok(EvaluationResult::Match(_))));
//!
//! let cold = Event::new("n", None, "expand").with_property("f", 8);
//! assert_eq!(evaluate(&breakpoints, &cold), Ok(EvaluationResult::NoMatch));
//!
//! let missing = Event::new("n", None, "expand");
//! assert!(evaluate(&breakpoints, &missing).is_err());
//! ```

use crate::trace_event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Comparison applied between a property value and the reference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "eq", alias = "equal")]
    Equal,
    #[serde(rename = "ne", alias = "not-equal")]
    NotEqual,
    #[serde(rename = "lt", alias = "less-than")]
    LessThan,
    #[serde(rename = "le", alias = "less-than-or-equal")]
    LessOrEqual,
    #[serde(rename = "gt", alias = "greater-than")]
    GreaterThan,
    #[serde(rename = "ge", alias = "greater-than-or-equal")]
    GreaterOrEqual,
    #[serde(rename = "truthy")]
    Truthy,
    #[serde(rename = "falsy")]
    Falsy,
}

impl Comparator {
    /// Whether the comparator consumes the stored reference value
    pub fn needs_reference(self) -> bool {
        !matches!(self, Self::Truthy | Self::Falsy)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "not-equal",
            Self::LessThan => "less-than",
            Self::LessOrEqual => "less-than-or-equal",
            Self::GreaterThan => "greater-than",
            Self::GreaterOrEqual => "greater-than-or-equal",
            Self::Truthy => "truthy",
            Self::Falsy => "falsy",
        }
    }

    /// Apply to `value`; `reference` is ignored by comparators that do not need it
    ///
    /// Incomparable types never match.
    pub fn apply(self, value: &Value, reference: &Value) -> bool {
        match self {
            Self::Equal => loosely_equal(value, reference),
            Self::NotEqual => !loosely_equal(value, reference),
            Self::LessThan => ordering(value, reference) == Some(Ordering::Less),
            Self::LessOrEqual => matches!(
                ordering(value, reference),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::GreaterThan => ordering(value, reference) == Some(Ordering::Greater),
            Self::GreaterOrEqual => matches!(
                ordering(value, reference),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Truthy => truthy(value),
            Self::Falsy => !truthy(value),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numbers compare by value (so `1 == 1.0`), everything else structurally
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Integers compare exactly; only floats go through f64
fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return Some(a.cmp(&b));
    }
    // One side is above i64::MAX, the other negative
    if x.is_u64() && y.is_i64() {
        return Some(Ordering::Greater);
    }
    if x.is_i64() && y.is_u64() {
        return Some(Ordering::Less);
    }
    x.as_f64()?.partial_cmp(&y.as_f64()?)
}

/// Ordering is defined between two numbers or two strings only
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Comparator plus the value it compares against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub key: Comparator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Value>,
}

/// A stored condition that pauses playback when an event matches it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Optional user-facing name used in hit messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Event type filter; `None` matches any type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Dotted path into the event's properties; `None` matches on type alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Reference stored beside the condition (older breakpoint records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Value>,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Evaluation order; lower runs first, ties keep list order
    #[serde(default)]
    pub index: i64,
}

fn default_true() -> bool {
    true
}

/// Details of the breakpoint that fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointHit {
    /// `index` of the matching breakpoint
    pub index: i64,

    /// User label of the matching breakpoint, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Label or generated description, suitable for messages
    pub description: String,
}

/// Outcome of evaluating a breakpoint list against one event
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Match(BreakpointHit),
    NoMatch,
}

impl EvaluationResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }
}

/// Why a breakpoint could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationFailure {
    #[error("Property '{0}' does not exist on this event")]
    MissingProperty(String),

    #[error("Invalid property path '{0}'")]
    InvalidPath(String),

    #[error("Property '{0}' has no condition")]
    MissingCondition(String),

    #[error("Condition '{0}' needs a reference value")]
    MissingReference(Comparator),
}

/// A breakpoint failed to evaluate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Breakpoint {breakpoint_index}: {reason}")]
pub struct EvaluationError {
    pub breakpoint_index: i64,
    pub reason: EvaluationFailure,
}

impl Breakpoint {
    /// Breakpoint on any event of `event_type`
    pub fn on_type(event_type: impl Into<String>) -> Self {
        Self {
            label: None,
            event_type: Some(event_type.into()),
            property: None,
            condition: None,
            reference: None,
            active: true,
            index: 0,
        }
    }

    /// Breakpoint comparing `property` against `reference`
    pub fn on_property(property: impl Into<String>, key: Comparator, reference: impl Into<Value>) -> Self {
        Self {
            label: None,
            event_type: None,
            property: Some(property.into()),
            condition: Some(Condition {
                key,
                reference: Some(reference.into()),
            }),
            reference: None,
            active: true,
            index: 0,
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Human-readable description of the condition
    pub fn description(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }

        let subject = self.event_type.as_deref().unwrap_or("any event");
        match (&self.property, &self.condition) {
            (Some(property), Some(condition)) => match self.reference_value() {
                Some(reference) if condition.key.needs_reference() => {
                    format!("{}: {} {} {}", subject, property, condition.key, reference)
                }
                _ => format!("{}: {} is {}", subject, property, condition.key),
            },
            (Some(property), None) => format!("{}: {}", subject, property),
            (None, _) => subject.to_string(),
        }
    }

    fn reference_value(&self) -> Option<&Value> {
        self.condition
            .as_ref()
            .and_then(|c| c.reference.as_ref())
            .or(self.reference.as_ref())
    }

    /// Check this breakpoint alone, ignoring `active`
    pub fn check(&self, event: &Event) -> Result<Option<BreakpointHit>, EvaluationError> {
        let fail = |reason| EvaluationError {
            breakpoint_index: self.index,
            reason,
        };

        if let Some(event_type) = &self.event_type {
            if *event_type != event.event_type {
                return Ok(None);
            }
        }

        let Some(property) = &self.property else {
            return Ok(Some(self.hit()));
        };

        let condition = self
            .condition
            .as_ref()
            .ok_or_else(|| fail(EvaluationFailure::MissingCondition(property.clone())))?;

        let value = lookup(event, property).map_err(fail)?;

        let matched = if condition.key.needs_reference() {
            let reference = self
                .reference_value()
                .ok_or_else(|| fail(EvaluationFailure::MissingReference(condition.key)))?;
            condition.key.apply(&value, reference)
        } else {
            condition.key.apply(&value, &Value::Null)
        };

        Ok(matched.then(|| self.hit()))
    }

    fn hit(&self) -> BreakpointHit {
        BreakpointHit {
            index: self.index,
            label: self.label.clone(),
            description: self.description(),
        }
    }
}

/// Active breakpoints, pre-sorted for repeated evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakpointSet {
    ordered: Vec<Breakpoint>,
}

impl BreakpointSet {
    /// Keep active breakpoints, stably sorted by `index`
    pub fn new(breakpoints: impl IntoIterator<Item = Breakpoint>) -> Self {
        let mut ordered: Vec<Breakpoint> = breakpoints.into_iter().filter(|b| b.active).collect();
        ordered.sort_by_key(|b| b.index);
        Self { ordered }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// First matching breakpoint in index order
    pub fn evaluate(&self, event: &Event) -> Result<EvaluationResult, EvaluationError> {
        for breakpoint in &self.ordered {
            if let Some(hit) = breakpoint.check(event)? {
                return Ok(EvaluationResult::Match(hit));
            }
        }
        Ok(EvaluationResult::NoMatch)
    }
}

/// Evaluate `breakpoints` against `event`
pub fn evaluate(breakpoints: &[Breakpoint], event: &Event) -> Result<EvaluationResult, EvaluationError> {
    let mut ordered: Vec<&Breakpoint> = breakpoints.iter().filter(|b| b.active).collect();
    ordered.sort_by_key(|b| b.index);

    for breakpoint in ordered {
        if let Some(hit) = breakpoint.check(event)? {
            return Ok(EvaluationResult::Match(hit));
        }
    }
    Ok(EvaluationResult::NoMatch)
}

/// Read a dotted property path from an event
///
/// `$.` prefixes are accepted. Numeric segments index into arrays. The
/// single-segment paths `id`, `pId` and `type` fall back to the event's own
/// fields when the property map has no such key.
pub fn lookup<'a>(event: &'a Event, path: &str) -> Result<Cow<'a, Value>, EvaluationFailure> {
    let trimmed = path.strip_prefix("$.").unwrap_or(path);
    let mut segments = trimmed.split('.');
    if trimmed.split('.').any(str::is_empty) {
        return Err(EvaluationFailure::InvalidPath(path.to_string()));
    }

    let missing = || EvaluationFailure::MissingProperty(path.to_string());

    let first = segments.next().ok_or_else(missing)?;
    let mut current = match event.properties.get(first) {
        Some(value) => value,
        None => {
            if segments.next().is_some() {
                return Err(missing());
            }
            return intrinsic(event, first).map(Cow::Owned).ok_or_else(missing);
        }
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(missing)?;
    }

    Ok(Cow::Borrowed(current))
}

fn intrinsic(event: &Event, field: &str) -> Option<Value> {
    match field {
        "id" => Some(Value::String(event.id.clone())),
        "pId" => Some(
            event
                .parent_id
                .clone()
                .map_or(Value::Null, Value::String),
        ),
        "type" => Some(Value::String(event.event_type.clone())),
        _ => None,
    }
}
