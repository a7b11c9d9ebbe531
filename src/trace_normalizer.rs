//! Versioned trace ingestion
//!
//! Turns a raw JSON trace payload into a [`Trace`]. Two wire formats are
//! understood, selected by version tag:
//!
//! - **current** (`1.4.0` and later 1.x): `{"version": "1.4.0", "events": [...]}`,
//!   every non-structural field of an event is a property.
//! - **legacy** (anything below `1.4.0`): `{"eventList": [...]}`, with an
//!   optional nested `variables` object per event that is lifted into the
//!   property map.
//!
//! # Example
//!
//! ```
//! use retrace::trace_normalizer::normalize;
//!
//! let payload = r#"{
//!     "version": "1.4.0",
//!     "events": [
//!         {"type": "source", "id": 0},
//!         {"type": "expand", "id": 1, "pId": 0, "f": 3.5}
//!     ]
//! }"#;
//!
//! let trace = normalize(payload, "1.4.0").unwrap();
//! assert_eq!(trace.len(), 2);
//! assert_eq!(trace.events()[1].parent_id.as_deref(), Some("0"));
//! assert_eq!(trace.events()[1].properties["f"], 3.5);
//! ```

use crate::trace_event::{Event, Trace, TraceFormat};
use serde_json::{Map, Value};
use thiserror::Error;

/// First version that uses the current wire format
const CURRENT_FORMAT_SINCE: (u64, u64, u64) = (1, 4, 0);

/// Fields with structural meaning; everything else is a property
const RESERVED_FIELDS: [&str; 3] = ["id", "pId", "type"];

/// Legacy per-event bag of search variables
const LEGACY_VARIABLES: &str = "variables";

/// Errors raised while normalizing a payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("Malformed trace payload: {0}")]
    Malformed(String),

    #[error("Unsupported trace version '{0}'")]
    UnsupportedVersion(String),

    #[error("Trace declares version '{found}' but was loaded as '{declared}'")]
    VersionMismatch { declared: String, found: String },

    #[error("Trace has no '{0}' array")]
    MissingEventList(&'static str),

    #[error("Event {index} is missing required field 'id'")]
    MissingId { index: usize },

    #[error("Event {index} is invalid: {reason}")]
    InvalidEvent { index: usize, reason: String },
}

impl NormalizationError {
    /// Step of the offending event, when the failure is tied to one
    pub fn offending_index(&self) -> Option<usize> {
        match self {
            Self::MissingId { index } | Self::InvalidEvent { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Resolve a version tag to its wire format
///
/// Accepts `major.minor[.patch]`, optionally prefixed with `v` and followed
/// by a pre-release suffix (`1.4.0-rc1`). Major versions other than 0 and 1
/// are not understood.
pub fn format_for_version(version: &str) -> Result<TraceFormat, NormalizationError> {
    let unsupported = || NormalizationError::UnsupportedVersion(version.to_string());

    let core = version
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or_default();

    let mut parts = core.split('.').map(str::parse::<u64>);
    let major = parts.next().and_then(Result::ok).ok_or_else(unsupported)?;
    let minor = parts.next().and_then(Result::ok).ok_or_else(unsupported)?;
    let patch = match parts.next() {
        Some(p) => p.map_err(|_| unsupported())?,
        None => 0,
    };
    if parts.next().is_some() || major > 1 {
        return Err(unsupported());
    }

    if (major, minor, patch) >= CURRENT_FORMAT_SINCE {
        Ok(TraceFormat::Current)
    } else {
        Ok(TraceFormat::Legacy)
    }
}

/// Normalize a raw JSON payload declared as `declared_version`
pub fn normalize(raw_payload: &str, declared_version: &str) -> Result<Trace, NormalizationError> {
    let payload: Value = serde_json::from_str(raw_payload)
        .map_err(|e| NormalizationError::Malformed(format!("invalid JSON: {}", e)))?;
    normalize_value(&payload, declared_version)
}

/// Normalize an already-parsed payload
pub fn normalize_value(payload: &Value, declared_version: &str) -> Result<Trace, NormalizationError> {
    let format = format_for_version(declared_version)?;

    let root = payload
        .as_object()
        .ok_or_else(|| NormalizationError::Malformed("payload is not a JSON object".to_string()))?;

    // A tag carried in the payload must agree with the declared format
    if let Some(tag) = root.get("version") {
        let found = tag.as_str().ok_or_else(|| {
            NormalizationError::Malformed("'version' must be a string".to_string())
        })?;
        if format_for_version(found)? != format {
            return Err(NormalizationError::VersionMismatch {
                declared: declared_version.to_string(),
                found: found.to_string(),
            });
        }
    }

    let list_key = match format {
        TraceFormat::Current => "events",
        TraceFormat::Legacy => "eventList",
    };
    let raw_events = root
        .get(list_key)
        .and_then(Value::as_array)
        .ok_or(NormalizationError::MissingEventList(list_key))?;

    let events = raw_events
        .iter()
        .enumerate()
        .map(|(index, raw)| parse_event(index, raw, format))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        version = declared_version,
        ?format,
        events = events.len(),
        "normalized trace"
    );

    Ok(Trace::new(declared_version, format, events))
}

fn parse_event(index: usize, raw: &Value, format: TraceFormat) -> Result<Event, NormalizationError> {
    let fields = raw.as_object().ok_or_else(|| NormalizationError::InvalidEvent {
        index,
        reason: "event is not a JSON object".to_string(),
    })?;

    let id = match fields.get("id") {
        None | Some(Value::Null) => return Err(NormalizationError::MissingId { index }),
        Some(value) => identity(index, "id", value)?,
    };

    let parent_id = match fields.get("pId") {
        None | Some(Value::Null) => None,
        Some(value) => Some(identity(index, "pId", value)?),
    };

    let event_type = match fields.get("type") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(NormalizationError::InvalidEvent {
                index,
                reason: format!("'type' must be a string, got {}", other),
            })
        }
    };

    let mut properties = Map::new();
    for (key, value) in fields {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if format == TraceFormat::Legacy && key == LEGACY_VARIABLES {
            continue;
        }
        properties.insert(key.clone(), value.clone());
    }

    if format == TraceFormat::Legacy {
        match fields.get(LEGACY_VARIABLES) {
            None | Some(Value::Null) => {}
            Some(Value::Object(variables)) => {
                // Variables shadow top-level fields of the same name
                for (key, value) in variables {
                    properties.insert(key.clone(), value.clone());
                }
            }
            Some(_) => {
                return Err(NormalizationError::InvalidEvent {
                    index,
                    reason: "'variables' must be an object".to_string(),
                })
            }
        }
    }

    Ok(Event {
        id,
        parent_id,
        event_type,
        properties,
    })
}

/// Identities may be strings or integers; integers use their decimal form
fn identity(index: usize, field: &str, value: &Value) -> Result<String, NormalizationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(NormalizationError::InvalidEvent {
            index,
            reason: format!("'{}' must be a string or integer, got {}", field, other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_for_version() {
        assert_eq!(format_for_version("1.4.0").unwrap(), TraceFormat::Current);
        assert_eq!(format_for_version("1.5").unwrap(), TraceFormat::Current);
        assert_eq!(format_for_version("v1.4.2-rc1").unwrap(), TraceFormat::Current);
        assert_eq!(format_for_version("1.3.9").unwrap(), TraceFormat::Legacy);
        assert_eq!(format_for_version("1.0.0").unwrap(), TraceFormat::Legacy);
        assert_eq!(format_for_version("0.9").unwrap(), TraceFormat::Legacy);
    }

    #[test]
    fn test_format_for_version_rejects_unknown() {
        for bad in ["", "latest", "2.0.0", "1", "1.x", "1.4.0.1"] {
            assert!(
                matches!(
                    format_for_version(bad),
                    Err(NormalizationError::UnsupportedVersion(_))
                ),
                "expected {:?} to be unsupported",
                bad
            );
        }
    }

    #[test]
    fn test_normalize_current_format() {
        let payload = r#"{
            "version": "1.4.0",
            "events": [
                {"type": "source", "id": "a", "x": 1, "y": 2},
                {"type": "expand", "id": "b", "pId": "a", "f": 12, "info": {"depth": 1}}
            ]
        }"#;

        let trace = normalize(payload, "1.4.0").unwrap();
        assert_eq!(trace.format, TraceFormat::Current);
        assert_eq!(trace.len(), 2);

        let root = &trace.events()[0];
        assert!(root.is_root());
        assert_eq!(root.event_type, "source");
        assert_eq!(root.properties["x"], 1);
        assert!(!root.properties.contains_key("id"));

        let child = &trace.events()[1];
        assert_eq!(child.parent_id.as_deref(), Some("a"));
        assert_eq!(child.properties["info"]["depth"], 1);
    }

    #[test]
    fn test_normalize_legacy_lifts_variables() {
        let payload = r#"{
            "eventList": [
                {"type": "source", "id": 1, "pId": null, "variables": {"x": 4, "y": 5}},
                {"type": "generating", "id": 2, "pId": 1, "g": 1, "variables": {"x": 5, "y": 5}}
            ]
        }"#;

        let trace = normalize(payload, "1.0.2").unwrap();
        assert_eq!(trace.format, TraceFormat::Legacy);

        let child = &trace.events()[1];
        assert_eq!(child.id, "2");
        assert_eq!(child.parent_id.as_deref(), Some("1"));
        assert_eq!(child.properties["x"], 5);
        assert_eq!(child.properties["g"], 1);
        assert!(!child.properties.contains_key("variables"));
    }

    #[test]
    fn test_formats_are_incompatible() {
        let legacy = r#"{"eventList": [{"id": 1}]}"#;
        assert_eq!(
            normalize(legacy, "1.4.0"),
            Err(NormalizationError::MissingEventList("events"))
        );

        let current = r#"{"events": [{"id": 1}]}"#;
        assert_eq!(
            normalize(current, "1.2.0"),
            Err(NormalizationError::MissingEventList("eventList"))
        );
    }

    #[test]
    fn test_missing_id_reports_index() {
        let payload = r#"{"events": [{"id": 1}, {"type": "expand"}]}"#;
        let err = normalize(payload, "1.4.0").unwrap_err();
        assert_eq!(err, NormalizationError::MissingId { index: 1 });
        assert_eq!(err.offending_index(), Some(1));
    }

    #[test]
    fn test_invalid_identity_type() {
        let payload = r#"{"events": [{"id": [1, 2]}]}"#;
        let err = normalize(payload, "1.4.0").unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidEvent { index: 0, .. }));

        let payload = r#"{"events": [{"id": 1.5}]}"#;
        assert!(normalize(payload, "1.4.0").is_err());

        let payload = r#"{"events": [{"id": 1, "pId": true}]}"#;
        assert!(normalize(payload, "1.4.0").is_err());
    }

    #[test]
    fn test_version_mismatch() {
        let payload = r#"{"version": "1.0.0", "events": []}"#;
        let err = normalize(payload, "1.4.0").unwrap_err();
        assert!(matches!(err, NormalizationError::VersionMismatch { .. }));
        assert_eq!(err.offending_index(), None);
    }

    #[test]
    fn test_payload_tag_same_format_is_accepted() {
        let payload = r#"{"version": "1.4.1", "events": []}"#;
        let trace = normalize(payload, "1.4.0").unwrap();
        assert!(trace.is_empty());
        assert_eq!(trace.version, "1.4.0");
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            normalize("{not json", "1.4.0"),
            Err(NormalizationError::Malformed(_))
        ));
        assert!(matches!(
            normalize("[1, 2, 3]", "1.4.0"),
            Err(NormalizationError::Malformed(_))
        ));
        assert!(matches!(
            normalize(r#"{"events": [42]}"#, "1.4.0"),
            Err(NormalizationError::InvalidEvent { index: 0, .. })
        ));
    }
}
