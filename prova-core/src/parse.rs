use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

use crate::error::{EventError, Result};
use crate::event::Event;

/// Media type for a single CloudEvents JSON document.
pub const CONTENT_TYPE_SINGLE: &str = "application/cloudevents+json";
/// Media type for a CloudEvents JSON batch (array of documents).
pub const CONTENT_TYPE_BATCH: &str = "application/cloudevents-batch+json";

/// Top-level CloudEvents spec fields; everything else is promoted to an
/// extension.
const KNOWN_FIELDS: &[&str] = &[
    "specversion",
    "id",
    "source",
    "type",
    "subject",
    "time",
    "datacontenttype",
    "dataschema",
    "data",
    "data_base64",
];

/// Parses a CloudEvents payload according to its content type.
///
/// `application/cloudevents-batch+json` (with or without parameters) parses
/// as a batch; anything else as a single document. Every returned event is
/// validated and carries its integrity hash.
pub fn parse_payload(content_type: &str, body: &[u8]) -> Result<Vec<Event>> {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media == CONTENT_TYPE_BATCH {
        return parse_batch(body);
    }
    Ok(vec![parse_single(body)?])
}

/// Parses one CloudEvents JSON document into a canonical event.
pub fn parse_single(body: &[u8]) -> Result<Event> {
    let raw: BTreeMap<String, Box<RawValue>> = serde_json::from_slice(body)?;
    from_raw(raw)
}

/// Parses a CloudEvents JSON batch (an array of documents).
pub fn parse_batch(body: &[u8]) -> Result<Vec<Event>> {
    let raws: Vec<BTreeMap<String, Box<RawValue>>> = serde_json::from_slice(body)?;
    raws.into_iter().map(from_raw).collect()
}

fn from_raw(raw: BTreeMap<String, Box<RawValue>>) -> Result<Event> {
    let mut event = Event::default();
    let mut time: Option<DateTime<Utc>> = None;

    for (key, value) in &raw {
        match key.as_str() {
            "id" => event.id = serde_json::from_str(value.get())?,
            "source" => event.source = serde_json::from_str(value.get())?,
            "type" => event.ty = serde_json::from_str(value.get())?,
            "subject" => event.subject = serde_json::from_str(value.get())?,
            "time" => {
                let parsed: DateTime<Utc> = serde_json::from_str(value.get())?;
                time = Some(parsed);
            }
            "data" => event.data = value.clone(),
            key if KNOWN_FIELDS.contains(&key) => {}
            _ => {
                event
                    .extensions
                    .insert(key.clone(), serde_json::from_str(value.get())?);
            }
        }
    }

    // Missing time is stamped at parse time, never at store time.
    event.time = time.unwrap_or_else(Utc::now);

    if !raw.contains_key("data") {
        return Err(EventError::Required("data"));
    }

    event.validate()?;
    event.ensure_integrity()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"{
        "specversion": "1.0",
        "id": "e1",
        "source": "git",
        "type": "push",
        "subject": "payments-api:prod-eu:eu-1",
        "time": "2026-02-16T12:00:00Z",
        "commit_sha": "abc123",
        "supporting_observation": false,
        "data": {"repo": "o/p"}
    }"#;

    #[test]
    fn parses_single_document() {
        let event = parse_single(SINGLE.as_bytes()).unwrap();
        assert_eq!(event.id, "e1");
        assert_eq!(event.source, "git");
        assert_eq!(event.ty, "push");
        assert_eq!(event.subject, "payments-api:prod-eu:eu-1");
        assert_eq!(event.time.to_rfc3339(), "2026-02-16T12:00:00+00:00");
        assert_eq!(
            crate::extensions::string_value(&event.extensions, "commit_sha"),
            "abc123"
        );
        assert!(!event.integrity_hash.is_empty());
    }

    #[test]
    fn spec_fields_are_not_promoted_to_extensions() {
        let event = parse_single(SINGLE.as_bytes()).unwrap();
        assert!(!event.extensions.contains_key("specversion"));
        assert!(!event.extensions.contains_key("datacontenttype"));
        assert!(event.extensions.contains_key("commit_sha"));
        assert!(event.extensions.contains_key("supporting_observation"));
    }

    #[test]
    fn missing_time_defaults_to_now() {
        let body = r#"{"id":"e2","source":"git","type":"push","data":{"a":1}}"#;
        let before = Utc::now();
        let event = parse_single(body.as_bytes()).unwrap();
        assert!(event.time >= before);
        assert!(event.time <= Utc::now());
    }

    #[test]
    fn rejects_missing_or_null_data() {
        let body = r#"{"id":"e3","source":"git","type":"push"}"#;
        assert!(parse_single(body.as_bytes()).is_err());

        let body = r#"{"id":"e3","source":"git","type":"push","data":null}"#;
        assert!(parse_single(body.as_bytes()).is_err());
    }

    #[test]
    fn parses_batch_by_content_type() {
        let body = format!("[{SINGLE}]");
        let events = parse_payload(
            "application/cloudevents-batch+json; charset=utf-8",
            body.as_bytes(),
        )
        .unwrap();
        assert_eq!(events.len(), 1);

        let events = parse_payload("application/cloudevents+json", SINGLE.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn identical_documents_hash_identically() {
        let a = parse_single(SINGLE.as_bytes()).unwrap();
        let b = parse_single(SINGLE.as_bytes()).unwrap();
        assert_eq!(a.integrity_hash, b.integrity_hash);
    }
}
