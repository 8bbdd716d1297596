use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{EventError, Result};

/// Spec version tag mixed into the canonical encoding of every event.
pub const SPEC_VERSION: &str = "1.0";

/// The canonical event, the only fact the service persists.
///
/// Events are immutable once ingested. The `data` body is kept verbatim as
/// raw JSON; `extensions` carry the correlation keys (`cluster`, `namespace`,
/// `commit_sha`, `operation_id`, ...) that scoped queries filter on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
    pub data: Box<RawValue>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrity_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new<I, S, T>(id: I, source: S, ty: T) -> Self
    where
        I: Into<String>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            source: source.into(),
            ty: ty.into(),
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn data<D: Serialize>(mut self, value: D) -> Result<Self> {
        let raw = serde_json::to_string(&value)?;
        self.data = RawValue::from_string(raw)?;
        Ok(self)
    }

    pub fn raw_data(mut self, body: impl Into<String>) -> Result<Self> {
        self.data = RawValue::from_string(body.into())?;
        Ok(self)
    }

    pub fn to_data<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_str(self.data.get())?)
    }

    /// Deserializes the body as a JSON object, or `None` if it is anything else.
    pub fn data_object(&self) -> Option<serde_json::Map<String, Value>> {
        serde_json::from_str::<Value>(self.data.get())
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
    }

    /// Checks the fields required before an event may enter the store.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EventError::Required("id"));
        }
        if self.source.trim().is_empty() {
            return Err(EventError::Required("source"));
        }
        if self.ty.trim().is_empty() {
            return Err(EventError::Required("type"));
        }
        let body = self.data.get().trim();
        if body.is_empty() || body == "null" {
            return Err(EventError::Required("data"));
        }
        Ok(())
    }

    /// Computes the SHA-256 integrity hash over the canonical encoding.
    ///
    /// Equal events hash equal; any differing field changes the digest. The
    /// canonical form serializes extensions with keys in ascending codepoint
    /// order (the `BTreeMap` guarantees this) and the time as RFC 3339 with
    /// nanosecond precision.
    pub fn compute_integrity(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            specversion: &'static str,
            id: &'a str,
            source: &'a str,
            #[serde(rename = "type")]
            ty: &'a str,
            #[serde(skip_serializing_if = "str::is_empty")]
            subject: &'a str,
            time: String,
            #[serde(skip_serializing_if = "BTreeMap::is_empty")]
            extensions: &'a BTreeMap<String, Value>,
            data: &'a RawValue,
        }

        let canonical = serde_json::to_vec(&Canonical {
            specversion: SPEC_VERSION,
            id: &self.id,
            source: &self.source,
            ty: &self.ty,
            subject: &self.subject,
            time: rfc3339_nanos(self.time),
            extensions: &self.extensions,
            data: &self.data,
        })?;

        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// Fills `integrity_hash` if the producer did not provide one.
    pub fn ensure_integrity(mut self) -> Result<Self> {
        if self.integrity_hash.is_empty() {
            self.integrity_hash = self.compute_integrity()?;
        }
        Ok(self)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: String::default(),
            ty: String::default(),
            source: String::default(),
            subject: String::default(),
            time: Utc::now(),
            extensions: BTreeMap::new(),
            data: empty_body(),
            integrity_hash: String::default(),
            ingested_at: None,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.ty == other.ty
            && self.source == other.source
            && self.subject == other.subject
            && self.time == other.time
            && self.extensions == other.extensions
            && self.data.get() == other.data.get()
            && self.integrity_hash == other.integrity_hash
            && self.ingested_at == other.ingested_at
    }
}

/// Formats a timestamp the way every hash input and cursor in the service
/// expects it: RFC 3339, UTC, nanosecond precision.
pub fn rfc3339_nanos(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn empty_body() -> Box<RawValue> {
    RawValue::from_string("{}".to_owned()).expect("literal JSON object")
}

/// Total order used by every timeline: `(time ASC, id ASC)`.
pub fn timeline_order(a: &Event, b: &Event) -> std::cmp::Ordering {
    a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample() -> Event {
        Event::new("e1", "git", "push")
            .subject("payments-api:prod-eu:eu-1")
            .time(Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap())
            .extension("commit_sha", "abc123")
            .raw_data(r#"{"repo":"o/p"}"#)
            .unwrap()
    }

    #[test]
    fn integrity_is_deterministic() {
        let a = sample().compute_integrity().unwrap();
        let b = sample().compute_integrity().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn integrity_tracks_every_field() {
        let base = sample().compute_integrity().unwrap();

        let mut event = sample();
        event.id = "e2".to_owned();
        assert_ne!(event.compute_integrity().unwrap(), base);

        let mut event = sample();
        event.source = "gitops".to_owned();
        assert_ne!(event.compute_integrity().unwrap(), base);

        let mut event = sample();
        event.ty = "pull_request".to_owned();
        assert_ne!(event.compute_integrity().unwrap(), base);

        let mut event = sample();
        event.subject = "other:prod-eu:eu-1".to_owned();
        assert_ne!(event.compute_integrity().unwrap(), base);

        let mut event = sample();
        event.time += chrono::Duration::nanoseconds(1);
        assert_ne!(event.compute_integrity().unwrap(), base);

        let event = sample().extension("cluster", "eu-1");
        assert_ne!(event.compute_integrity().unwrap(), base);

        let event = sample().raw_data(r#"{"repo":"o/q"}"#).unwrap();
        assert_ne!(event.compute_integrity().unwrap(), base);
    }

    #[test]
    fn integrity_ignores_extension_insertion_order() {
        let a = sample()
            .extension("alpha", "1")
            .extension("beta", "2")
            .compute_integrity()
            .unwrap();
        let b = sample()
            .extension("beta", "2")
            .extension("alpha", "1")
            .compute_integrity()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(sample().validate().is_ok());

        let mut event = sample();
        event.id = String::new();
        assert!(matches!(event.validate(), Err(EventError::Required("id"))));

        let event = sample().raw_data("null").unwrap();
        assert!(matches!(event.validate(), Err(EventError::Required("data"))));
    }

    #[test]
    fn body_is_preserved_verbatim() {
        let event = sample().raw_data(r#"{"b":1,  "a":2}"#).unwrap();
        assert_eq!(event.data.get(), r#"{"b":1,  "a":2}"#);
    }
}
