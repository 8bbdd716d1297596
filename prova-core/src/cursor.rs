//! Opaque pagination cursors.
//!
//! Every paginated query in the service encodes its position the same way:
//! base64 (standard alphabet, no padding) over JSON `{ts, id}`, where `ts` is
//! an RFC 3339 UTC timestamp with nanosecond precision.

use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose},
    Engine,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::rfc3339_nanos;

const ENGINE: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, general_purpose::NO_PAD);

/// A decoded cursor position: the sort timestamp and the tie-breaking id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub ts: DateTime<Utc>,
    pub id: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid cursor")]
pub struct CursorError;

#[derive(Serialize, Deserialize)]
struct Payload {
    ts: String,
    id: String,
}

/// Encodes a `(timestamp, id)` position as an opaque cursor string.
pub fn encode(ts: DateTime<Utc>, id: &str) -> String {
    let payload = Payload {
        ts: rfc3339_nanos(ts),
        id: id.to_owned(),
    };
    // A two-field struct of strings always serializes.
    let raw = serde_json::to_vec(&payload).expect("cursor payload serializes");
    ENGINE.encode(raw)
}

/// Decodes a cursor string; empty or whitespace input means "no cursor".
pub fn decode(input: &str) -> Result<Option<Cursor>, CursorError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let raw = ENGINE.decode(input).map_err(|_| CursorError)?;
    let payload: Payload = serde_json::from_slice(&raw).map_err(|_| CursorError)?;
    let ts = DateTime::parse_from_rfc3339(&payload.ts)
        .map_err(|_| CursorError)?
        .with_timezone(&Utc);

    if payload.id.trim().is_empty() {
        return Err(CursorError);
    }

    Ok(Some(Cursor {
        ts,
        id: payload.id,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap();
        let cursor = decode(&encode(ts, "e1")).unwrap().unwrap();
        assert_eq!(cursor.ts, ts);
        assert_eq!(cursor.id, "e1");
    }

    #[test]
    fn empty_input_is_no_cursor() {
        assert_eq!(decode("").unwrap(), None);
        assert_eq!(decode("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode("not base64 !!!").is_err());

        let not_json = ENGINE.encode("plain text");
        assert!(decode(&not_json).is_err());

        let bad_ts = ENGINE.encode(r#"{"ts":"yesterday","id":"e1"}"#);
        assert!(decode(&bad_ts).is_err());

        let empty_id = ENGINE.encode(r#"{"ts":"2026-02-16T12:00:00Z","id":""}"#);
        assert!(decode(&empty_id).is_err());
    }
}
