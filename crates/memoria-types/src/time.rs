//! Timestamp (de)serialization shared across store boundaries.
//!
//! Documents come back from the vector store with timestamps in whatever
//! format the writer used, so decoding accepts several shapes. Serialization
//! always emits RFC 3339.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Formats accepted when decoding a stored timestamp, tried in order.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a timestamp string in any of the supported formats.
pub fn parse_flexible(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

/// Serde adapter for required timestamp fields.
pub mod flexible {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse_flexible(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unable to parse time: {s}")))
    }
}

/// Serde adapter for optional timestamp fields.
pub mod flexible_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => ser.serialize_some(&dt.to_rfc3339()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s = Option::<String>::deserialize(de)?;
        match s {
            None => Ok(None),
            Some(s) => parse_flexible(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unable to parse time: {s}"))),
        }
    }
}
