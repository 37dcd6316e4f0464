//! RFC 3339 timestamps, as written into every archive format.
//!
//! Timestamps are always written in UTC with whole seconds
//! (`2025-03-01T12:00:00Z`); any offset is accepted when reading.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};

pub(crate) fn format(timestamp: UtcDateTime) -> Result<String, time::error::Format> {
    OffsetDateTime::from(timestamp.truncate_to_second()).format(&Rfc3339)
}

pub(crate) fn parse(s: &str) -> Result<UtcDateTime, time::error::Parse> {
    Ok(OffsetDateTime::parse(s.trim(), &Rfc3339)?.to_utc())
}

pub(crate) fn serialize<S: Serializer>(timestamp: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = format(*timestamp).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UtcDateTime, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

pub(crate) mod option {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(timestamp: &Option<UtcDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match timestamp {
            Some(timestamp) => super::serialize(timestamp, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UtcDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.trim().is_empty() => parse(&s).map(Some).map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
