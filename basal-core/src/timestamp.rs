//! Serde helpers for optional timestamps.
//!
//! Reads RFC 3339 strings, zone-less ISO strings (taken as UTC) and epoch
//! milliseconds. Writes RFC 3339 with millisecond precision.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
}

pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(at) => serializer.serialize_str(&format(*at)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(RawTimestamp::Millis(ms)) => from_millis(ms).map(Some).ok_or_else(|| {
            de::Error::custom(format!("epoch milliseconds out of range: {ms}"))
        }),
        Some(RawTimestamp::FractionalMillis(ms)) => from_millis(ms.round() as i64)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("epoch milliseconds out of range: {ms}"))),
        Some(RawTimestamp::Text(text)) => parse(&text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp: {text}"))),
    }
}

/// Parse an ISO-8601 timestamp; strings without an offset are read as UTC.
pub fn parse(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Canonical output form, e.g. `2014-02-12T06:00:00.000Z`.
pub fn format(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}
