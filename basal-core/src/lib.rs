//! Core data model for basal segment reconciliation.
//!
//! Holds the flat interval record shared by every algorithm, the
//! configuration and error types, and the start-ordered [`Timeline`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod timeline;
pub mod timestamp;

pub use timeline::{Span, Timeline};

/// Record type carried by every basal interval.
pub const BASAL_SEGMENT_TYPE: &str = "basal-rate-segment";

/// Default cap on worklist steps while resolving overlaps.
pub const DEFAULT_MAX_RESOLUTION_STEPS: usize = 100_000;

/// Tuning knobs for the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileConfig {
    /// Delivery types layered over the scheduled base, lowest priority first.
    pub priority: Vec<DeliveryType>,
    /// Upper bound on overlap-resolution steps before giving up.
    pub max_resolution_steps: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            priority: vec![DeliveryType::Temp, DeliveryType::Suspend],
            max_resolution_steps: DEFAULT_MAX_RESOLUTION_STEPS,
        }
    }
}

/// How insulin was being delivered over an interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeliveryType {
    Scheduled,
    Temp,
    Suspend,
    Automated,
    /// Any tag this crate has no dedicated handling for.
    Other(String),
}

impl DeliveryType {
    pub fn as_str(&self) -> &str {
        match self {
            DeliveryType::Scheduled => "scheduled",
            DeliveryType::Temp => "temp",
            DeliveryType::Suspend => "suspend",
            DeliveryType::Automated => "automated",
            DeliveryType::Other(tag) => tag,
        }
    }
}

impl Default for DeliveryType {
    fn default() -> Self {
        DeliveryType::Scheduled
    }
}

impl From<String> for DeliveryType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "scheduled" => DeliveryType::Scheduled,
            "temp" => DeliveryType::Temp,
            "suspend" => DeliveryType::Suspend,
            "automated" => DeliveryType::Automated,
            _ => DeliveryType::Other(tag),
        }
    }
}

impl From<&str> for DeliveryType {
    fn from(tag: &str) -> Self {
        DeliveryType::from(tag.to_string())
    }
}

impl From<DeliveryType> for String {
    fn from(delivery: DeliveryType) -> Self {
        match delivery {
            DeliveryType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One basal interval, as produced by device normalization and as emitted
/// by the reconcilers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub delivery_type: DeliveryType,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Id of the first segment in a contiguous run of overrides.
    #[serde(default, alias = "contiguousWith", skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum_id: Option<String>,
    /// Lower-priority segments displaced at this span, newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Segment>,
}

fn default_kind() -> String {
    BASAL_SEGMENT_TYPE.to_string()
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            delivery_type: DeliveryType::Scheduled,
            start: None,
            end: None,
            value: None,
            percent: None,
            device_id: None,
            schedule_name: None,
            source: None,
            link: None,
            id: None,
            datum_id: None,
            suppressed: Vec::new(),
        }
    }
}

impl Segment {
    /// Closed segment with a rate; the common shape in tests and fixtures.
    pub fn new(
        delivery_type: DeliveryType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: Option<f64>,
    ) -> Self {
        Self {
            delivery_type,
            start: Some(start),
            end: Some(end),
            value,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Both bounds, or the reason the segment is not a usable closed interval.
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), BasalError> {
        let start = self.start.ok_or(BasalError::MalformedInterval {
            reason: "missing start",
        })?;
        let end = self.end.ok_or(BasalError::MalformedInterval {
            reason: "missing end",
        })?;
        if end < start {
            return Err(BasalError::MalformedInterval {
                reason: "end precedes start",
            });
        }
        Ok((start, end))
    }

    /// Whether `other` carries the same payload and may be merged when adjacent.
    pub fn is_smooshable_with(&self, other: &Segment) -> bool {
        self.kind == other.kind
            && self.delivery_type == other.delivery_type
            && self.value == other.value
            && self.percent == other.percent
            && self.device_id == other.device_id
            && self.schedule_name == other.schedule_name
            && self.source == other.source
            && self.link == other.link
    }

    /// `self` ends exactly where `next` starts.
    pub fn abuts(&self, next: &Segment) -> bool {
        matches!((self.end, next.start), (Some(end), Some(start)) if end == start)
    }
}

impl Span for Segment {
    type Instant = DateTime<Utc>;

    fn start(&self) -> Option<Self::Instant> {
        self.start
    }

    fn end(&self) -> Option<Self::Instant> {
        self.end
    }

    fn set_start(&mut self, at: Self::Instant) {
        self.start = Some(at);
    }

    fn set_end(&mut self, at: Self::Instant) {
        self.end = Some(at);
    }
}

/// Errors raised while reconciling basal intervals.
#[derive(Debug, thiserror::Error)]
pub enum BasalError {
    #[error("Input is missing the minimum required data")]
    MissingData,
    #[error("Could not read input: {0}")]
    Parse(String),
    #[error("Malformed interval: {reason}")]
    MalformedInterval { reason: &'static str },
    #[error("Overlap resolution did not converge within {steps} steps")]
    UnresolvableOverlap { steps: usize },
}
