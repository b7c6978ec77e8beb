//! Basal reconciliation over device-normalized JSON records.
//!
//! Two algorithms share the same domain: [`SegmentUtil`] layers temp and
//! suspend overrides over the scheduled timeline, while [`split_basals`]
//! cuts scheduled segments around temps by explicit case analysis.

use basal_core::{BasalError, ReconcileConfig, Segment, BASAL_SEGMENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

pub mod dose;
pub mod segment_util;
pub mod splitter;

pub use dose::{
    continuous_endpoints, endpoints, path_group_type, path_groups, schedule_total,
    segment_dose, subtotal, Endpoint, Endpoints, PathGroup, ScheduleRate,
};
pub use segment_util::{Reconciliation, SegmentUtil};
pub use splitter::{classify, split_basals, split_segments, BasalSplit, TempAlignment};

/// Reconcile basal records from a JSON string.
pub fn reconcile_str(records_json: &str, config: &ReconcileConfig) -> Result<Reconciliation, BasalError> {
    let value: Value =
        serde_json::from_str(records_json).map_err(|err| BasalError::Parse(err.to_string()))?;
    reconcile_value(&value, config)
}

/// Reconcile basal records from a `serde_json::Value` array.
pub fn reconcile_value(records: &Value, config: &ReconcileConfig) -> Result<Reconciliation, BasalError> {
    let segments = basal_segments(records)?;
    Ok(SegmentUtil::new(&segments, config)?.into_reconciliation())
}

/// Split scheduled/temp basal records from a JSON string.
pub fn split_str(records_json: &str) -> Result<BasalSplit, BasalError> {
    let value: Value =
        serde_json::from_str(records_json).map_err(|err| BasalError::Parse(err.to_string()))?;
    split_value(&value)
}

pub fn split_value(records: &Value) -> Result<BasalSplit, BasalError> {
    let segments = basal_segments(records)?;
    split_segments(&segments)
}

/// Basal segments of a record array; records of any other type are skipped.
pub fn basal_segments(records: &Value) -> Result<Vec<Segment>, BasalError> {
    let entries = records.as_array().ok_or(BasalError::MissingData)?;

    let mut segments = Vec::new();
    for entry in entries {
        if entry.get("type").and_then(Value::as_str) != Some(BASAL_SEGMENT_TYPE) {
            continue;
        }
        let segment =
            Segment::deserialize(entry).map_err(|err| BasalError::Parse(err.to_string()))?;
        segments.push(segment);
    }
    Ok(segments)
}
