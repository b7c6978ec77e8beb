//! Insulin totals over reconciled basal segments.

use basal_core::{DeliveryType, Segment};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MS_IN_HOUR: i64 = 3_600_000;
/// Length of a schedule day; [`schedule_total`] runs the last entry up to it.
pub const MS_IN_DAY: i64 = 86_400_000;

/// One entry of a programmed daily schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRate {
    /// Milliseconds after midnight.
    pub start: i64,
    /// Units per hour.
    pub rate: f64,
}

/// Units delivered at `rate` U/hr over `duration`.
pub fn segment_dose(duration: Duration, rate: f64) -> f64 {
    round_dose(raw_dose(duration, rate))
}

/// Daily total of a schedule; each entry runs until the next one starts.
pub fn schedule_total(schedule: &[ScheduleRate]) -> Option<f64> {
    if schedule.is_empty() {
        return None;
    }
    let total: f64 = schedule
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let end = schedule.get(i + 1).map_or(MS_IN_DAY, |next| next.start);
            raw_dose(Duration::milliseconds(end - entry.start), entry.rate)
        })
        .sum();
    Some(round_dose(total))
}

/// Units delivered inside `[start, end)` by segments that carry a rate.
pub fn subtotal(segments: &[Segment], start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let total: f64 = segments
        .iter()
        .filter_map(|segment| {
            let rate = segment.value?;
            let from = segment.start?.max(start);
            let to = segment.end?.min(end);
            (from < to).then(|| raw_dose(to - from, rate))
        })
        .sum();
    round_dose(total)
}

/// One edge of a query window and the segment that holds it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub datetime: DateTime<Utc>,
    /// Segment holding `datetime`, if any.
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoints {
    /// Edge at the window start.
    pub start: Endpoint,
    /// Edge at the window end.
    pub end: Endpoint,
}

/// Locate the segments holding the edges of `[start, end]`.
///
/// With `optional_extents`, an edge that no segment holds falls back to the
/// nearest segment lying inside the window.
pub fn endpoints(
    segments: &[Segment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    optional_extents: bool,
) -> Endpoints {
    let start_index = segments
        .iter()
        .position(|s| matches!((s.start, s.end), (Some(a), Some(b)) if a <= start && start < b))
        .or_else(|| {
            optional_extents
                .then(|| {
                    segments
                        .iter()
                        .position(|s| s.start.is_some_and(|a| a > start && a < end))
                })
                .flatten()
        });

    let end_index = segments
        .iter()
        .rposition(|s| matches!((s.start, s.end), (Some(a), Some(b)) if a < end && end <= b))
        .or_else(|| {
            optional_extents
                .then(|| {
                    segments
                        .iter()
                        .rposition(|s| s.end.is_some_and(|b| b > start && b < end))
                })
                .flatten()
        });

    Endpoints {
        start: Endpoint {
            datetime: start,
            index: start_index,
        },
        end: Endpoint {
            datetime: end,
            index: end_index,
        },
    }
}

/// Like [`endpoints`], but `None` unless the window is covered without gaps.
pub fn continuous_endpoints(
    segments: &[Segment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<Endpoints> {
    let found = endpoints(segments, start, end, false);
    let (first, last) = (found.start.index?, found.end.index?);
    if first > last {
        return None;
    }
    segments[first..=last]
        .windows(2)
        .all(|pair| pair[0].abuts(&pair[1]))
        .then_some(found)
}

/// Drawing group a basal belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathGroup {
    Automated,
    Manual,
}

/// Automated when the pump was in closed loop: automated delivery, or a
/// suspend that interrupted automated delivery.
pub fn path_group_type(segment: &Segment) -> PathGroup {
    let automated = match segment.delivery_type {
        DeliveryType::Automated => true,
        DeliveryType::Suspend => segment
            .suppressed
            .first()
            .is_some_and(|layer| layer.delivery_type == DeliveryType::Automated),
        _ => false,
    };
    if automated {
        PathGroup::Automated
    } else {
        PathGroup::Manual
    }
}

/// Consecutive runs of segments sharing a [`PathGroup`].
pub fn path_groups(segments: &[Segment]) -> Vec<Vec<Segment>> {
    let mut groups: Vec<Vec<Segment>> = Vec::new();
    let mut current: Option<PathGroup> = None;
    for segment in segments {
        let group = path_group_type(segment);
        match groups.last_mut() {
            Some(run) if current == Some(group) => run.push(segment.clone()),
            _ => groups.push(vec![segment.clone()]),
        }
        current = Some(group);
    }
    groups
}

fn raw_dose(duration: Duration, rate: f64) -> f64 {
    rate * duration.num_milliseconds() as f64 / MS_IN_HOUR as f64
}

fn round_dose(units: f64) -> f64 {
    (units * 1000.0).round() / 1000.0
}
