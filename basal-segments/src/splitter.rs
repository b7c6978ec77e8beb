//! Scheduled/temp basal splitter.
//!
//! Walks pre-separated scheduled and temp segments together and cuts each
//! scheduled segment around the temps that override it. Temps running past
//! the end of a scheduled segment are carried into the following ones.

use basal_core::{timestamp, BasalError, DeliveryType, Segment};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Output of [`split_basals`]: the merged timeline, the scheduled slices
/// temps replaced, and the sorted inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasalSplit {
    pub actual_segments: Vec<Segment>,
    pub undelivered_segments: Vec<Segment>,
    pub scheduled_segments: Vec<Segment>,
    pub temp_segments: Vec<Segment>,
    /// Neighbouring actual segments with a gap between them.
    pub non_continuous_segments: Vec<(Segment, Segment)>,
}

/// Where a temp falls relative to one scheduled segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempAlignment {
    /// Strictly inside the scheduled segment.
    Contained,
    /// Starts at (or before) the segment start and ends inside it.
    StartsAtStart,
    /// Starts inside and ends exactly at the segment end.
    EndsAtEnd,
    /// Starts inside and runs past the segment end.
    SpansForward,
    /// Covers the whole segment.
    Covers,
    Disjoint,
}

/// Alignment of a `temp` range against a `scheduled` range.
pub fn classify(
    scheduled: (DateTime<Utc>, DateTime<Utc>),
    temp: (DateTime<Utc>, DateTime<Utc>),
) -> TempAlignment {
    let (s_start, s_end) = scheduled;
    let (t_start, t_end) = temp;

    if t_end <= s_start || t_start >= s_end {
        TempAlignment::Disjoint
    } else if t_start <= s_start && t_end >= s_end {
        TempAlignment::Covers
    } else if t_start <= s_start {
        TempAlignment::StartsAtStart
    } else if t_end < s_end {
        TempAlignment::Contained
    } else if t_end == s_end {
        TempAlignment::EndsAtEnd
    } else {
        TempAlignment::SpansForward
    }
}

/// Split a mixed batch, using only its `scheduled` and `temp` segments.
pub fn split_segments(segments: &[Segment]) -> Result<BasalSplit, BasalError> {
    let mut scheduled = Vec::new();
    let mut temps = Vec::new();
    for segment in segments {
        match segment.delivery_type {
            DeliveryType::Scheduled => scheduled.push(segment.clone()),
            DeliveryType::Temp => temps.push(segment.clone()),
            ref other => debug!("Splitter ignores {other} segments"),
        }
    }
    split_basals(&scheduled, &temps)
}

/// Cut `scheduled` around `temps`. Neither input needs to be sorted.
pub fn split_basals(scheduled: &[Segment], temps: &[Segment]) -> Result<BasalSplit, BasalError> {
    let mut scheduled_segments = scheduled.to_vec();
    let mut temp_segments = temps.to_vec();
    scheduled_segments.sort_by_key(|segment| segment.start);
    temp_segments.sort_by_key(|segment| segment.start);

    let scheduled_bounds = scheduled_segments
        .iter()
        .map(Segment::bounds)
        .collect::<Result<Vec<_>, _>>()?;
    let temp_bounds = temp_segments
        .iter()
        .map(Segment::bounds)
        .collect::<Result<Vec<_>, _>>()?;

    let mut actual = Vec::new();
    let mut undelivered = Vec::new();
    let mut next_temp = 0;
    let mut carried: Option<usize> = None;

    for (segment, &(s_start, s_end)) in scheduled_segments.iter().zip(&scheduled_bounds) {
        let mut pending: Vec<usize> = carried.take().into_iter().collect();
        while next_temp < temp_segments.len() && temp_bounds[next_temp].0 < s_end {
            actual.push(temp_segments[next_temp].clone());
            pending.push(next_temp);
            next_temp += 1;
        }

        let mut cursor = s_start;
        for t in pending {
            let (t_start, t_end) = temp_bounds[t];
            let alignment = classify((s_start, s_end), (t_start, t_end));
            match alignment {
                TempAlignment::Disjoint => continue,
                TempAlignment::Contained
                | TempAlignment::EndsAtEnd
                | TempAlignment::SpansForward => {
                    if t_start > cursor {
                        actual.push(piece(segment, cursor, t_start));
                    }
                }
                TempAlignment::StartsAtStart | TempAlignment::Covers => {}
            }

            let from = t_start.max(cursor);
            let to = t_end.min(s_end);
            if from < to {
                undelivered.push(piece(segment, from, to));
            }
            cursor = cursor.max(to);

            if t_end > s_end {
                carried = Some(t);
            }
        }

        if cursor < s_end {
            actual.push(piece(segment, cursor, s_end));
        }
    }

    actual.extend(temp_segments[next_temp..].iter().cloned());

    actual.sort_by_key(|segment| segment.start);
    undelivered.sort_by_key(|segment| segment.start);
    link_contiguous_temps(&mut actual);

    let non_continuous_segments: Vec<(Segment, Segment)> = actual
        .windows(2)
        .filter(|pair| !pair[0].abuts(&pair[1]))
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    if !non_continuous_segments.is_empty() {
        warn!(
            "{} gap(s) between actual basal segments",
            non_continuous_segments.len()
        );
    }

    Ok(BasalSplit {
        actual_segments: actual,
        undelivered_segments: undelivered,
        scheduled_segments,
        temp_segments,
        non_continuous_segments,
    })
}

fn piece(segment: &Segment, start: DateTime<Utc>, end: DateTime<Utc>) -> Segment {
    let mut piece = segment.clone();
    piece.start = Some(start);
    piece.end = Some(end);
    piece
}

/// Temps that follow each other without a gap on the same device form one
/// session; every temp after the first points back at it.
fn link_contiguous_temps(segments: &mut [Segment]) {
    let mut head: Option<String> = None;
    for i in 0..segments.len() {
        if segments[i].delivery_type != DeliveryType::Temp {
            head = None;
            continue;
        }
        if i > 0
            && segments[i - 1].delivery_type == DeliveryType::Temp
            && segments[i - 1].device_id == segments[i].device_id
            && segments[i - 1].abuts(&segments[i])
        {
            segments[i].link = head.clone();
        } else {
            let first = &segments[i];
            head = first
                .id
                .clone()
                .or_else(|| first.start.map(timestamp::format));
        }
    }
}
