//! Merges scheduled, temp and suspend intervals into one actual-delivery
//! timeline.
//!
//! Scheduled segments form the base timeline. Every other delivery type is
//! layered on top in the order given by [`ReconcileConfig::priority`]; the
//! base entries an override replaces are kept on its `suppressed` stack and
//! in the per-type undelivered history.

use std::collections::{BTreeMap, VecDeque};

use basal_core::{BasalError, DeliveryType, ReconcileConfig, Segment, Timeline};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Serializable result of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reconciliation {
    pub actual: Vec<Segment>,
    pub undelivered: BTreeMap<DeliveryType, Vec<Segment>>,
    /// Delivery types present in the input but absent from the priority list.
    pub unhandled: Vec<DeliveryType>,
    /// Scheduled fragments from another device that lost an overlap.
    #[serde(default)]
    pub conflicts: Vec<Segment>,
}

/// Reconciler over one batch of basal segments.
///
/// Everything is computed up front by [`SegmentUtil::new`]; the accessors
/// only borrow the finished timelines.
#[derive(Debug, Clone)]
pub struct SegmentUtil {
    actual: Vec<Segment>,
    undelivered: BTreeMap<DeliveryType, Vec<Segment>>,
    unhandled: Vec<DeliveryType>,
    conflicts: Vec<Segment>,
}

impl SegmentUtil {
    /// Reconcile one batch of basal segments. The input is never modified.
    pub fn new(segments: &[Segment], config: &ReconcileConfig) -> Result<Self, BasalError> {
        let mut builder = Builder::new(config.max_resolution_steps);
        for segment in segments {
            builder.partition(segment.clone())?;
        }
        builder.build_schedule()?;

        let mut base = smoosh(std::mem::take(&mut builder.timeline).into_vec());

        for delivery in &config.priority {
            if *delivery == DeliveryType::Scheduled {
                warn!("Ignoring `scheduled` in the priority list; it is always the base");
                continue;
            }
            let Some(bucket) = builder.buckets.remove(delivery) else {
                continue;
            };
            builder.layer(&mut base, bucket)?;
        }

        let unhandled: Vec<DeliveryType> = builder.buckets.keys().cloned().collect();
        if !unhandled.is_empty() {
            warn!(
                "Unhandled delivery types: {}",
                unhandled
                    .iter()
                    .map(DeliveryType::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        for (delivery, bucket) in std::mem::take(&mut builder.buckets) {
            builder.undelivered.entry(delivery).or_default().extend(bucket);
        }

        assign_ids(&mut base);
        link_override_runs(&mut base);

        let undelivered = builder
            .undelivered
            .into_iter()
            .map(|(delivery, mut history)| {
                history.sort_by_key(|segment| segment.start);
                (delivery, smoosh(history))
            })
            .collect();
        let mut conflicts = builder.conflicts;
        conflicts.sort_by_key(|segment| segment.start);

        Ok(Self {
            actual: base,
            undelivered,
            unhandled,
            conflicts: smoosh(conflicts),
        })
    }

    /// The merged, id-stamped timeline.
    pub fn actual(&self) -> &[Segment] {
        &self.actual
    }

    /// What `delivery` would have delivered where something else won.
    pub fn undelivered(&self, delivery: &DeliveryType) -> &[Segment] {
        self.undelivered
            .get(delivery)
            .map_or(&[], |history| history.as_slice())
    }

    /// Delivery types that had no place in the priority list.
    pub fn unhandled(&self) -> &[DeliveryType] {
        &self.unhandled
    }

    /// Schedule a second device would have run where the first one won.
    pub fn conflicts(&self) -> &[Segment] {
        &self.conflicts
    }

    pub fn into_reconciliation(self) -> Reconciliation {
        Reconciliation {
            actual: self.actual,
            undelivered: self.undelivered,
            unhandled: self.unhandled,
            conflicts: self.conflicts,
        }
    }
}

/// Identity used to spot a re-insertion bouncing a payload back out.
type PayloadKey = (Option<String>, Option<f64>);

fn payload_key(segment: &Segment) -> PayloadKey {
    (segment.device_id.clone(), segment.value)
}

struct Builder {
    timeline: Timeline<Segment>,
    scheduled: Vec<Segment>,
    buckets: BTreeMap<DeliveryType, Vec<Segment>>,
    undelivered: BTreeMap<DeliveryType, Vec<Segment>>,
    conflicts: Vec<Segment>,
    max_steps: usize,
}

impl Builder {
    fn new(max_steps: usize) -> Self {
        Self {
            timeline: Timeline::with_step_limit(max_steps),
            scheduled: Vec::new(),
            buckets: BTreeMap::new(),
            undelivered: BTreeMap::new(),
            conflicts: Vec::new(),
            max_steps,
        }
    }

    fn partition(&mut self, mut segment: Segment) -> Result<(), BasalError> {
        let start = segment.start.ok_or(BasalError::MalformedInterval {
            reason: "missing start",
        })?;
        if segment.end.is_none() {
            // Open segments are closed at their own start.
            segment.end = Some(start);
        }
        segment.bounds()?;

        if segment.delivery_type == DeliveryType::Scheduled {
            self.scheduled.push(segment);
            return Ok(());
        }

        let bucket = self
            .buckets
            .entry(segment.delivery_type.clone())
            .or_default();
        let at = bucket.partition_point(|queued| queued.start <= segment.start);
        bucket.insert(at, segment);
        Ok(())
    }

    /// Feed the scheduled segments to the timeline in start order. Equal
    /// starts keep input order, so the later record still wins a tie.
    fn build_schedule(&mut self) -> Result<(), BasalError> {
        let mut scheduled = std::mem::take(&mut self.scheduled);
        scheduled.sort_by_key(|segment| segment.start);
        for segment in scheduled {
            self.insert_scheduled(segment)?;
        }
        Ok(())
    }

    fn insert_scheduled(&mut self, segment: Segment) -> Result<(), BasalError> {
        let displaced = self.timeline.add(segment.clone())?;

        let mut pending = VecDeque::new();
        for fragment in displaced {
            if fragment.device_id == segment.device_id {
                debug!(
                    "Schedule change on device {:?} at {:?}",
                    segment.device_id, fragment.start
                );
            } else {
                pending.push_back(fragment);
            }
        }

        let mut placed = vec![payload_key(&segment)];
        let mut steps = 0;
        while let Some(fragment) = pending.pop_front() {
            steps += 1;
            if steps > self.max_steps {
                return Err(BasalError::UnresolvableOverlap {
                    steps: self.max_steps,
                });
            }
            debug!(
                "Device {:?} overlaps device {:?} at {:?}; re-inserting",
                fragment.device_id, segment.device_id, fragment.start
            );
            placed.push(payload_key(&fragment));
            let echoes = self.timeline.add(fragment.clone())?;
            self.route_echoes(echoes, &placed, &mut pending);
            self.settle_trailing(&fragment, &placed, &mut pending)?;
        }

        Ok(())
    }

    /// Fragments knocked out while re-inserting: a payload already placed
    /// in this round is settled as a conflict, anything else is re-queued.
    fn route_echoes(
        &mut self,
        echoes: Vec<Segment>,
        placed: &[PayloadKey],
        pending: &mut VecDeque<Segment>,
    ) {
        for echo in echoes {
            if placed.contains(&payload_key(&echo)) {
                debug!(
                    "Device {:?} loses the overlap at {:?}",
                    echo.device_id, echo.start
                );
                self.conflicts.push(echo);
            } else {
                pending.push_back(echo);
            }
        }
    }

    /// Lift everything after the re-inserted fragment off the timeline and
    /// add it back, so later members are re-chunked against the fragment.
    fn settle_trailing(
        &mut self,
        fragment: &Segment,
        placed: &[PayloadKey],
        pending: &mut VecDeque<Segment>,
    ) -> Result<(), BasalError> {
        let Some(position) = self.timeline.as_slice().iter().rposition(|member| {
            member.start == fragment.start && member.device_id == fragment.device_id
        }) else {
            return Ok(());
        };

        let mut collateral = Vec::new();
        while self.timeline.len() > position + 1 {
            if let Some(member) = self.timeline.pop() {
                collateral.push(member);
            }
        }

        for member in collateral.into_iter().rev() {
            let echoes = self.timeline.add(member)?;
            self.route_echoes(echoes, placed, pending);
        }
        Ok(())
    }

    fn stash(&mut self, segment: Segment) {
        self.undelivered
            .entry(segment.delivery_type.clone())
            .or_default()
            .push(segment);
    }

    /// Carve each event of one delivery type into the base timeline.
    fn layer(&mut self, base: &mut Vec<Segment>, mut bucket: Vec<Segment>) -> Result<(), BasalError> {
        let mut cursor = 0;
        let mut index = 0;
        let mut steps = 0;

        while index < bucket.len() {
            steps += 1;
            if steps > self.max_steps {
                return Err(BasalError::UnresolvableOverlap {
                    steps: self.max_steps,
                });
            }

            let mut event = bucket[index].clone();
            index += 1;
            let (start, end) = event.bounds()?;
            if start == end {
                warn!(
                    "Skipping zero-length {} event at {}",
                    event.delivery_type,
                    basal_core::timestamp::format(start)
                );
                continue;
            }

            if cursor > 0 && base[cursor - 1].end.is_some_and(|e| e > start) {
                cursor -= 1;
            }
            while cursor < base.len() && base[cursor].end.is_some_and(|e| e <= start) {
                cursor += 1;
            }

            if cursor == base.len() {
                if event.value.is_some() {
                    base.push(event);
                } else {
                    debug!("Dropping {} event without a rate past the schedule", event.delivery_type);
                }
                continue;
            }

            let (item_start, _) = base[cursor].bounds()?;
            if item_start >= end {
                if event.value.is_some() {
                    base.insert(cursor, event);
                } else {
                    debug!("Dropping {} event without a rate in a schedule gap", event.delivery_type);
                }
                continue;
            }

            if item_start > start {
                if event.value.is_some() {
                    base.insert(cursor, clipped(&event, start, item_start));
                    cursor += 1;
                }
                event.start = Some(item_start);
            } else if item_start < start {
                let (_, item_end) = base[cursor].bounds()?;
                let before = clipped(&base[cursor], item_start, start);
                base[cursor] = clipped(&base[cursor], start, item_end);
                base.insert(cursor, before);
                cursor += 1;
            }

            let (item_start, item_end) = base[cursor].bounds()?;
            if item_end > end {
                let after = clipped(&base[cursor], end, item_end);
                base[cursor] = clipped(&base[cursor], item_start, end);
                base.insert(cursor + 1, after);
            } else if item_end < end {
                let remainder = clipped(&event, item_end, end);
                event.end = Some(item_end);
                let at = index + bucket[index..].partition_point(|queued| queued.start <= remainder.start);
                bucket.insert(at, remainder);
            }

            let mut replaced = std::mem::take(&mut base[cursor]);
            if let (Some(percent), Some(rate)) = (event.percent, replaced.value) {
                event.value = Some(percent * rate);
            }
            let mut suppressed = std::mem::take(&mut replaced.suppressed);
            suppressed.insert(0, replaced.clone());
            event.suppressed = suppressed;
            self.stash(replaced);
            base[cursor] = event;
        }

        Ok(())
    }
}

/// Copy of `segment` restricted to `[start, end)`, suppressed layers included.
fn clipped(segment: &Segment, start: DateTime<Utc>, end: DateTime<Utc>) -> Segment {
    let mut piece = segment.clone();
    piece.start = Some(start);
    piece.end = Some(end);
    piece.suppressed = segment
        .suppressed
        .iter()
        .map(|layer| clipped(layer, start, end))
        .collect();
    piece
}

/// Merge adjacent entries that carry the same payload.
fn smoosh(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if last.abuts(&segment) && last.is_smooshable_with(&segment) => {
                last.end = segment.end;
            }
            _ => merged.push(segment),
        }
    }
    merged
}

fn assign_ids(segments: &mut [Segment]) {
    for (n, segment) in segments.iter_mut().enumerate() {
        if let Some(existing) = segment.id.take() {
            segment.datum_id = Some(existing);
        }
        segment.id = Some(format!("segment_{n}"));
    }
}

/// Point every piece continuing a contiguous run of one override record at
/// the run's first piece.
fn link_override_runs(segments: &mut [Segment]) {
    let mut head: Option<String> = None;
    for i in 0..segments.len() {
        let continues = i > 0
            && segments[i].delivery_type != DeliveryType::Scheduled
            && segments[i - 1].delivery_type == segments[i].delivery_type
            && segments[i - 1].datum_id == segments[i].datum_id
            && segments[i - 1].abuts(&segments[i]);
        if continues {
            segments[i].link = head.clone();
        } else {
            head = segments[i].id.clone();
        }
    }
}
