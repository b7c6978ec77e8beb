//! Start-ordered sequence of non-overlapping intervals.
//!
//! Adding an interval that overlaps existing members clips them so the
//! sequence stays disjoint. Whatever coverage the newcomer overwrote is
//! handed back to the caller instead of being dropped.
//!
//! Members starting later take precedence over members starting earlier:
//! an interval is assumed to hold until something newer begins. When two
//! intervals start at the same instant the one added last wins.

use std::collections::VecDeque;

use crate::{BasalError, DEFAULT_MAX_RESOLUTION_STEPS};

/// Anything with a (possibly open) `[start, end)` range that can be clipped.
pub trait Span: Clone {
    type Instant: Copy + Ord;

    fn start(&self) -> Option<Self::Instant>;
    fn end(&self) -> Option<Self::Instant>;
    fn set_start(&mut self, at: Self::Instant);
    fn set_end(&mut self, at: Self::Instant);
}

/// Disjoint members in start order, with a per-`add` cap on placements.
#[derive(Debug, Clone)]
pub struct Timeline<T> {
    items: Vec<T>,
    max_steps: usize,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            max_steps: DEFAULT_MAX_RESOLUTION_STEPS,
        }
    }
}

impl<T: Span> Timeline<T> {
    /// Empty timeline with the default step limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline whose `add` fails after `max_steps` placements in one call.
    pub fn with_step_limit(max_steps: usize) -> Self {
        Self {
            items: Vec::new(),
            max_steps,
        }
    }

    /// Insert `item`, returning the fragments of existing members it overwrote.
    ///
    /// Fragments come back in the order they were cut: the tail of the
    /// member preceding the insertion point, then any member sharing the
    /// newcomer's start, then whatever re-placing later members displaced.
    pub fn add(&mut self, item: T) -> Result<Vec<T>, BasalError> {
        let mut overwritten = Vec::new();
        let mut pending = VecDeque::from([item]);
        let mut steps = 0;

        while let Some(next) = pending.pop_front() {
            steps += 1;
            if steps > self.max_steps {
                return Err(BasalError::UnresolvableOverlap { steps: self.max_steps });
            }
            let (cut, requeue) = self.place(next)?;
            overwritten.extend(cut);
            for fragment in requeue.into_iter().rev() {
                pending.push_front(fragment);
            }
        }

        Ok(overwritten)
    }

    /// Single placement: splice `item` in, clip its neighbours and return
    /// `(overwritten, members to re-place)`.
    fn place(&mut self, item: T) -> Result<(Vec<T>, VecDeque<T>), BasalError> {
        let (start, end) = closed_bounds(&item)?;

        let index = self
            .items
            .iter()
            .rposition(|member| member.start().is_some_and(|s| s < start))
            .map_or(0, |i| i + 1);

        let mut displaced: VecDeque<T> = self.items.split_off(index).into();
        let mut overwritten = Vec::new();

        if let Some(prev) = self.items.last_mut() {
            if let Some(prev_end) = prev.end().filter(|prev_end| *prev_end > start) {
                let mut cut = prev.clone();
                prev.set_end(start);
                cut.set_start(start);
                if prev_end > end {
                    let mut rest = cut.clone();
                    rest.set_start(end);
                    cut.set_end(end);
                    displaced.push_front(rest);
                }
                overwritten.push(cut);
            }
        }

        self.items.push(item);

        while displaced
            .front()
            .is_some_and(|first| first.start() == Some(start))
        {
            let Some(mut first) = displaced.pop_front() else {
                break;
            };
            if first.end().is_some_and(|first_end| first_end <= end) {
                overwritten.push(first);
                continue;
            }
            let mut cut = first.clone();
            cut.set_end(end);
            first.set_start(end);
            overwritten.push(cut);
            displaced.push_front(first);
            break;
        }

        Ok((overwritten, displaced))
    }

    /// Copy of the current members, in start order.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }

    /// Take the members out, in start order.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Member with the latest start.
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    /// Remove the member with the latest start.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn closed_bounds<T: Span>(item: &T) -> Result<(T::Instant, T::Instant), BasalError> {
    let start = item.start().ok_or(BasalError::MalformedInterval {
        reason: "missing start",
    })?;
    let end = item.end().ok_or(BasalError::MalformedInterval {
        reason: "missing end",
    })?;
    if end < start {
        return Err(BasalError::MalformedInterval {
            reason: "end precedes start",
        });
    }
    Ok((start, end))
}
