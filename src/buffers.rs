//! Fixed-capacity time-indexed sample buffers
//!
//! `RotationData` holds the display rotations produced per frame so that a
//! late-arriving 6DoF sample can look up what the inertial estimate was at its
//! own timestamp. `PositionData` holds the external tracker's positions and
//! advances them by estimated velocity.
//!
//! Samples are inserted at the head and the oldest is evicted on overflow,
//! whatever their timestamps. Callers own monotonicity; an out-of-order
//! insertion is logged and kept.

use std::collections::VecDeque;

use crate::types::{Rotation, TimestampNs, Vec3};

pub const ROTATION_SAMPLES: usize = 10;
pub const POSITION_SAMPLES: usize = 3;

/// Values that can be blended along a time axis.
pub trait SampleValue: Copy {
    /// `fraction == 0` gives `a`, `1` gives `b`, values outside `[0, 1]` extrapolate.
    fn blend(a: &Self, b: &Self, fraction: f64) -> Self;
}

impl SampleValue for Rotation {
    fn blend(a: &Self, b: &Self, fraction: f64) -> Self {
        // Shortest-arc slerp: powf takes the positive-w representative of the delta.
        let delta = a.inverse() * b;
        a * delta.powf(fraction)
    }
}

impl SampleValue for Vec3 {
    fn blend(a: &Self, b: &Self, fraction: f64) -> Self {
        a + (b - a) * fraction
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimestampedSample<T> {
    pub timestamp: TimestampNs,
    pub value: T,
}

#[derive(Clone, Debug)]
pub struct TimeSeriesBuffer<T> {
    label: &'static str,
    capacity: usize,
    /// Oldest at the front, newest at the back.
    samples: VecDeque<TimestampedSample<T>>,
}

pub type RotationData = TimeSeriesBuffer<Rotation>;
pub type PositionData = TimeSeriesBuffer<Vec3>;

impl RotationData {
    pub fn rotations(capacity: usize) -> Self {
        Self::with_label("rotation", capacity)
    }
}

impl PositionData {
    pub fn positions(capacity: usize) -> Self {
        Self::with_label("position", capacity)
    }

    /// Advance the latest position by the velocity between the two newest
    /// samples, whether or not `timestamp` falls inside the stored range.
    pub fn extrapolated_for_timestamp(&self, timestamp: TimestampNs) -> Option<Vec3> {
        match self.newest_pair() {
            Some((prev, last)) => Some(extrapolate(prev, last, timestamp)),
            None => self.samples.back().map(|s| s.value),
        }
    }
}

impl<T: SampleValue> TimeSeriesBuffer<T> {
    /// Capacity below two could never become valid, so it is raised to two.
    pub fn with_label(label: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            label,
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn add_sample(&mut self, value: T, timestamp: TimestampNs) {
        if let Some(latest) = self.samples.back() {
            if timestamp < latest.timestamp {
                log::warn!(
                    "{} sample out of order: {} ns after {} ns",
                    self.label,
                    timestamp,
                    latest.timestamp
                );
            }
        }
        self.samples.push_back(TimestampedSample { timestamp, value });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// True once at least two samples have been recorded.
    pub fn is_valid(&self) -> bool {
        self.samples.len() >= 2
    }

    pub fn latest_data(&self) -> Option<T> {
        if !self.is_valid() {
            return None;
        }
        self.samples.back().map(|s| s.value)
    }

    pub fn latest_timestamp(&self) -> Option<TimestampNs> {
        if !self.is_valid() {
            return None;
        }
        self.samples.back().map(|s| s.timestamp)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blend between the closest samples bracketing `timestamp`, or
    /// extrapolate from the two newest samples when it lies outside the
    /// stored range. A lone sample is returned unmodified.
    pub fn interpolated_for_timestamp(&self, timestamp: TimestampNs) -> Option<T> {
        let (prev, last) = match self.newest_pair() {
            Some(pair) => pair,
            None => return self.samples.back().map(|s| s.value),
        };

        let mut lower: Option<&TimestampedSample<T>> = None;
        let mut upper: Option<&TimestampedSample<T>> = None;
        for sample in self.samples.iter() {
            if sample.timestamp <= timestamp
                && lower.map_or(true, |l| sample.timestamp >= l.timestamp)
            {
                lower = Some(sample);
            }
            if sample.timestamp >= timestamp
                && upper.map_or(true, |u| sample.timestamp < u.timestamp)
            {
                upper = Some(sample);
            }
        }

        match (lower, upper) {
            (Some(lo), Some(hi)) if lo.timestamp == hi.timestamp => Some(lo.value),
            (Some(lo), Some(hi)) => Some(extrapolate(lo, hi, timestamp)),
            _ => Some(extrapolate(prev, last, timestamp)),
        }
    }

    fn newest_pair(&self) -> Option<(&TimestampedSample<T>, &TimestampedSample<T>)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((&self.samples[n - 2], &self.samples[n - 1]))
    }
}

/// Linear in time through `a` and `b`; inside `[a, b]` this is interpolation.
fn extrapolate<T: SampleValue>(
    a: &TimestampedSample<T>,
    b: &TimestampedSample<T>,
    timestamp: TimestampNs,
) -> T {
    let span = b.timestamp - a.timestamp;
    if span == 0 {
        return b.value;
    }
    let fraction = (timestamp - a.timestamp) as f64 / span as f64;
    T::blend(&a.value, &b.value, fraction)
}
