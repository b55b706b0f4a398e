pub mod metrics;

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

pub type SortedUnitId = u16;
pub type ChannelId = u16;
pub type EventLine = u8;

/// Identifies one spike source: an electrode and the sorted-unit id assigned
/// by the spike sorter. Ordered by electrode first, then id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitLabel {
    pub electrode: String,
    pub sorted_id: SortedUnitId,
}

impl UnitLabel {
    pub fn new(electrode: impl Into<String>, sorted_id: SortedUnitId) -> Self {
        Self {
            electrode: electrode.into(),
            sorted_id,
        }
    }
}

impl fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.electrode, self.sorted_id)
    }
}

/// A value paired with its acquisition timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamped<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// One event from the acquisition stream.
///
/// Continuous-type and event-type samples pass through the windowing stage
/// untouched; only spike-type samples are binned by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum NeuralEvent {
    Continuous {
        channel: ChannelId,
        sample_count: u16,
    },
    Spike {
        electrode: String,
        sorted_id: SortedUnitId,
    },
    Event {
        line: EventLine,
        state: bool,
    },
}

impl NeuralEvent {
    /// The unit label of a spike-type event, `None` for other types.
    pub fn unit_label(&self) -> Option<UnitLabel> {
        match self {
            NeuralEvent::Spike {
                electrode,
                sorted_id,
            } => Some(UnitLabel::new(electrode.clone(), *sorted_id)),
            _ => None,
        }
    }

    pub fn is_spike(&self) -> bool {
        matches!(self, NeuralEvent::Spike { .. })
    }
}

impl fmt::Display for NeuralEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeuralEvent::Continuous {
                channel,
                sample_count,
            } => write!(f, "LFP: channel {channel}, {sample_count} samples"),
            NeuralEvent::Spike {
                electrode,
                sorted_id,
            } => write!(f, "Spike: {electrode}, id {sorted_id}"),
            NeuralEvent::Event { line, state } => {
                write!(
                    f,
                    "Event: line {line}, {}",
                    if *state { "HIGH" } else { "LOW" }
                )
            }
        }
    }
}

/// Signed distance from `from` to `to` in milliseconds, at microsecond
/// resolution where the span allows it.
pub fn ms_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    delta
        .num_microseconds()
        .map(|us| us as f64 / 1_000.0)
        .unwrap_or_else(|| delta.num_milliseconds() as f64)
}

/// A millisecond quantity as a `TimeDelta`, rounded to whole microseconds.
pub fn ms_to_delta(ms: f64) -> TimeDelta {
    TimeDelta::microseconds((ms * 1_000.0).round() as i64)
}
