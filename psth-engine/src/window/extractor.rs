use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use psth_common::Timestamped;

use super::TriggeredWindow;

const DEFAULT_TOLERANCE_MS: i64 = 2_000;

/// A trigger whose window is waiting for its right half to fill.
#[derive(Debug)]
struct PendingTrigger<C> {
    class: C,
    anchor: DateTime<Utc>,
    // Half-windows captured at trigger arrival; later parameter changes
    // apply only to later triggers.
    left_half_window: TimeDelta,
    due: DateTime<Utc>,
}

impl<C> PendingTrigger<C> {
    fn is_complete(&self, latest_sample: DateTime<Utc>) -> bool {
        latest_sample >= self.due
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.due
    }
}

/// Buffers a raw timestamped sample stream and, for each trigger, emits the
/// buffered samples inside `[t - leftHalfWindow, t + rightHalfWindow]`,
/// tagged with the trigger's class and anchored at `t`.
///
/// A pending window is emitted once the sample stream's latest timestamp
/// reaches its due time (`t + rightHalfWindow`), or once the wall clock does
/// (`poll`), whichever a caller drives first. The delay is identical for
/// every trigger, so emissions preserve trigger arrival order. Overlapping
/// pending windows each capture independently from the shared buffer.
///
/// Head eviction keeps memory bounded: on every sample the buffer drops
/// entries older than the full span plus a fixed tolerance. A tolerance too
/// small for the longest pending delay can evict a sample an older
/// unresolved trigger still needs; that loss is accepted rather than letting
/// the buffer grow without bound.
#[derive(Debug)]
pub struct TriggeredWindowExtractor<T, C> {
    left_half_window: TimeDelta,
    right_half_window: TimeDelta,
    tolerance: TimeDelta,
    buffer: VecDeque<Timestamped<T>>,
    pending: VecDeque<PendingTrigger<C>>,
    latest_sample: Option<DateTime<Utc>>,
}

impl<T: Clone, C> TriggeredWindowExtractor<T, C> {
    pub fn new(left_half_window: TimeDelta, right_half_window: TimeDelta) -> Self {
        Self {
            left_half_window: left_half_window.max(TimeDelta::zero()),
            right_half_window: right_half_window.max(TimeDelta::zero()),
            tolerance: TimeDelta::milliseconds(DEFAULT_TOLERANCE_MS),
            buffer: VecDeque::with_capacity(64),
            pending: VecDeque::new(),
            latest_sample: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: TimeDelta) -> Self {
        self.tolerance = tolerance.max(TimeDelta::zero());
        self
    }

    /// Changes the half-windows for triggers that arrive from now on;
    /// already-pending windows keep the bounds they were scheduled with.
    pub fn set_half_windows(&mut self, left_half_window: TimeDelta, right_half_window: TimeDelta) {
        self.left_half_window = left_half_window.max(TimeDelta::zero());
        self.right_half_window = right_half_window.max(TimeDelta::zero());
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Appends one sample, evicts stale history, and emits every pending
    /// window completed by this sample's timestamp.
    pub fn push_sample(&mut self, sample: Timestamped<T>) -> Vec<TriggeredWindow<T, C>> {
        let timestamp = sample.timestamp;
        self.buffer.push_back(sample);
        self.latest_sample = Some(match self.latest_sample {
            Some(latest) => latest.max(timestamp),
            None => timestamp,
        });

        let horizon =
            timestamp - self.left_half_window - self.right_half_window - self.tolerance;
        while let Some(front) = self.buffer.front() {
            if front.timestamp < horizon {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        self.drain_complete()
    }

    /// Schedules a window for the trigger and emits any windows already
    /// completed by previously seen samples.
    pub fn push_trigger(&mut self, trigger: Timestamped<C>) -> Vec<TriggeredWindow<T, C>> {
        self.pending.push_back(PendingTrigger {
            class: trigger.value,
            anchor: trigger.timestamp,
            left_half_window: self.left_half_window,
            due: trigger.timestamp + self.right_half_window,
        });
        self.drain_complete()
    }

    /// Emits every pending window whose due time has passed on the wall
    /// clock, regardless of how far the sample stream has advanced. Covers
    /// sources that stall before delivering a sample past the due time.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<TriggeredWindow<T, C>> {
        let mut windows = Vec::new();
        while self.pending.front().is_some_and(|front| front.is_expired(now)) {
            if let Some(trigger) = self.pending.pop_front() {
                windows.push(self.emit(trigger));
            }
        }
        windows
    }

    fn drain_complete(&mut self) -> Vec<TriggeredWindow<T, C>> {
        let Some(latest) = self.latest_sample else {
            return Vec::new();
        };
        let mut windows = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|front| front.is_complete(latest))
        {
            if let Some(trigger) = self.pending.pop_front() {
                windows.push(self.emit(trigger));
            }
        }
        windows
    }

    fn emit(&mut self, trigger: PendingTrigger<C>) -> TriggeredWindow<T, C> {
        let PendingTrigger {
            class,
            anchor,
            left_half_window,
            due,
        } = trigger;

        // Tight eviction: nothing older than the window start is needed by
        // this or any later trigger.
        let start = anchor - left_half_window;
        while let Some(front) = self.buffer.front() {
            if front.timestamp < start {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        let samples = self
            .buffer
            .iter()
            .filter(|sample| sample.timestamp >= start && sample.timestamp <= due)
            .cloned()
            .collect();

        TriggeredWindow {
            samples,
            class,
            anchor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        t0() + TimeDelta::milliseconds(offset_ms)
    }

    fn extractor(left_ms: i64, right_ms: i64) -> TriggeredWindowExtractor<u32, &'static str> {
        TriggeredWindowExtractor::new(
            TimeDelta::milliseconds(left_ms),
            TimeDelta::milliseconds(right_ms),
        )
    }

    fn sample(value: u32, offset_ms: i64) -> Timestamped<u32> {
        Timestamped::new(value, at(offset_ms))
    }

    #[test]
    fn emits_window_once_data_passes_the_due_time() {
        let mut extractor = extractor(100, 200);
        assert!(extractor.push_sample(sample(1, 905)).is_empty());
        assert!(extractor.push_sample(sample(2, 1005)).is_empty());
        assert!(extractor
            .push_trigger(Timestamped::new("A", at(1000)))
            .is_empty());
        assert!(extractor.push_sample(sample(3, 1150)).is_empty());

        // First sample at or past the due time closes the window.
        let windows = extractor.push_sample(sample(4, 1200));
        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(window.class, "A");
        assert_eq!(window.anchor, at(1000));
        // 905, 1005, 1150, and the closing 1200 all lie in [900, 1200].
        assert_eq!(
            window.samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn window_bounds_are_inclusive_and_tight() {
        let mut extractor = extractor(100, 200);
        extractor.push_sample(sample(1, 899));
        extractor.push_sample(sample(2, 900));
        extractor.push_trigger(Timestamped::new("A", at(1000)));

        let windows = extractor.push_sample(sample(3, 1200));
        assert_eq!(windows.len(), 1);
        // 899 is outside [900, 1200]; 900 and 1200 are exactly on the bounds.
        assert_eq!(
            windows[0].samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![2, 3]
        );
        // Tight eviction dropped the sample at 899 from the buffer.
        assert_eq!(extractor.buffered_len(), 2);
    }

    #[test]
    fn trigger_arriving_after_its_due_data_emits_immediately() {
        let mut extractor = extractor(50, 100);
        extractor.push_sample(sample(1, 980));
        extractor.push_sample(sample(2, 1150));

        let windows = extractor.push_trigger(Timestamped::new("late", at(1000)));
        assert_eq!(windows.len(), 1);
        assert_eq!(
            windows[0].samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn overlapping_windows_capture_independently_in_order() {
        let mut extractor = extractor(100, 200);
        extractor.push_sample(sample(1, 950));
        extractor.push_trigger(Timestamped::new("A", at(1000)));
        extractor.push_trigger(Timestamped::new("B", at(1050)));
        extractor.push_sample(sample(2, 1100));

        let mut windows = extractor.push_sample(sample(3, 1300));
        assert_eq!(windows.len(), 2);
        let second = windows.pop().unwrap();
        let first = windows.pop().unwrap();

        assert_eq!(first.class, "A");
        assert_eq!(
            first.samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(second.class, "B");
        // 950 < 1050 - 100, so the shared sample 1 is outside B's window.
        assert_eq!(
            second.samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn head_eviction_respects_the_tolerance() {
        let mut extractor =
            extractor(100, 200).with_tolerance(TimeDelta::milliseconds(1_000));
        extractor.push_sample(sample(1, 0));
        extractor.push_sample(sample(2, 1_200));
        assert_eq!(extractor.buffered_len(), 2);

        // 0 < 1400 - 100 - 200 - 1000, so the first sample is evicted.
        extractor.push_sample(sample(3, 1_400));
        assert_eq!(extractor.buffered_len(), 2);
    }

    #[test]
    fn poll_flushes_pending_windows_on_wall_clock() {
        let mut extractor = extractor(100, 200);
        extractor.push_sample(sample(1, 950));
        extractor.push_trigger(Timestamped::new("A", at(1000)));

        // No sample ever reaches the due time; the source stalled.
        assert!(extractor.poll(at(1199)).is_empty());
        let windows = extractor.poll(at(1200));
        assert_eq!(windows.len(), 1);
        assert_eq!(
            windows[0].samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(extractor.pending_len(), 0);
    }

    #[test]
    fn half_window_changes_apply_to_later_triggers_only() {
        let mut extractor = extractor(100, 200);
        extractor.push_sample(sample(1, 950));
        extractor.push_trigger(Timestamped::new("old", at(1000)));
        extractor.set_half_windows(TimeDelta::milliseconds(10), TimeDelta::milliseconds(20));
        extractor.push_trigger(Timestamped::new("new", at(1100)));

        // The first window keeps its original [900, 1200] bounds.
        let windows = extractor.push_sample(sample(2, 1200));
        assert_eq!(windows.len(), 2);
        assert_eq!(
            windows[0].samples.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1, 2]
        );
        // The second was scheduled with [1090, 1120].
        assert!(windows[1].samples.is_empty());
    }
}
