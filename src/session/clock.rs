//! Device clock to wall clock offset estimation.
//!
//! Each camera stamps frames with its own free-running clock (nanoseconds
//! since power on). The offset `epoch - device` is estimated by latching
//! the device clock repeatedly and comparing it against the host wall
//! clock; the median of the samples is robust against the odd sample that
//! got delayed by scheduling.

use super::SessionError;
use chrono::Utc;

/// Number of latch samples taken per estimate.
pub const DEFAULT_OFFSET_SAMPLES: usize = 20;

/// Host wall clock in seconds since the Unix epoch.
pub trait WallClock: Send + Sync {
    /// Current time in epoch seconds.
    fn now_seconds(&self) -> f64;
}

/// [`WallClock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_seconds(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
    }
}

/// A device clock that can be latched and read back.
///
/// Latching and reading back are separate register accesses; the wall
/// clock is read between the two so the read-back delay stays out of the
/// estimate.
pub trait TimestampLatch {
    /// Latches the device clock.
    fn latch(&mut self) -> Result<(), SessionError>;

    /// Returns the last latched value in nanoseconds.
    fn latched_nanos(&mut self) -> Result<i64, SessionError>;
}

/// Estimates `epoch seconds - device seconds` from `samples` latch readings.
pub fn estimate_offset<L, C>(latch: &mut L, clock: &C, samples: usize) -> Result<f64, SessionError>
where
    L: TimestampLatch + ?Sized,
    C: WallClock + ?Sized,
{
    if samples == 0 {
        return Err(SessionError::InvalidRequest(
            "clock offset estimation needs at least one sample".to_owned(),
        ));
    }

    let mut offsets = Vec::with_capacity(samples);
    for _ in 0..samples {
        latch.latch()?;
        let host = clock.now_seconds();
        let device_ns = latch.latched_nanos()?;
        offsets.push(host - device_ns as f64 / 1e9);
    }

    median(offsets).ok_or_else(|| SessionError::InvalidRequest("no offset samples".to_owned()))
}

/// Median of `values`; the mean of the two middle values for an even count.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedLatch(VecDeque<i64>);

    impl TimestampLatch for ScriptedLatch {
        fn latch(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        fn latched_nanos(&mut self) -> Result<i64, SessionError> {
            self.0
                .pop_front()
                .ok_or_else(|| SessionError::InvalidRequest("script exhausted".to_owned()))
        }
    }

    /// Host time shared between a latch and a clock, in seconds.
    #[derive(Clone)]
    struct HostTime(Arc<Mutex<f64>>);

    impl WallClock for HostTime {
        fn now_seconds(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    /// Device clock `behind` seconds behind the host whose register
    /// read-back takes `read_delay` seconds of host time.
    struct SlowReadLatch {
        host: HostTime,
        behind: f64,
        read_delay: f64,
        latched: f64,
    }

    impl TimestampLatch for SlowReadLatch {
        fn latch(&mut self) -> Result<(), SessionError> {
            self.latched = self.host.now_seconds() - self.behind;
            Ok(())
        }

        fn latched_nanos(&mut self) -> Result<i64, SessionError> {
            *self.host.0.lock().unwrap() += self.read_delay;
            Ok((self.latched * 1e9).round() as i64)
        }
    }

    /// Returns scripted readings in order.
    struct ScriptedClock(Mutex<VecDeque<f64>>);

    impl ScriptedClock {
        fn new(readings: impl IntoIterator<Item = f64>) -> Self {
            Self(Mutex::new(readings.into_iter().collect()))
        }
    }

    impl WallClock for ScriptedClock {
        fn now_seconds(&self) -> f64 {
            self.0.lock().unwrap().pop_front().unwrap_or(0.0)
        }
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn test_estimate_is_deterministic() {
        // Offsets 100, 101, 99 seconds: median 100
        let mut latch = ScriptedLatch(VecDeque::from(vec![1_000_000_000, 2_000_000_000, 3_000_000_000]));
        let clock = ScriptedClock::new([101.0, 103.0, 102.0]);
        let offset = estimate_offset(&mut latch, &clock, 3).unwrap();
        assert!((offset - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_does_not_move_estimate() {
        let latch_values: Vec<i64> = (0..5).map(|i| i * 1_000_000_000).collect();
        let mut latch = ScriptedLatch(latch_values.into());
        // Fourth sample delayed by half a second
        let clock = ScriptedClock::new([50.0, 51.0, 52.0, 53.5, 54.0]);
        let offset = estimate_offset(&mut latch, &clock, 5).unwrap();
        assert!((offset - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_even_sample_count_averages_middle_pair() {
        // Offsets 10, 12, 11, 40 seconds: middle pair 11 and 12
        let latch_values: Vec<i64> = (1..=4).map(|i| i * 1_000_000_000).collect();
        let mut latch = ScriptedLatch(latch_values.into());
        let clock = ScriptedClock::new([11.0, 14.0, 14.0, 44.0]);
        let offset = estimate_offset(&mut latch, &clock, 4).unwrap();
        assert!((offset - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_slow_read_back_does_not_bias_estimate() {
        let host = HostTime(Arc::new(Mutex::new(5000.0)));
        let mut latch = SlowReadLatch {
            host: host.clone(),
            behind: 1000.0,
            read_delay: 0.002,
            latched: 0.0,
        };
        let offset = estimate_offset(&mut latch, &host, 20).unwrap();
        assert!((offset - 1000.0).abs() < 1e-6, "offset {offset}");
    }

    #[test]
    fn test_zero_samples_rejected() {
        let mut latch = ScriptedLatch(VecDeque::new());
        let err = estimate_offset(&mut latch, &SystemClock, 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
    }

    #[test]
    fn test_latch_failure_propagates() {
        let mut latch = ScriptedLatch(VecDeque::from(vec![0]));
        assert!(estimate_offset(&mut latch, &SystemClock, 2).is_err());
    }

    proptest! {
        #[test]
        fn prop_median_is_order_independent(mut values in prop::collection::vec(-1e6f64..1e6, 1..50)) {
            let expected = median(values.clone()).unwrap();
            values.reverse();
            prop_assert_eq!(median(values).unwrap(), expected);
        }

        #[test]
        fn prop_median_splits_samples(values in prop::collection::vec(-1e6f64..1e6, 1..50)) {
            let m = median(values.clone()).unwrap();
            let below = values.iter().filter(|v| **v < m).count();
            let above = values.iter().filter(|v| **v > m).count();
            prop_assert!(below <= values.len() / 2);
            prop_assert!(above <= values.len() / 2);
        }

        #[test]
        fn prop_single_outlier_stays_bounded(
            base in 0f64..1e4,
            outlier in 1e5f64..1e9,
            n in 3usize..25,
        ) {
            let mut values = vec![base; n];
            values.push(outlier);
            prop_assert_eq!(median(values).unwrap(), base);
        }
    }
}
