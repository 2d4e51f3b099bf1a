//! Rolling bytes-per-second counter for transfer speed display.
//!
//! Call [`ByteCounter::prepare`] when the transfer starts and
//! [`ByteCounter::add_bytes`] after every chunk. A fresh speed is
//! calculated once each full second of transfer time has been counted;
//! leftover time and bytes carry into the next second so the rate stays
//! honest across uneven chunk timing.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

const ONE_SECOND: i64 = 1000;

#[derive(Debug, Default)]
struct CounterState {
    /// Time of the previous update, epoch millis
    previous_time: i64,
    /// Millis counted since the last speed calculation
    time_counted: i64,
    bytes_per_sec: i64,
    /// Bytes counted since the last speed calculation
    bytes_counted: i64,
}

#[derive(Debug, Default)]
pub struct ByteCounter {
    state: Mutex<CounterState>,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start time and reset the counters.
    pub fn prepare(&self) {
        self.prepare_at(Utc::now().timestamp_millis());
    }

    /// Register bytes transferred since the previous call.
    pub fn add_bytes(&self, bytes: i64) {
        self.add_bytes_at(bytes, Utc::now().timestamp_millis());
    }

    /// The most recently calculated speed, in bytes per second.
    pub fn bytes_per_sec(&self) -> i64 {
        self.lock().bytes_per_sec
    }

    fn prepare_at(&self, current_time: i64) {
        *self.lock() = CounterState {
            previous_time: current_time,
            ..CounterState::default()
        };
    }

    fn add_bytes_at(&self, bytes: i64, current_time: i64) {
        let mut state = self.lock();

        let time_spent = current_time - state.previous_time;
        state.previous_time = current_time;

        state.time_counted += time_spent;
        state.bytes_counted += bytes;

        if state.time_counted >= ONE_SECOND {
            if time_spent > ONE_SECOND {
                // One slow chunk covered more than a second on its own:
                // average it down to a single second and start over.
                state.bytes_per_sec = bytes_in_time_left(bytes, time_spent, ONE_SECOND);
                state.time_counted = 0;
                state.bytes_counted = 0;
            } else {
                // The counted second completed partway through this
                // chunk: spread the chunk across the boundary and carry
                // the remainder forward.
                let earlier_time = state.time_counted - time_spent;
                let earlier_bytes = state.bytes_counted - bytes;
                let time_left = ONE_SECOND - earlier_time;

                state.bytes_per_sec =
                    earlier_bytes + bytes_in_time_left(bytes, time_spent, time_left);
                state.time_counted %= ONE_SECOND;
                state.bytes_counted -= state.bytes_per_sec;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Average number of bytes transferred in `time_left`, given `bytes`
/// transferred in `time_spent`.
fn bytes_in_time_left(bytes: i64, time_spent: i64, time_left: i64) -> i64 {
    if time_spent == 0 {
        return 0;
    }

    (bytes as f64 * (time_left as f64 / time_spent as f64)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_speed_before_a_second_has_passed() {
        let counter = ByteCounter::new();
        counter.prepare_at(0);

        counter.add_bytes_at(512, 400);
        counter.add_bytes_at(512, 800);

        assert_eq!(counter.bytes_per_sec(), 0);
    }

    #[test]
    fn test_steady_rate_over_exactly_one_second() {
        let counter = ByteCounter::new();
        counter.prepare_at(0);

        counter.add_bytes_at(512, 500);
        counter.add_bytes_at(512, 1000);

        assert_eq!(counter.bytes_per_sec(), 1024);
    }

    #[test]
    fn test_chunk_crossing_the_second_boundary_is_split() {
        // 1024 bytes counted in 900ms, then 1024 bytes in 200ms. The
        // 100ms left of the second gets half of the last chunk: 512.
        let counter = ByteCounter::new();
        counter.prepare_at(0);

        counter.add_bytes_at(1024, 900);
        counter.add_bytes_at(1024, 1100);

        assert_eq!(counter.bytes_per_sec(), 1536);
    }

    #[test]
    fn test_single_chunk_slower_than_a_second_is_averaged() {
        // 1024 bytes in 8 seconds averages to 128 bytes per second.
        let counter = ByteCounter::new();
        counter.prepare_at(0);

        counter.add_bytes_at(1024, 8000);

        assert_eq!(counter.bytes_per_sec(), 128);
    }

    #[test]
    fn test_leftover_carries_into_the_next_second() {
        let counter = ByteCounter::new();
        counter.prepare_at(0);

        counter.add_bytes_at(1024, 900);
        counter.add_bytes_at(1024, 1100);
        assert_eq!(counter.bytes_per_sec(), 1536);

        // 512 bytes and 100ms were carried over. Another 1024 bytes in
        // the next 900ms completes the second with 1536 again.
        counter.add_bytes_at(1024, 2000);
        assert_eq!(counter.bytes_per_sec(), 1536);
    }

    #[test]
    fn test_prepare_resets_the_counters() {
        let counter = ByteCounter::new();
        counter.prepare_at(0);
        counter.add_bytes_at(2048, 1000);
        assert_eq!(counter.bytes_per_sec(), 2048);

        counter.prepare_at(5000);
        assert_eq!(counter.bytes_per_sec(), 0);
    }
}
