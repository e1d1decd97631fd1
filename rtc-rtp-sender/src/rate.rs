//! Sliding-window byte rate estimation.

use std::collections::VecDeque;

/// Default averaging window for bitrate statistics.
pub const RATE_WINDOW_MS: i64 = 1000;

/// Accumulates byte counts per millisecond over a sliding window and reports
/// the average rate across that window.
///
/// A sample taken at `t` counts while `now - t < window_ms`.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window_ms: i64,
    buckets: VecDeque<(i64, usize)>,
    accumulated: usize,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(RATE_WINDOW_MS)
    }
}

impl RateWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms: window_ms.max(1),
            buckets: VecDeque::new(),
            accumulated: 0,
        }
    }

    pub fn update(&mut self, bytes: usize, now_ms: i64) {
        self.erase_old(now_ms);
        match self.buckets.back_mut() {
            Some((t, count)) if *t == now_ms => *count += bytes,
            _ => self.buckets.push_back((now_ms, bytes)),
        }
        self.accumulated += bytes;
    }

    /// Bytes seen inside the window ending at `now_ms`.
    pub fn total_bytes(&mut self, now_ms: i64) -> usize {
        self.erase_old(now_ms);
        self.accumulated
    }

    /// `8 * bytes_in_window * 1000 / window_ms`
    pub fn rate_bps(&mut self, now_ms: i64) -> u32 {
        let bytes = self.total_bytes(now_ms) as u64;
        (bytes * 8 * 1000 / self.window_ms as u64) as u32
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.accumulated = 0;
    }

    fn erase_old(&mut self, now_ms: i64) {
        while let Some((t, count)) = self.buckets.front().copied() {
            if now_ms - t < self.window_ms {
                break;
            }
            self.accumulated -= count;
            self.buckets.pop_front();
        }
    }
}
