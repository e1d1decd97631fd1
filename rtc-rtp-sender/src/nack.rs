use log::trace;
use std::collections::VecDeque;

/// Number of NACK bursts remembered.
pub const NACK_BYTE_COUNT_SLOTS: usize = 8;
/// Window over which NACK bytes are limited.
pub const NACK_AVERAGE_INTERVAL_MS: i64 = 1000;

/// Bandwidth limiter for NACK-triggered resends.
///
/// Keeps the byte counts of the most recent NACK bursts, newest first.
/// Resends in answer to NACKs may not use more than the target bitrate over
/// the last second, or over the span of the remembered bursts when all slots
/// fall inside that second.
#[derive(Debug, Default, Clone)]
pub struct NackController {
    byte_counts: VecDeque<(usize, i64)>,
}

impl NackController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes that may still be resent for NACKs at `now_ms`. `None` means no
    /// limit is configured.
    pub fn budget(&self, now_ms: i64, target_bitrate_kbps: u32) -> Option<usize> {
        if target_bitrate_kbps == 0 {
            return None;
        }

        let mut used = 0usize;
        let mut slots = 0usize;
        for (bytes, time_ms) in &self.byte_counts {
            if now_ms - time_ms > NACK_AVERAGE_INTERVAL_MS {
                break;
            }
            used += bytes;
            slots += 1;
        }

        let mut interval_ms = NACK_AVERAGE_INTERVAL_MS;
        if slots == NACK_BYTE_COUNT_SLOTS {
            if let Some((_, oldest_ms)) = self.byte_counts.back() {
                if *oldest_ms <= now_ms {
                    interval_ms = now_ms - oldest_ms;
                }
            }
        }

        let allowed = target_bitrate_kbps as usize * interval_ms as usize / 8;
        if used * 8 >= target_bitrate_kbps as usize * interval_ms as usize {
            trace!("nack budget exhausted: {used} bytes in {interval_ms} ms");
            return Some(0);
        }
        Some(allowed.saturating_sub(used))
    }

    /// Records `bytes` resent for one NACK at `now_ms`. Bursts in the same
    /// millisecond share a slot.
    pub fn record(&mut self, bytes: usize, now_ms: i64) {
        if bytes == 0 {
            return;
        }
        match self.byte_counts.front_mut() {
            Some((count, time_ms)) if now_ms <= *time_ms => *count += bytes,
            _ => {
                self.byte_counts.push_front((bytes, now_ms));
                self.byte_counts.truncate(NACK_BYTE_COUNT_SLOTS);
            }
        }
    }

    pub fn reset(&mut self) {
        self.byte_counts.clear();
    }
}

/// Bytes one NACK may trigger when both target bitrate and RTT are known:
/// the delay-bandwidth product of the path.
pub fn delay_bandwidth_cap(target_bitrate_kbps: u32, avg_rtt_ms: i64) -> Option<usize> {
    if target_bitrate_kbps == 0 || avg_rtt_ms <= 0 {
        return None;
    }
    Some(target_bitrate_kbps as usize * avg_rtt_ms as usize / 8)
}
