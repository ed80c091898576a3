// Bandwidth throttle: keeps average throughput under a byte-rate limit
use std::time::{Duration, Instant};

/// Paces a single stream.
///
/// After each chunk the caller sleeps for whatever time the running average
/// is ahead of the limit, so throughput overshoots by at most one chunk.
#[derive(Debug)]
pub struct BandwidthThrottle {
    bytes_per_sec: u64,
    started: Instant,
    sent: u64,
}

impl BandwidthThrottle {
    /// `None` when the limit is 0 (unlimited)
    pub fn new(bytes_per_sec: u64) -> Option<Self> {
        if bytes_per_sec == 0 {
            return None;
        }
        Some(Self {
            bytes_per_sec,
            started: Instant::now(),
            sent: 0,
        })
    }

    /// Record `bytes` sent and return how long to wait before the next chunk
    pub fn delay_after(&mut self, bytes: u64, elapsed: Duration) -> Duration {
        self.sent += bytes;
        let budget = Duration::from_secs_f64(self.sent as f64 / self.bytes_per_sec as f64);
        budget.saturating_sub(elapsed)
    }

    /// Record `bytes` sent and sleep the calling thread as needed
    pub fn pace(&mut self, bytes: u64) {
        let delay = self.delay_after(bytes, self.started.elapsed());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
