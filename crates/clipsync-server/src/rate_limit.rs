use std::time::Instant;

/// Token bucket limiting how fast one connection may push clips.
///
/// Owned by a single session, so no locking. Clips over budget are
/// dropped by the caller; the connection stays open. Disabled unless a
/// positive rate is configured.
#[derive(Debug, Clone)]
pub struct ClipThrottle {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    capacity: f64,
}

impl ClipThrottle {
    /// `rate` clips per second sustained, `capacity` clips of burst.
    pub fn new(rate: f64, capacity: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            rate: rate.max(0.0),
            capacity,
        }
    }

    /// Throttle for the configured limits, or `None` when `rate` is not
    /// positive (unlimited).
    pub fn from_limits(rate: f64, capacity: f64) -> Option<Self> {
        (rate > 0.0).then(|| Self::new(rate, capacity))
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
