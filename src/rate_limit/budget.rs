use super::RateKey;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in for offsets too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Earliest permissible dispatch time for one rate-limit key.
///
/// The next-allowed instant is kept as nanoseconds since the budget's epoch
/// in an `AtomicU64`, so reservations from concurrent callers serialize
/// through compare-and-set and never land closer than `spacing` apart.
#[derive(Debug)]
pub struct RateBudget {
    key: RateKey,
    epoch: Instant,
    spacing: Duration,
    next_allowed: AtomicU64,
}

impl RateBudget {
    pub fn new(key: RateKey, spacing: Duration) -> Self {
        Self {
            key,
            epoch: Instant::now(),
            spacing,
            next_allowed: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &RateKey {
        &self.key
    }

    fn to_offset(&self, instant: Instant) -> u64 {
        instant
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .min(u64::MAX as u128) as u64
    }

    fn to_instant(&self, offset: u64) -> Instant {
        let offset = Duration::from_nanos(offset);
        self.epoch
            .checked_add(offset)
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE)
    }

    fn spacing_nanos(&self) -> u64 {
        self.spacing.as_nanos().min(u64::MAX as u128) as u64
    }

    /// Claims the next free slot and returns when it opens.
    pub fn reserve(&self) -> Instant {
        let spacing = self.spacing_nanos();
        let mut current = self.next_allowed.load(Ordering::Acquire);
        loop {
            let now = self.to_offset(Instant::now());
            let slot = current.max(now);
            let next = slot.saturating_add(spacing);
            match self.next_allowed.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.to_instant(slot),
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserves a slot and waits for it. Returns the dispatch instant, or
    /// `None` if cancelled first.
    pub async fn acquire(&self, token: &CancellationToken) -> Option<Instant> {
        let slot = self.reserve();
        if slot > Instant::now() {
            debug!(
                "Rate limiting {}: waiting {:?}",
                self.key,
                slot - Instant::now()
            );
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            _ = tokio::time::sleep_until(slot) => Some(self.mark_dispatched()),
        }
    }

    /// Anchors the next slot to the actual dispatch time, so a late wakeup
    /// never shortens the gap to the following request.
    pub(crate) fn mark_dispatched(&self) -> Instant {
        let now = Instant::now();
        let next = self.to_offset(now).saturating_add(self.spacing_nanos());
        self.next_allowed.fetch_max(next, Ordering::AcqRel);
        now
    }

    /// Pushes the next allowed time out to at least `hint` from now.
    pub fn defer_for(&self, hint: Duration) {
        let hint_nanos = hint.as_nanos().min(u64::MAX as u128) as u64;
        let offset = self.to_offset(Instant::now()).saturating_add(hint_nanos);
        let previous = self.next_allowed.fetch_max(offset, Ordering::AcqRel);
        if offset > previous {
            debug!("Rate budget {} deferred by server hint for {:?}", self.key, hint);
        }
    }

    pub fn next_allowed(&self) -> Instant {
        self.to_instant(self.next_allowed.load(Ordering::Acquire))
    }
}
