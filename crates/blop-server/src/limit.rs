//! Admission control for `WebSocket` upgrades.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps concurrent sessions at `max_connections` (`0` means unlimited).
///
/// A slot is taken before the upgrade is answered and held until the
/// session's loop returns, so concurrent upgrades cannot overshoot the cap.
#[derive(Clone, Debug)]
pub struct ConnectionLimit {
    semaphore: Option<Arc<Semaphore>>,
}

/// One admitted connection; dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionLimit {
    /// Create a limit of `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        let semaphore =
            (max > 0).then(|| Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))));
        Self { semaphore }
    }

    /// Take a slot, or `None` when every slot is in use.
    pub fn try_admit(&self) -> Option<ConnectionSlot> {
        let permit = match &self.semaphore {
            Some(semaphore) => Some(semaphore.clone().try_acquire_owned().ok()?),
            None => None,
        };
        Some(ConnectionSlot { _permit: permit })
    }

    /// Slots currently free, `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unlimited() {
        let limit = ConnectionLimit::new(0);
        let slots: Vec<_> = (0..1000).map(|_| limit.try_admit().unwrap()).collect();
        assert_eq!(slots.len(), 1000);
        assert_eq!(limit.available(), None);
    }

    #[test]
    fn dropping_a_slot_frees_it() {
        let limit = ConnectionLimit::new(1);
        let slot = limit.try_admit().unwrap();
        assert!(limit.try_admit().is_none());
        drop(slot);
        assert!(limit.try_admit().is_some());
        assert_eq!(limit.available(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_the_cap() {
        let limit = ConnectionLimit::new(3);
        let attempts: Vec<_> = (0..64)
            .map(|_| {
                let limit = limit.clone();
                tokio::spawn(async move { limit.try_admit() })
            })
            .collect();

        let mut admitted = Vec::new();
        for attempt in attempts {
            if let Some(slot) = attempt.await.unwrap() {
                admitted.push(slot);
            }
        }
        assert_eq!(admitted.len(), 3);
        assert_eq!(limit.available(), Some(0));
    }
}
