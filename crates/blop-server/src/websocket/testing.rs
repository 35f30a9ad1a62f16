//! In-memory sinks for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::frame::{Frame, FrameSink};
use crate::errors::TransportError;

/// Observes what a [`MockSink`] was asked to do.
#[derive(Clone, Default)]
pub(crate) struct SinkTap {
    sent: Arc<Mutex<Vec<Frame>>>,
    attempts: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl SinkTap {
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Sink that records frames, optionally stalling or failing each write.
pub(crate) struct MockSink {
    tap: SinkTap,
    delay: Duration,
    fail: bool,
}

impl MockSink {
    pub(crate) fn new() -> (Self, SinkTap) {
        Self::build(Duration::ZERO, false)
    }

    pub(crate) fn with_delay(delay: Duration) -> (Self, SinkTap) {
        Self::build(delay, false)
    }

    pub(crate) fn failing() -> (Self, SinkTap) {
        Self::build(Duration::ZERO, true)
    }

    fn build(delay: Duration, fail: bool) -> (Self, SinkTap) {
        let tap = SinkTap::default();
        (
            Self {
                tap: tap.clone(),
                delay,
                fail,
            },
            tap,
        )
    }
}

/// Decrements the in-flight counter even when the write future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let _ = self.tap.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.tap.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.tap.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.tap.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(TransportError::Socket("broken pipe".into()));
        }
        self.tap.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tap.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
