//! Progress reporting and cooperative cancellation.

use std::time::{Duration, Instant};

/// Receives progress from a running export or import and tells it when to
/// stop.
///
/// Passed by reference into every reader and writer. Implementations use
/// interior mutability: the pipeline only ever holds `&self`.
///
/// `is_cancelled` is polled at least once per entity. Once it returns `true`
/// the operation finishes the entity in hand, closes the archive cleanly and
/// returns its results with `cancelled` set.
pub trait ProgressListener: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// `delta` entities have been processed since the last call.
    fn publish_progress(&self, delta: u64, message: Option<&str>);

    /// Total number of entities expected, as far as is known.
    fn max_pos(&self) -> u64;

    fn set_max_pos(&self, max_pos: u64);
}

/// Ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;
impl ProgressListener for NoProgress {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn publish_progress(&self, _delta: u64, _message: Option<&str>) {}

    fn max_pos(&self) -> u64 {
        0
    }

    fn set_max_pos(&self, _max_pos: u64) {}
}

/// Batches progress so the listener hears about it at most once per
/// interval, however fast entities are processed.
#[derive(Debug)]
pub(crate) struct Throttle {
    interval: Duration,
    last: Instant,
    pending: u64,
}
impl Throttle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self { interval, last: Instant::now(), pending: 0 }
    }

    /// Count one processed entity, publishing if the interval has passed.
    pub(crate) fn tick(&mut self, progress: &dyn ProgressListener, message: Option<&str>) {
        self.pending += 1;
        if self.last.elapsed() >= self.interval {
            self.flush(progress, message);
        }
    }

    /// Publish whatever is pending.
    pub(crate) fn flush(&mut self, progress: &dyn ProgressListener, message: Option<&str>) {
        if self.pending > 0 {
            progress.publish_progress(self.pending, message);
            self.pending = 0;
        }
        self.last = Instant::now();
    }
}

/// Make sure the listener expects at least `total` entities.
pub(crate) fn provision(progress: &dyn ProgressListener, total: u64) {
    if progress.max_pos() < total {
        progress.set_max_pos(total);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingProgress;
    use super::*;

    #[test]
    fn test_throttle_batches_updates() {
        let progress = RecordingProgress::default();
        let mut throttle = Throttle::new(Duration::from_secs(3600));
        for _ in 0..10 {
            throttle.tick(&progress, None);
        }
        assert_eq!(progress.position(), 0);
        throttle.flush(&progress, Some("done"));
        assert_eq!(progress.position(), 10);
        assert_eq!(progress.messages(), vec!["done".to_string()]);
        // Nothing pending: nothing published.
        throttle.flush(&progress, Some("again"));
        assert_eq!(progress.messages().len(), 1);
    }

    #[test]
    fn test_zero_interval_publishes_every_tick() {
        let progress = RecordingProgress::default();
        let mut throttle = Throttle::new(Duration::ZERO);
        throttle.tick(&progress, None);
        throttle.tick(&progress, None);
        assert_eq!(progress.position(), 2);
    }

    #[test]
    fn test_provision_only_raises() {
        let progress = RecordingProgress::default();
        provision(&progress, 10);
        provision(&progress, 5);
        assert_eq!(progress.max_pos(), 10);
    }
}
