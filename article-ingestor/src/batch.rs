use std::time::Duration;

use tokio::time::Instant;

use crate::types::Article;

/// Flush reasons, recorded so operators can see what is driving batch shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushReason {
    Size,
    Interval,
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Accumulates decoded articles (and the offsets that delivered them) until
/// either the count bound or the age bound is hit, whichever comes first.
///
/// Batch boundaries depend only on arrival order and elapsed time, never on
/// content. The accumulator holds no durability obligation - everything in
/// here is still replayable from the broker, since offsets are only stored
/// after staging succeeds.
///
/// Generic over the offset handle so tests don't need a live consumer.
pub struct BatchAccumulator<O> {
    max_events: usize,
    max_age: Duration,
    opened_at: Instant,
    entries: Vec<(Article, O)>,
}

impl<O> BatchAccumulator<O> {
    pub fn new(max_events: usize, max_age: Duration) -> Self {
        Self {
            max_events,
            max_age,
            opened_at: Instant::now(),
            entries: Vec::with_capacity(max_events),
        }
    }

    pub fn push(&mut self, article: Article, offset: O) {
        if self.entries.is_empty() {
            // The age bound is measured from the first event of the batch
            self.opened_at = Instant::now();
        }
        self.entries.push((article, offset));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.max_events.saturating_sub(self.entries.len())
    }

    /// Why the batch should flush right now, if it should.
    pub fn flush_reason(&self) -> Option<FlushReason> {
        if self.entries.len() >= self.max_events {
            Some(FlushReason::Size)
        } else if !self.entries.is_empty() && self.opened_at.elapsed() >= self.max_age {
            Some(FlushReason::Interval)
        } else {
            None
        }
    }

    /// Take the batch, leaving the accumulator empty for the next one.
    pub fn drain(&mut self) -> (Vec<Article>, Vec<O>) {
        self.entries.drain(..).unzip()
    }
}
