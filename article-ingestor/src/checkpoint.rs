use std::collections::HashMap;
use std::time::Duration;

use common_kafka::kafka_consumer::{Offset, SingleTopicConsumer};
use tracing::warn;

use crate::errors::CheckpointError;
use crate::metrics_consts::{CHECKPOINT_ADVANCES, CHECKPOINT_SKIPPED};

/// Tracks how far the stream has been durably processed.
///
/// Positions live in the broker's consumer-group offset store: offsets are
/// handed to it only after the rows they delivered are confirmed staged, and
/// the client's committer thread persists stored offsets in the background.
/// A crash between staging success and commit replays the batch on restart;
/// fingerprinting plus reconciliation make that replay invisible downstream.
pub struct ProgressTracker {
    consumer: SingleTopicConsumer,
    high_water: HashMap<i32, i64>,
}

impl ProgressTracker {
    pub fn new(consumer: SingleTopicConsumer) -> Self {
        Self {
            consumer,
            high_water: HashMap::new(),
        }
    }

    /// The committed resume point, read once at startup for visibility. The
    /// subscription itself resumes from these positions; an empty result
    /// means start-of-stream (per the configured offset reset policy).
    pub fn load(&self) -> Vec<(i32, i64)> {
        match self.consumer.committed_offsets(Duration::from_secs(10)) {
            Ok(positions) => positions,
            Err(e) => {
                warn!("could not read committed offsets: {}", e);
                Vec::new()
            }
        }
    }

    /// Store the greatest offset per partition from a staged batch, skipping
    /// anything at or below a mark already stored this session. Must only be
    /// called once the batch that carried these offsets is durable.
    pub fn advance(&mut self, offsets: Vec<Offset>) -> Result<usize, CheckpointError> {
        let mut plan = plan_advance(
            &self.high_water,
            offsets.iter().map(|o| (o.partition(), o.value())),
        );
        let skipped = offsets.len();

        let mut stored = 0;
        for offset in offsets {
            let partition = offset.partition();
            let value = offset.value();
            if plan.get(&partition) != Some(&value) {
                continue;
            }
            offset.store()?;
            plan.remove(&partition);
            self.high_water.insert(partition, value);
            stored += 1;
        }

        metrics::counter!(CHECKPOINT_ADVANCES).increment(stored as u64);
        metrics::counter!(CHECKPOINT_SKIPPED).increment((skipped - stored) as u64);
        Ok(stored)
    }
}

/// Which positions actually move the high-water marks forward: the max per
/// partition among the candidates, minus anything not strictly greater than
/// what was already stored.
fn plan_advance(
    high_water: &HashMap<i32, i64>,
    candidates: impl Iterator<Item = (i32, i64)>,
) -> HashMap<i32, i64> {
    let mut plan: HashMap<i32, i64> = HashMap::new();
    for (partition, value) in candidates {
        if high_water.get(&partition).is_some_and(|mark| *mark >= value) {
            continue;
        }
        let entry = plan.entry(partition).or_insert(value);
        if *entry < value {
            *entry = value;
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::plan_advance;
    use std::collections::HashMap;

    #[test]
    fn keeps_only_the_max_per_partition() {
        let plan = plan_advance(
            &HashMap::new(),
            [(0, 5), (0, 9), (0, 7), (1, 2)].into_iter(),
        );
        assert_eq!(plan, HashMap::from([(0, 9), (1, 2)]));
    }

    #[test]
    fn skips_positions_behind_the_high_water_mark() {
        let marks = HashMap::from([(0, 10), (1, 3)]);

        // A replayed batch entirely behind the marks plans nothing
        let plan = plan_advance(&marks, [(0, 8), (0, 10), (1, 3)].into_iter());
        assert!(plan.is_empty());

        // Forward progress on one partition still goes through
        let plan = plan_advance(&marks, [(0, 9), (1, 4)].into_iter());
        assert_eq!(plan, HashMap::from([(1, 4)]));
    }

    #[test]
    fn partitions_advance_independently() {
        let marks = HashMap::from([(0, 10)]);
        let plan = plan_advance(&marks, [(0, 11), (2, 0)].into_iter());
        assert_eq!(plan, HashMap::from([(0, 11), (2, 0)]));
    }
}
