use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A cloneable wrapper around a [`StreamConsumer`] subscribed to a single topic.
///
/// Payloads are handed back raw - decoding is the caller's business, since only
/// the caller knows what a useful parse failure looks like. Offsets are never
/// auto-stored: each message comes with an [`Offset`] handle the caller stores
/// once whatever that message fed into is durable.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config.set("security.protocol", "ssl").set(
                "enable.ssl.certificate.verification",
                common_config.verify_ssl_certificate.to_string(),
            );
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Receive one message, returning its raw payload and a storable offset handle.
    pub async fn recv(&self) -> Result<(Vec<u8>, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            // Not stored: the next stored offset on this partition covers it
            return Err(RecvErr::Empty);
        };

        Ok((payload.to_vec(), offset))
    }

    /// The positions the group has committed for this topic, for whatever
    /// partitions are currently assigned. Empty before the first rebalance
    /// completes, or for a brand-new group.
    pub fn committed_offsets(
        &self,
        timeout: Duration,
    ) -> Result<Vec<(i32, i64)>, KafkaError> {
        let committed = self.inner.consumer.committed(timeout)?;
        Ok(committed
            .elements_for_topic(&self.inner.topic)
            .iter()
            .filter_map(|elem| match elem.offset().to_raw() {
                // Negative values are librdkafka sentinels for "nothing
                // committed yet" on that partition
                Some(offset) if offset >= 0 => Some((elem.partition(), offset)),
                _ => None,
            })
            .collect())
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn value(&self) -> i64 {
        self.offset
    }
}
