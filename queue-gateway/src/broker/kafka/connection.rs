use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::BaseConsumer;
use tracing::debug;

use super::offsets;
use super::reader::{self, FetchLimits};
use crate::broker::{
    BrokerAddress, BrokerError, ConsumerIdentity, LeaderConnection, Message, Offset, QueueName,
};
use crate::config::KafkaConfig;

/// A consumer client bootstrapped against the partition leader and bound to
/// one consumer group. Owned by a single request and closed when dropped.
pub struct KafkaLeader {
    consumer: Option<Arc<BaseConsumer>>,
    leader: BrokerAddress,
    request_timeout: Duration,
    limits: FetchLimits,
}

impl KafkaLeader {
    pub fn open(
        config: &KafkaConfig,
        leader: &BrokerAddress,
        identity: &ConsumerIdentity,
    ) -> Result<Self, BrokerError> {
        let mut client_config = super::client_config(config, leader.as_str());
        client_config
            .set("group.id", identity.as_str())
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set(
                "max.partition.fetch.bytes",
                config.kafka_fetch_max_bytes.to_string(),
            );

        let consumer: BaseConsumer = client_config.create()?;
        debug!(%leader, consumer = %identity, "opened leader connection");

        Ok(Self {
            consumer: Some(Arc::new(consumer)),
            leader: leader.clone(),
            request_timeout: config.metadata_timeout(),
            limits: FetchLimits {
                max_bytes: usize::try_from(config.kafka_fetch_max_bytes).unwrap_or(usize::MAX),
                watermark_timeout: config.metadata_timeout(),
                poll_timeout: config.fetch_timeout(),
            },
        })
    }

    /// Runs a blocking librdkafka call off the async runtime.
    async fn run<T, F>(&self, call: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(&BaseConsumer) -> Result<T, BrokerError> + Send + 'static,
    {
        let consumer = self.consumer.clone().ok_or(BrokerError::Closed)?;
        tokio::task::spawn_blocking(move || call(consumer.as_ref())).await?
    }
}

impl Drop for KafkaLeader {
    fn drop(&mut self) {
        let Some(consumer) = self.consumer.take() else {
            return;
        };
        debug!(leader = %self.leader, "closing leader connection");

        // Closing a consumer waits for librdkafka to tear down its threads
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn_blocking(move || drop(consumer))),
            Err(_) => drop(consumer),
        }
    }
}

#[async_trait]
impl LeaderConnection for KafkaLeader {
    async fn read_committed(&self, queue: &QueueName) -> Result<Option<i64>, BrokerError> {
        let topic = queue.to_string();
        let timeout = self.request_timeout;
        self.run(move |consumer| offsets::read_committed(consumer, &topic, timeout))
            .await
    }

    async fn commit(&self, queue: &QueueName, next_offset: Offset) -> Result<(), BrokerError> {
        let topic = queue.to_string();
        self.run(move |consumer| offsets::commit(consumer, &topic, next_offset))
            .await
    }

    async fn fetch(&self, queue: &QueueName, start: Offset) -> Result<Vec<Message>, BrokerError> {
        let topic = queue.to_string();
        let limits = self.limits.clone();
        self.run(move |consumer| reader::fetch_batch(consumer, &topic, start, &limits))
            .await
    }
}
