use async_trait::async_trait;
use bytes::Bytes;
use health::HealthHandle;
use rdkafka::producer::FutureProducer;
use rdkafka::ClientConfig;
use tracing::info;

use crate::broker::{
    Broker, BrokerAddress, BrokerError, ConsumerIdentity, LeaderConnection, Offset, QueueName,
};
use crate::config::KafkaConfig;

mod connection;
pub mod locator;
mod offsets;
mod reader;
mod writer;

use connection::KafkaLeader;
use writer::KafkaContext;

/// rdkafka-backed broker. Only the producer is long-lived: metadata lookups,
/// offset reads and fetches each go through a client created for the call.
pub struct KafkaBroker {
    config: KafkaConfig,
    seeds: Vec<String>,
    producer: FutureProducer<KafkaContext>,
}

impl KafkaBroker {
    pub async fn new(config: KafkaConfig, liveness: HealthHandle) -> Result<Self, BrokerError> {
        let seeds = config.seeds();
        if seeds.is_empty() {
            return Err(BrokerError::NoSeeds);
        }

        info!("connecting to Kafka brokers at {}...", seeds.join(","));
        let producer = writer::create_producer(&config, &seeds, liveness)?;

        Ok(Self {
            config,
            seeds,
            producer,
        })
    }
}

/// Settings shared by every client the gateway creates.
fn client_config(config: &KafkaConfig, bootstrap: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", bootstrap);

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn locate_leader(&self, queue: &QueueName) -> Result<BrokerAddress, BrokerError> {
        locator::locate_leader(&self.config, &self.seeds, queue).await
    }

    async fn connect(
        &self,
        leader: &BrokerAddress,
        consumer: &ConsumerIdentity,
    ) -> Result<Box<dyn LeaderConnection>, BrokerError> {
        let connection = KafkaLeader::open(&self.config, leader, consumer)?;
        Ok(Box::new(connection))
    }

    async fn fetch_earliest(&self, queue: &QueueName) -> Result<Offset, BrokerError> {
        reader::fetch_earliest(&self.config, &self.seeds, queue).await
    }

    async fn append(&self, queue: &QueueName, payload: Bytes) -> Result<(), BrokerError> {
        writer::append(&self.producer, queue, payload).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;

    use super::KafkaBroker;
    use crate::broker::{Broker, QueueName};
    use crate::config::KafkaConfig;

    pub fn config(hosts: &str) -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: hosts.to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 0,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_fetch_max_bytes: 10000,
            kafka_metadata_timeout_ms: 5000,
            kafka_fetch_timeout_ms: 5000,
        }
    }

    pub async fn start_on_mocked_broker(
    ) -> (MockCluster<'static, DefaultProducerContext>, KafkaBroker) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka", Duration::from_secs(30));
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let broker = KafkaBroker::new(config(&cluster.bootstrap_servers()), handle)
            .await
            .expect("failed to create broker");
        (cluster, broker)
    }

    /// The first appends can fail while the mock cluster creates the topic.
    pub async fn append_until_acked(broker: &KafkaBroker, queue: &QueueName, payload: Bytes) {
        for _ in 0..20 {
            if broker.append(queue, payload.clone()).await.is_ok() {
                return;
            }
        }
        panic!("mock cluster never acknowledged the append");
    }
}
