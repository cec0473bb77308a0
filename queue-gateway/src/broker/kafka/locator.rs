//! Partition leader discovery.
//!
//! Metadata is requested from one seed at a time, in configuration order, and
//! the first seed that answers wins. Nothing is cached: leadership can move
//! between two requests and the next lookup will see it.

use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::metadata::Metadata;
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, warn};

use crate::broker::{BrokerAddress, BrokerError, QueueName, PARTITION};
use crate::config::KafkaConfig;

/// Client-independent view of a metadata response.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

#[derive(Debug, Clone)]
pub struct BrokerMetadata {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub error: Option<RDKafkaErrorCode>,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, Copy)]
pub struct PartitionMetadata {
    pub id: i32,
    /// Broker id of the leader, -1 while an election is in progress
    pub leader: i32,
}

impl From<&Metadata> for ClusterMetadata {
    fn from(metadata: &Metadata) -> Self {
        Self {
            brokers: metadata
                .brokers()
                .iter()
                .map(|broker| BrokerMetadata {
                    id: broker.id(),
                    host: broker.host().to_owned(),
                    port: broker.port(),
                })
                .collect(),
            topics: metadata
                .topics()
                .iter()
                .map(|topic| TopicMetadata {
                    name: topic.name().to_owned(),
                    error: topic.error().map(RDKafkaErrorCode::from),
                    partitions: topic
                        .partitions()
                        .iter()
                        .map(|partition| PartitionMetadata {
                            id: partition.id(),
                            leader: partition.leader(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Picks the leader of the queue's partition out of a metadata snapshot.
pub fn resolve_leader(
    metadata: &ClusterMetadata,
    queue: &QueueName,
) -> Result<BrokerAddress, BrokerError> {
    let topic = metadata
        .topics
        .iter()
        .find(|topic| topic.name == queue.as_str())
        .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

    match topic.error {
        None => {}
        Some(RDKafkaErrorCode::UnknownTopicOrPartition) => {
            return Err(BrokerError::UnknownQueue(queue.to_string()))
        }
        Some(code) => {
            return Err(BrokerError::QueueMetadata {
                queue: queue.to_string(),
                reason: code.to_string(),
            })
        }
    }

    let partition = topic
        .partitions
        .iter()
        .find(|partition| partition.id == PARTITION)
        .ok_or_else(|| BrokerError::MissingPartition {
            queue: queue.to_string(),
            partition: PARTITION,
        })?;

    if partition.leader < 0 {
        return Err(BrokerError::NoLeader {
            queue: queue.to_string(),
            partition: PARTITION,
        });
    }

    metadata
        .brokers
        .iter()
        .find(|broker| broker.id == partition.leader)
        .map(|broker| BrokerAddress::new(&broker.host, broker.port))
        .ok_or(BrokerError::UnknownBroker(partition.leader))
}

pub async fn locate_leader(
    config: &KafkaConfig,
    seeds: &[String],
    queue: &QueueName,
) -> Result<BrokerAddress, BrokerError> {
    let mut last_error = BrokerError::NoSeeds;
    for seed in seeds {
        match fetch_metadata(config, seed, queue).await {
            Ok(metadata) => {
                let leader = resolve_leader(&metadata, queue)?;
                debug!(seed = %seed, %leader, "resolved partition leader");
                return Ok(leader);
            }
            Err(err) => {
                warn!(
                    seed = %seed,
                    error = %err,
                    "seed broker did not answer the metadata request"
                );
                last_error = err;
            }
        }
    }
    Err(last_error)
}

async fn fetch_metadata(
    config: &KafkaConfig,
    seed: &str,
    queue: &QueueName,
) -> Result<ClusterMetadata, BrokerError> {
    let mut client_config = super::client_config(config, seed);
    client_config.set("allow.auto.create.topics", "false");
    let topic = queue.to_string();
    let timeout = config.metadata_timeout();

    tokio::task::spawn_blocking(move || -> Result<ClusterMetadata, BrokerError> {
        // Dropped on return, closing the connection to the seed
        let consumer: BaseConsumer = client_config.create()?;
        let metadata = consumer.fetch_metadata(Some(&topic), timeout)?;
        Ok(ClusterMetadata::from(&metadata))
    })
    .await?
}
