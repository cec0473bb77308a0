use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::error::KafkaError;
use thiserror::Error;

pub mod kafka;
pub mod memory;

/// Every queue is backed by a single-partition log.
pub const PARTITION: i32 = 0;

/// Position of a record in a queue's log. Assigned by the broker, gap-free.
pub type Offset = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for QueueName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for QueueName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical consumer group committed offsets are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity(String);

impl ConsumerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `host:port` of a broker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress(String);

impl BrokerAddress {
    pub fn new(host: &str, port: i32) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BrokerAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: Offset,
    pub payload: Bytes,
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Kafka(#[from] KafkaError),
    #[error("no seed broker configured")]
    NoSeeds,
    #[error("queue {0} does not exist")]
    UnknownQueue(String),
    #[error("metadata for queue {queue} reports an error: {reason}")]
    QueueMetadata { queue: String, reason: String },
    #[error("queue {queue} has no partition {partition}")]
    MissingPartition { queue: String, partition: i32 },
    #[error("partition {partition} of queue {queue} has no leader")]
    NoLeader { queue: String, partition: i32 },
    #[error("leader broker {0} is absent from cluster metadata")]
    UnknownBroker(i32),
    #[error("broker returned invalid offset {0}")]
    InvalidOffset(i64),
    #[error("no record arrived before the fetch timeout")]
    FetchTimeout,
    #[error("broker did not acknowledge the write")]
    ProduceCanceled,
    #[error("leader connection is closed")]
    Closed,
    #[error("broker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Unavailable(String),
}

/// Cluster-wide operations: everything that does not need the partition leader.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Resolves the leader of the queue's partition. Never cached.
    async fn locate_leader(&self, queue: &QueueName) -> Result<BrokerAddress, BrokerError>;

    /// Opens a connection to `leader`, bound to `consumer`. The connection is
    /// released when the returned value is dropped.
    async fn connect(
        &self,
        leader: &BrokerAddress,
        consumer: &ConsumerIdentity,
    ) -> Result<Box<dyn LeaderConnection>, BrokerError>;

    /// Oldest offset still retained for the queue.
    async fn fetch_earliest(&self, queue: &QueueName) -> Result<Offset, BrokerError>;

    /// Appends one record and waits for the broker acknowledgment.
    async fn append(&self, queue: &QueueName, payload: Bytes) -> Result<(), BrokerError>;
}

/// Operations that must run against the partition leader.
#[async_trait]
pub trait LeaderConnection: Send + Sync {
    /// Raw committed position, `None` when nothing was ever committed. The
    /// store's sentinels (zero or negative) are passed through untouched.
    async fn read_committed(&self, queue: &QueueName) -> Result<Option<i64>, BrokerError>;

    /// Records `next_offset` as the next position to read.
    async fn commit(&self, queue: &QueueName, next_offset: Offset) -> Result<(), BrokerError>;

    /// Records from `start` on, in log order. Empty when nothing is past `start`.
    async fn fetch(&self, queue: &QueueName, start: Offset) -> Result<Vec<Message>, BrokerError>;
}
