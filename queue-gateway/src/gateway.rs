use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::api::{stage, GatewayError};
use crate::broker::{Broker, ConsumerIdentity, Message, Offset, QueueName};
use crate::locks::QueueLocks;
use crate::prometheus::{report_consumed, report_empty_read, report_produced};

/// Outcome of a successful consume.
#[derive(Debug, PartialEq, Eq)]
pub enum Consumed {
    Message(Message),
    /// Nothing past the committed position. No offset was written.
    Empty,
}

#[derive(Clone)]
pub struct QueueGateway {
    broker: Arc<dyn Broker>,
    consumer: ConsumerIdentity,
    locks: Option<Arc<QueueLocks>>,
}

impl QueueGateway {
    pub fn new(broker: Arc<dyn Broker>, consumer: ConsumerIdentity) -> Self {
        Self {
            broker,
            consumer,
            locks: None,
        }
    }

    /// Serializes consumes of the same queue within this process.
    pub fn serialized(mut self) -> Self {
        self.locks = Some(Arc::new(QueueLocks::new()));
        self
    }

    pub fn consumer(&self) -> &ConsumerIdentity {
        &self.consumer
    }

    #[instrument(skip_all, fields(queue = %queue, size = payload.len()))]
    pub async fn produce(&self, queue: &QueueName, payload: Bytes) -> Result<(), GatewayError> {
        self.broker
            .append(queue, payload)
            .await
            .map_err(GatewayError::Append)?;

        debug!("message appended");
        report_produced();
        Ok(())
    }

    /// Delivers the next message of `queue` for this gateway's consumer and
    /// advances the committed offset past it.
    ///
    /// The commit is written before returning, so a failed commit is reported
    /// and the same message is delivered again by the next call. The leader
    /// connection is dropped on every return path.
    #[instrument(skip_all, fields(queue = %queue, consumer = %self.consumer))]
    pub async fn consume(&self, queue: &QueueName) -> Result<Consumed, GatewayError> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(queue).await),
            None => None,
        };

        let leader = self
            .broker
            .locate_leader(queue)
            .await
            .map_err(|source| GatewayError::Discovery {
                stage: stage::LOCATE_LEADER,
                source,
            })?;
        debug!(%leader, "located partition leader");

        let connection = self
            .broker
            .connect(&leader, &self.consumer)
            .await
            .map_err(|source| GatewayError::Discovery {
                stage: stage::CONNECT_LEADER,
                source,
            })?;

        let committed = connection.read_committed(queue).await.map_err(|source| {
            GatewayError::OffsetStore {
                stage: stage::READ_COMMITTED,
                source,
            }
        })?;

        let start = match resume_position(committed) {
            Some(offset) => {
                debug!(offset, "resuming from committed offset");
                offset
            }
            None => {
                let earliest = self.broker.fetch_earliest(queue).await.map_err(|source| {
                    GatewayError::Fetch {
                        stage: stage::FETCH_EARLIEST,
                        source,
                    }
                })?;
                debug!(?committed, earliest, "no usable committed offset, starting from earliest");
                earliest
            }
        };

        let batch = connection
            .fetch(queue, start)
            .await
            .map_err(|source| GatewayError::Fetch {
                stage: stage::FETCH_MESSAGES,
                source,
            })?;

        let Some(message) = batch.into_iter().next() else {
            debug!(start, "queue is empty");
            report_empty_read();
            return Ok(Consumed::Empty);
        };

        connection
            .commit(queue, message.offset + 1)
            .await
            .map_err(|source| GatewayError::OffsetStore {
                stage: stage::COMMIT_OFFSET,
                source,
            })?;
        debug!(offset = message.offset, "delivered and committed");

        report_consumed();
        Ok(Consumed::Message(message))
    }
}

/// Stored positions at or below zero are store sentinels and count as absent.
fn resume_position(committed: Option<i64>) -> Option<Offset> {
    committed
        .filter(|raw| *raw > 0)
        .and_then(|raw| Offset::try_from(raw).ok())
}
