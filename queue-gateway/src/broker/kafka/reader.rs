use std::time::{Duration, Instant};

use bytes::Bytes;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::{Message as _, Offset as KafkaOffset, TopicPartitionList};
use tracing::debug;

use crate::broker::{BrokerError, Message, Offset, QueueName, PARTITION};
use crate::config::KafkaConfig;

#[derive(Debug, Clone)]
pub struct FetchLimits {
    /// Bytes of payload one fetch may accumulate. The first record is always
    /// returned, whatever its size.
    pub max_bytes: usize,
    pub watermark_timeout: Duration,
    /// How long to wait for records the watermarks say exist.
    pub poll_timeout: Duration,
}

/// Oldest offset the brokers still retain for the queue partition.
pub async fn fetch_earliest(
    config: &KafkaConfig,
    seeds: &[String],
    queue: &QueueName,
) -> Result<Offset, BrokerError> {
    if seeds.is_empty() {
        return Err(BrokerError::NoSeeds);
    }
    let client_config = super::client_config(config, &seeds.join(","));
    let topic = queue.to_string();
    let timeout = config.metadata_timeout();

    tokio::task::spawn_blocking(move || -> Result<Offset, BrokerError> {
        let consumer: BaseConsumer = client_config.create()?;
        let (low, _) = consumer.fetch_watermarks(&topic, PARTITION, timeout)?;
        to_offset(low)
    })
    .await?
}

/// Reads records from `start` on, in log order, until the byte budget is spent
/// or the high watermark is reached. An empty batch means nothing lies past `start`.
pub fn fetch_batch(
    consumer: &BaseConsumer,
    topic: &str,
    start: Offset,
    limits: &FetchLimits,
) -> Result<Vec<Message>, BrokerError> {
    let (low, high) = consumer.fetch_watermarks(topic, PARTITION, limits.watermark_timeout)?;
    let (low, high) = (to_offset(low)?, to_offset(high)?);

    // Positions below retention resume from the oldest record
    let start = start.max(low);
    if start >= high {
        debug!(topic, start, high, "nothing to fetch past start");
        return Ok(Vec::new());
    }

    let raw_start = i64::try_from(start).map_err(|_| BrokerError::InvalidOffset(i64::MAX))?;
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic, PARTITION, KafkaOffset::Offset(raw_start))?;
    consumer.assign(&tpl)?;

    let mut budget = ByteBudget::new(limits.max_bytes);
    let mut batch = Vec::new();
    let deadline = Instant::now() + limits.poll_timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let record = match consumer.poll(remaining) {
            None => break,
            Some(record) => record?,
        };

        let payload = record.payload().unwrap_or_default();
        if !budget.take(payload.len()) {
            break;
        }
        let offset = to_offset(record.offset())?;
        batch.push(Message {
            offset,
            payload: Bytes::copy_from_slice(payload),
        });

        if offset + 1 >= high || budget.is_spent() {
            break;
        }
    }

    if batch.is_empty() {
        // Control records and compacted gaps advance the position without
        // yielding a record
        let position = consumer
            .position()?
            .find_partition(topic, PARTITION)
            .map(|elem| elem.offset());
        if reached_end(position, high) {
            debug!(topic, start, high, "only non-data records past start");
            return Ok(batch);
        }
        return Err(BrokerError::FetchTimeout);
    }
    Ok(batch)
}

fn reached_end(position: Option<KafkaOffset>, high: Offset) -> bool {
    match position {
        Some(KafkaOffset::Offset(raw)) => to_offset(raw).is_ok_and(|offset| offset >= high),
        _ => false,
    }
}

fn to_offset(raw: i64) -> Result<Offset, BrokerError> {
    Offset::try_from(raw).map_err(|_| BrokerError::InvalidOffset(raw))
}

struct ByteBudget {
    limit: usize,
    used: usize,
    records: usize,
}

impl ByteBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: 0,
            records: 0,
        }
    }

    /// Accounts for one record, refusing it if it would overflow the budget.
    /// The first record is always accepted.
    fn take(&mut self, len: usize) -> bool {
        if self.records > 0 && self.used.saturating_add(len) > self.limit {
            return false;
        }
        self.used = self.used.saturating_add(len);
        self.records += 1;
        true
    }

    fn is_spent(&self) -> bool {
        self.used >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_always_fits() {
        let mut budget = ByteBudget::new(10);
        assert!(budget.take(50));
        assert!(budget.is_spent());
        assert!(!budget.take(1));
    }

    #[test]
    fn stops_before_overflowing() {
        let mut budget = ByteBudget::new(10);
        assert!(budget.take(4));
        assert!(budget.take(4));
        assert!(!budget.is_spent());
        assert!(!budget.take(4));
        assert!(budget.take(2));
        assert!(budget.is_spent());
    }

    #[test]
    fn position_at_high_watermark_is_the_end() {
        assert!(reached_end(Some(KafkaOffset::Offset(5)), 5));
        assert!(reached_end(Some(KafkaOffset::Offset(6)), 5));
        assert!(!reached_end(Some(KafkaOffset::Offset(4)), 5));
        assert!(!reached_end(Some(KafkaOffset::Invalid), 5));
        assert!(!reached_end(None, 5));
    }

    #[test]
    fn negative_offsets_are_rejected() {
        assert_eq!(to_offset(12).unwrap(), 12);
        assert!(matches!(to_offset(-1), Err(BrokerError::InvalidOffset(-1))));
    }
}
