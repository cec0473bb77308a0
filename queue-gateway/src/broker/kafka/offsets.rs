use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::{Offset as KafkaOffset, TopicPartitionList};

use crate::broker::{BrokerError, Offset, PARTITION};

/// Reads the group's committed position for the queue partition.
pub fn read_committed(
    consumer: &BaseConsumer,
    topic: &str,
    timeout: Duration,
) -> Result<Option<i64>, BrokerError> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, PARTITION);

    let committed = consumer.committed_offsets(tpl, timeout)?;
    Ok(committed
        .find_partition(topic, PARTITION)
        .and_then(|elem| stored_position(elem.offset())))
}

/// Synchronously commits `next_offset`, the first offset not yet consumed.
pub fn commit(
    consumer: &BaseConsumer,
    topic: &str,
    next_offset: Offset,
) -> Result<(), BrokerError> {
    let tpl = commit_list(topic, next_offset)?;
    consumer.commit(&tpl, CommitMode::Sync)?;
    Ok(())
}

fn commit_list(topic: &str, next_offset: Offset) -> Result<TopicPartitionList, BrokerError> {
    let raw = i64::try_from(next_offset).map_err(|_| BrokerError::InvalidOffset(i64::MAX))?;
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic, PARTITION, KafkaOffset::Offset(raw))?;
    Ok(tpl)
}

/// librdkafka reports "nothing committed" as a logical offset rather than an error.
fn stored_position(offset: KafkaOffset) -> Option<i64> {
    match offset {
        KafkaOffset::Offset(raw) => Some(raw),
        _ => None,
    }
}
