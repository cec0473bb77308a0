use bytes::Bytes;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, error, info};

use crate::broker::{BrokerError, QueueName, PARTITION};
use crate::config::KafkaConfig;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("queue_gateway_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("queue_gateway_kafka_producer_queue_bytes").set(stats.msg_size as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            counter!(
                "queue_gateway_kafka_broker_tx_errors_total",
                "broker" => id_string.clone()
            )
            .absolute(stats.txerrs);
            counter!(
                "queue_gateway_kafka_broker_rx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.rxerrs);
        }
    }
}

pub fn create_producer(
    config: &KafkaConfig,
    seeds: &[String],
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, BrokerError> {
    let mut client_config = super::client_config(config, &seeds.join(","));
    client_config
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        // Failed appends are reported to the client, never retried
        .set("message.send.max.retries", "0");

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext { liveness })?;

    // "Ping" the brokers by requesting metadata
    match producer
        .client()
        .fetch_metadata(None, config.metadata_timeout())
    {
        Ok(metadata) => info!(
            "connected to Kafka brokers, found {} topics",
            metadata.topics().len()
        ),
        Err(err) => {
            error!("failed to fetch metadata from Kafka brokers: {}", err);
            return Err(err.into());
        }
    }

    Ok(producer)
}

/// Appends `payload` to partition 0 of the queue and waits for the broker ack.
pub async fn append(
    producer: &FutureProducer<KafkaContext>,
    queue: &QueueName,
    payload: Bytes,
) -> Result<(), BrokerError> {
    let record = FutureRecord::<(), [u8]>::to(queue.as_str())
        .payload(payload.as_ref())
        .partition(PARTITION);

    let delivery = producer
        .send_result(record)
        .map_err(|(err, _)| BrokerError::from(err))?;

    match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((err, _))) => Err(err.into()),
        // The delivery future is canceled when the producer gives up on the message
        Err(_) => Err(BrokerError::ProduceCanceled),
    }
}
