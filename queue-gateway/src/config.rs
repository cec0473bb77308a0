use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub memory_broker: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Logical consumer under which committed offsets are stored
    #[envconfig(default = "queue-gateway")]
    pub consumer_group: String,

    // Serialize read-offset -> fetch -> commit per queue. Off by default: the gateway
    // assumes a single active consumer per queue.
    #[envconfig(default = "false")]
    pub serialize_consumers: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "queue-gateway")]
    pub otel_service_name: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String, // Comma-separated seed brokers

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "0")]
    pub kafka_producer_linger_ms: u32, // Every POST is its own produce request

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10000")]
    pub kafka_fetch_max_bytes: u32,

    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub kafka_fetch_timeout_ms: u64,
}

impl KafkaConfig {
    /// Seed addresses, in the order they should be tried.
    pub fn seeds(&self) -> Vec<String> {
        self.kafka_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_metadata_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn kafka_config(hosts: &str) -> KafkaConfig {
        let env = HashMap::from([("KAFKA_HOSTS".to_string(), hosts.to_string())]);
        KafkaConfig::init_from_hashmap(&env).expect("valid kafka config")
    }

    #[test]
    fn seeds_are_split_and_trimmed() {
        let config = kafka_config("kafka-1:9092, kafka-2:9092,,kafka-3:9092 ");
        assert_eq!(
            config.seeds(),
            vec!["kafka-1:9092", "kafka-2:9092", "kafka-3:9092"]
        );
    }

    #[test]
    fn blank_hosts_yield_no_seeds() {
        assert!(kafka_config(" , ").seeds().is_empty());
    }

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).expect("defaults are valid");
        assert_eq!(config.consumer_group, "queue-gateway");
        assert!(!config.serialize_consumers);
        assert!(!config.memory_broker);
        assert_eq!(config.kafka.seeds(), vec!["localhost:9092"]);
        assert_eq!(config.kafka.kafka_fetch_max_bytes, 10000);
        assert_eq!(config.kafka.fetch_timeout(), Duration::from_secs(5));
    }
}
