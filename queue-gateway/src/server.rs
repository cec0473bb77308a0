use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use health::{ComponentStatus, HealthRegistry};
use tokio::net::TcpListener;

use crate::broker::kafka::KafkaBroker;
use crate::broker::memory::MemoryBroker;
use crate::broker::{Broker, ConsumerIdentity};
use crate::config::Config;
use crate::gateway::QueueGateway;
use crate::prometheus::setup_metrics_recorder;
use crate::router;

async fn create_broker(
    config: &Config,
    liveness: &HealthRegistry,
) -> anyhow::Result<Arc<dyn Broker>> {
    if config.memory_broker {
        // Memory broker is only used for local debug, don't run a container with it on prod
        liveness
            .register("memory_broker", Duration::from_secs(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok(Arc::new(MemoryBroker::new()))
    } else {
        let producer_liveness = liveness.register("rdkafka", Duration::from_secs(30));
        let broker = KafkaBroker::new(config.kafka.clone(), producer_liveness)
            .await
            .context("failed to start Kafka broker client")?;

        Ok(Arc::new(broker))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");

    let broker = create_broker(&config, &liveness).await?;

    let mut gateway = QueueGateway::new(broker, ConsumerIdentity::new(&config.consumer_group));
    if config.serialize_consumers {
        gateway = gateway.serialized();
    }

    // Installing a global recorder more than once fails, keep it opt-in for tests
    let metrics = match config.export_prometheus {
        true => Some(setup_metrics_recorder().context("failed to install metrics recorder")?),
        false => None,
    };

    tracing::info!(
        "listening on {:?} as consumer {}",
        listener.local_addr()?,
        gateway.consumer()
    );

    let app = router::router(gateway, liveness, metrics);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;

    tracing::info!("HTTP server graceful shutdown completed");
    Ok(())
}
