use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api::GatewayError;
use crate::broker::QueueName;
use crate::gateway::{Consumed, QueueGateway};
use crate::prometheus::report_error;

fn failed(queue: &QueueName, err: GatewayError) -> GatewayError {
    error!(
        queue = %queue,
        kind = err.kind().as_str(),
        stage = err.stage(),
        "request failed: {}",
        err
    );
    report_error(&err);
    err
}

/// Appends the raw request body to the queue.
pub async fn produce(
    State(gateway): State<QueueGateway>,
    Path(queue_name): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<StatusCode, GatewayError> {
    let queue = QueueName::from(queue_name);
    let payload = body.map_err(|rejection| failed(&queue, GatewayError::BodyRead(rejection)))?;

    gateway
        .produce(&queue, payload)
        .await
        .map_err(|err| failed(&queue, err))?;

    Ok(StatusCode::OK)
}

/// Returns the next message of the queue, or 404 when there is none.
pub async fn consume(
    State(gateway): State<QueueGateway>,
    Path(queue_name): Path<String>,
) -> Result<Response, GatewayError> {
    let queue = QueueName::from(queue_name);

    match gateway.consume(&queue).await {
        Ok(Consumed::Message(message)) => Ok((StatusCode::OK, message.payload).into_response()),
        Ok(Consumed::Empty) => Ok(StatusCode::NOT_FOUND.into_response()),
        Err(err) => Err(failed(&queue, err)),
    }
}
