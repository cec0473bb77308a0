use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::broker::BrokerError;

/// Human-readable labels for the step a request failed at. They appear in the
/// `error <stage>: <cause>` response body.
pub mod stage {
    pub const LOCATE_LEADER: &str = "locating leader";
    pub const CONNECT_LEADER: &str = "connecting to leader";
    pub const READ_COMMITTED: &str = "reading committed offset";
    pub const FETCH_EARLIEST: &str = "fetching earliest offset";
    pub const FETCH_MESSAGES: &str = "fetching messages";
    pub const COMMIT_OFFSET: &str = "committing offset";
    pub const APPEND_MESSAGE: &str = "appending message";
    pub const READ_BODY: &str = "reading message";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    OffsetStore,
    Fetch,
    Append,
    BodyRead,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::OffsetStore => "offset_store",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Append => "append",
            ErrorKind::BodyRead => "body_read",
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("error {stage}: {source}")]
    Discovery {
        stage: &'static str,
        source: BrokerError,
    },
    #[error("error {stage}: {source}")]
    OffsetStore {
        stage: &'static str,
        source: BrokerError,
    },
    #[error("error {stage}: {source}")]
    Fetch {
        stage: &'static str,
        source: BrokerError,
    },
    #[error("error {}: {0}", stage::APPEND_MESSAGE)]
    Append(#[source] BrokerError),
    #[error("error {}: {0}", stage::READ_BODY)]
    BodyRead(#[source] BytesRejection),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Discovery { .. } => ErrorKind::Discovery,
            GatewayError::OffsetStore { .. } => ErrorKind::OffsetStore,
            GatewayError::Fetch { .. } => ErrorKind::Fetch,
            GatewayError::Append(_) => ErrorKind::Append,
            GatewayError::BodyRead(_) => ErrorKind::BodyRead,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            GatewayError::Discovery { stage, .. }
            | GatewayError::OffsetStore { stage, .. }
            | GatewayError::Fetch { stage, .. } => *stage,
            GatewayError::Append(_) => stage::APPEND_MESSAGE,
            GatewayError::BodyRead(_) => stage::READ_BODY,
        }
    }
}

impl IntoResponse for GatewayError {
    /// Every kind maps to a 500; the kind only shows in logs and metrics.
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, Bytes};
    use axum::extract::FromRequest;
    use axum::http::Request;

    use super::*;

    /// Anything past axum's default 2MB limit is rejected while buffering.
    async fn oversized_body() -> BytesRejection {
        let request = Request::new(Body::from(vec![0u8; 3 * 1024 * 1024]));
        Bytes::from_request(request, &())
            .await
            .expect_err("body over the limit must be rejected")
    }

    #[test]
    fn message_carries_stage_and_cause() {
        let err = GatewayError::Discovery {
            stage: stage::LOCATE_LEADER,
            source: BrokerError::UnknownQueue("nope".to_string()),
        };
        assert_eq!(err.to_string(), "error locating leader: queue nope does not exist");
        assert_eq!(err.kind(), ErrorKind::Discovery);
        assert_eq!(err.stage(), stage::LOCATE_LEADER);

        let err = GatewayError::Append(BrokerError::ProduceCanceled);
        assert_eq!(
            err.to_string(),
            "error appending message: broker did not acknowledge the write"
        );
        assert_eq!(err.kind().as_str(), "append");
    }

    #[tokio::test]
    async fn unreadable_body_reports_its_stage() {
        let err = GatewayError::BodyRead(oversized_body().await);
        assert_eq!(err.kind(), ErrorKind::BodyRead);
        assert_eq!(err.kind().as_str(), "body_read");
        assert_eq!(err.stage(), stage::READ_BODY);
        assert!(err.to_string().starts_with("error reading message: "));
    }

    #[tokio::test]
    async fn every_kind_is_a_server_error() {
        let errors = [
            GatewayError::Discovery {
                stage: stage::LOCATE_LEADER,
                source: BrokerError::NoSeeds,
            },
            GatewayError::OffsetStore {
                stage: stage::COMMIT_OFFSET,
                source: BrokerError::Closed,
            },
            GatewayError::Fetch {
                stage: stage::FETCH_MESSAGES,
                source: BrokerError::FetchTimeout,
            },
            GatewayError::Append(BrokerError::NoSeeds),
            GatewayError::BodyRead(oversized_body().await),
        ];
        for err in errors {
            assert_eq!(
                err.into_response().status(),
                StatusCode::INTERNAL_SERVER_ERROR
            );
        }
    }
}
