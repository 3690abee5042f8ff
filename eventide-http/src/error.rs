use hyper::StatusCode;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Failure while processing a request through the pipeline.
#[derive(Debug)]
pub struct Error {
    pub(crate) kind: ErrorType,
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Whether re-sending the request may succeed.
    ///
    /// Network failures, timeouts and server errors are transient; everything
    /// else is deterministic and will fail again.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match &self.kind {
            ErrorType::ChunkingResponse | ErrorType::Network | ErrorType::RequestTimedOut => true,
            ErrorType::Response { status, .. } => {
                status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT
            }
            _ => false,
        }
    }

    pub(crate) fn building(source: hyper::http::Error) -> Self {
        Self {
            kind: ErrorType::BuildingRequest,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn buffer_overflow() -> Self {
        Self {
            kind: ErrorType::BufferOverflow,
            source: None,
        }
    }

    pub(crate) fn chunking(source: hyper::Error) -> Self {
        Self {
            kind: ErrorType::ChunkingResponse,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn creating_header(name: &str, source: hyper::header::InvalidHeaderValue) -> Self {
        Self {
            kind: ErrorType::CreatingHeader {
                name: name.to_owned(),
            },
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn json(source: serde_json::Error) -> Self {
        Self {
            kind: ErrorType::Json,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn network(source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: ErrorType::Network,
            source: Some(source),
        }
    }

    pub(crate) fn parsing(body: Vec<u8>, source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: ErrorType::Parsing { body },
            source: Some(source),
        }
    }

    pub(crate) fn pipeline_shutdown() -> Self {
        Self {
            kind: ErrorType::PipelineShutdown,
            source: None,
        }
    }

    pub(crate) fn response(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            kind: ErrorType::Response { body, status },
            source: None,
        }
    }

    pub(crate) fn timed_out() -> Self {
        Self {
            kind: ErrorType::RequestTimedOut,
            source: None,
        }
    }

    pub(crate) fn unauthorized() -> Self {
        Self {
            kind: ErrorType::Unauthorized,
            source: None,
        }
    }

    pub(crate) fn unexpected_empty(source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: ErrorType::UnexpectedEmpty,
            source: Some(source),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BufferOverflow => {
                f.write_str("ingress buffer was full and the overflow policy rejected the request")
            }
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::ChunkingResponse => f.write_str("chunking the response failed"),
            ErrorType::CreatingHeader { name } => {
                f.write_str("header value for '")?;
                f.write_str(name)?;

                f.write_str("' is invalid")
            }
            ErrorType::Json => f.write_str("given value couldn't be serialized"),
            ErrorType::Network => f.write_str("sending the request failed"),
            ErrorType::Parsing { .. } => f.write_str("response body couldn't be deserialized"),
            ErrorType::PipelineShutdown => f.write_str("the pipeline has shut down"),
            ErrorType::RequestTimedOut => f.write_str("request timed out"),
            ErrorType::Response { status, .. } => {
                write!(f, "response error: status code {status}")
            }
            ErrorType::Unauthorized => {
                f.write_str("token in use is invalid, expired, or is revoked")
            }
            ErrorType::UnexpectedEmpty => {
                f.write_str("response body was empty where data was expected")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Ingress buffer was full and the overflow policy rejected the request.
    BufferOverflow,
    /// Assembling the outgoing HTTP request failed.
    BuildingRequest,
    /// Reading the response body failed.
    ChunkingResponse,
    /// A header value could not be constructed.
    CreatingHeader {
        /// Name of the header.
        name: String,
    },
    /// A request body could not be serialized.
    Json,
    /// Connection, DNS or TLS failure while sending the request.
    Network,
    /// Response body could not be deserialized.
    Parsing {
        /// Raw bytes of the body.
        body: Vec<u8>,
    },
    /// The pipeline shut down while the request was pending.
    PipelineShutdown,
    /// The HTTP send exceeded its timeout.
    RequestTimedOut,
    /// Non-success status outside of the ratelimit handling.
    Response {
        /// Raw bytes of the body.
        body: Vec<u8>,
        /// Status code of the response.
        status: StatusCode,
    },
    /// Token in use has become revoked or is otherwise invalid.
    Unauthorized,
    /// The response had no content although the request expected some.
    UnexpectedEmpty,
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorType};
    use hyper::StatusCode;
    use static_assertions::assert_impl_all;
    use std::{error::Error as StdError, fmt::Debug};

    assert_impl_all!(Error: Debug, Send, StdError, Sync);
    assert_impl_all!(ErrorType: Debug, Send, Sync);

    #[test]
    fn transient_failures_are_retryable() {
        assert!(Error::timed_out().retryable());
        assert!(Error::network("connection reset".into()).retryable());
        assert!(Error::response(StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).retryable());
        assert!(Error::response(StatusCode::BAD_GATEWAY, Vec::new()).retryable());
        assert!(Error::response(StatusCode::REQUEST_TIMEOUT, Vec::new()).retryable());
    }

    #[test]
    fn deterministic_failures_are_not_retryable() {
        assert!(!Error::response(StatusCode::NOT_FOUND, Vec::new()).retryable());
        assert!(!Error::response(StatusCode::FORBIDDEN, Vec::new()).retryable());
        assert!(!Error::buffer_overflow().retryable());
        assert!(!Error::parsing(Vec::new(), "bad json".into()).retryable());
        assert!(!Error::unexpected_empty("empty".into()).retryable());
        assert!(!Error::pipeline_shutdown().retryable());
        assert!(!Error::unauthorized().retryable());
    }
}
