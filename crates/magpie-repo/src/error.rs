use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the repository layer.
///
/// Cloneable so that every caller coalesced onto one in-flight request
/// observes the same failure. Nothing here is retried; retries, if any,
/// belong to the transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepoError {
    /// Network-level failure: no response was received.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Server replied with a non-success status.
    #[error("http status {status}")]
    Status { status: u16, body: Option<Value> },

    /// Concurrent modification rejected by the server.
    #[error("precondition failed with status {status}")]
    PreconditionFailed { status: u16 },

    /// The request was cancelled by a navigation event.
    #[error("cancelled by navigation")]
    Cancelled,

    /// Response carried no body and none could be recovered.
    #[error("missing response body for {url}")]
    MissingBody { url: String },

    /// Body did not decode into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepoError {
    /// Map a non-success HTTP status, keeping 409/412 distinguishable as
    /// concurrency-precondition rejections.
    pub fn from_status(status: u16, body: Option<Value>) -> Self {
        match status {
            409 | 412 => RepoError::PreconditionFailed { status },
            _ => RepoError::Status { status, body },
        }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        RepoError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_statuses_map_to_precondition() {
        assert_eq!(
            RepoError::from_status(409, None),
            RepoError::PreconditionFailed { status: 409 }
        );
        assert_eq!(
            RepoError::from_status(412, None),
            RepoError::PreconditionFailed { status: 412 }
        );
        assert!(matches!(
            RepoError::from_status(500, None),
            RepoError::Status { status: 500, .. }
        ));
    }
}
