use crate::metadata::Metadata;
use crate::types::{Method, Query};

/// Failure raised by a [`Transport`](crate::transport::Transport) before or while a
/// response body is read.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("response body read failed: {0}")]
    Body(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RiakError {
    /// Connection-level failure. Carries the query that was being dispatched.
    #[error("network error on {method} {path}: {source}")]
    Network {
        method: Method,
        path: String,
        query: Box<Query>,
        #[source]
        source: TransportError,
    },

    /// Status >= 400 on a buffered response. `body` is the raw response text.
    #[error("http request failed with status {status}: {body}")]
    Http {
        status: u16,
        body: String,
        metadata: Box<Metadata>,
    },

    #[error("failed to decode {content_type} body: {message}")]
    Decode {
        content_type: String,
        message: String,
    },

    #[error("sibling resolution failed for {bucket}/{key}: {source}")]
    Resolution {
        bucket: String,
        key: String,
        #[source]
        source: Box<RiakError>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type RiakResult<T> = Result<T, RiakError>;

impl RiakError {
    /// HTTP status carried by the error, looking through resolution wrappers.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Resolution { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    /// Response metadata attached to an HTTP error.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Http { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_reports_status_and_body() {
        let error = RiakError::Http {
            status: 412,
            body: "precondition failed".to_string(),
            metadata: Box::default(),
        };

        assert_eq!(error.status(), Some(412));
        assert!(!error.is_not_found());
        assert_eq!(
            error.to_string(),
            "http request failed with status 412: precondition failed"
        );
    }

    #[test]
    fn resolution_error_exposes_inner_status() {
        let error = RiakError::Resolution {
            bucket: "users".to_string(),
            key: "ada".to_string(),
            source: Box::new(RiakError::Http {
                status: 503,
                body: String::new(),
                metadata: Box::default(),
            }),
        };

        assert_eq!(error.status(), Some(503));
        assert!(error.to_string().starts_with("sibling resolution failed for users/ada"));
    }

    #[test]
    fn network_error_keeps_query() {
        let error = RiakError::Network {
            method: Method::Get,
            path: "/ping".to_string(),
            query: Box::new(Query::new("/ping")),
            source: TransportError::Connect("refused".to_string()),
        };

        assert_eq!(error.status(), None);
        assert_eq!(
            error.to_string(),
            "network error on GET /ping: connection failed: refused"
        );
        let RiakError::Network { query, .. } = error else {
            panic!("expected network error");
        };
        assert_eq!(query.resource, "/ping");
    }
}
