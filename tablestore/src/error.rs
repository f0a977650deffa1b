use thiserror::Error;

pub type Result<T, E = TableStoreError> = std::result::Result<T, E>;

/// All errors surfaced by this crate.
///
/// Everything except [`TableStoreError::Server`] is a client-side failure:
/// the request never produced an HTTP status, so [`TableStoreError::http_status`]
/// reports `-1` for those variants.
#[derive(Error, Debug)]
pub enum TableStoreError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("corrupted row: {0}")]
    CorruptedRow(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("no available connection")]
    NoAvailableConnection,
    #[error("response content MD5 mismatch")]
    ResponseDigestMismatch,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A client-side failure surfaced out of a call, annotated with the
    /// call's trace id.
    #[error("client error: {message}")]
    Client {
        message: String,
        trace_id: Option<String>,
    },
    /// The server answered with a parseable error body.
    #[error("server error {code} (http {status}): {message}")]
    Server {
        status: i32,
        code: String,
        message: String,
        request_id: Option<String>,
        trace_id: Option<String>,
    },
}

impl TableStoreError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, TableStoreError::Server { .. })
    }

    /// HTTP status of the failed call, `-1` when the request never reached
    /// the server.
    pub fn http_status(&self) -> i32 {
        match self {
            TableStoreError::Server { status, .. } => *status,
            _ => -1,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            TableStoreError::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            TableStoreError::Server { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            TableStoreError::Server { trace_id, .. } => trace_id.as_deref(),
            TableStoreError::Client { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }

    /// Attaches the call's trace id, collapsing client-side variants into
    /// [`TableStoreError::Client`] on the way out of the request pipeline.
    pub(crate) fn with_trace_id(self, trace_id: &str) -> Self {
        match self {
            TableStoreError::Server {
                status,
                code,
                message,
                request_id,
                ..
            } => TableStoreError::Server {
                status,
                code,
                message,
                request_id,
                trace_id: Some(trace_id.to_string()),
            },
            TableStoreError::Client { message, .. } => TableStoreError::Client {
                message,
                trace_id: Some(trace_id.to_string()),
            },
            other => TableStoreError::Client {
                message: other.to_string(),
                trace_id: Some(trace_id.to_string()),
            },
        }
    }
}
