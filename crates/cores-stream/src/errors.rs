/// Failures that end a chunk stream.
///
/// Malformed records never surface here; the reader skips them and counts
/// them in [`ReadSummary`](crate::reader::ReadSummary).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Connection, read, or abort failure of the underlying byte stream.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Streaming endpoint answered with a non-success status.
    #[error("streaming endpoint returned status {status}: {body}")]
    Http { status: u16, body: String },
    /// The byte stream ended before a record carried `is_final: true`.
    #[error("stream ended without a final chunk after {chunks} chunk(s)")]
    EndedWithoutFinal { chunks: u64 },
    /// The caller aborted the stream.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true when the stream was stopped by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(value: std::io::Error) -> Self {
        Self::transport(value.to_string())
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(value: reqwest::Error) -> Self {
        Self::transport(value.to_string())
    }
}

/// Top-level error type for the client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input, rejected before any request is sent.
    #[error("validation error: {0}")]
    Validation(String),
    /// Backend answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    /// The request could not be sent or the response body could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// A streaming call terminated with a failure.
    #[error(transparent)]
    Stream(StreamError),
}

impl From<StreamError> for ClientError {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::Http { status, body } => Self::Http { status, body },
            other => Self::Stream(other),
        }
    }
}
