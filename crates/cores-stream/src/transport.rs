use crate::config::Credential;
use crate::errors::StreamError;
use crate::reader::ByteStream;
use crate::types::StreamingRequest;

/// Opens the raw byte stream for a structured streaming call.
///
/// [`StreamingClient`](crate::StreamingClient) implements this over
/// HTTP; tests and alternative transports can supply their own.
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync {
    /// Sends `request` and returns the response body as a byte stream.
    ///
    /// Failures to connect or non-success statuses are returned here; failures
    /// while reading surface as `Err` items on the stream.
    async fn open(
        &self,
        request: &StreamingRequest,
        credential: Option<&Credential>,
    ) -> Result<ByteStream, StreamError>;
}
