//! Chunked event reader and typed HTTP client for the CoresAI backends.
//!
//! The streaming backend answers structured requests with newline-delimited
//! `data: <JSON>` records. [`reader`] turns such a byte stream into
//! [`Chunk`]s; [`StreamingClient`] issues the HTTP calls and feeds the body
//! into the reader.
//!
//! # Callback usage
//!
//! ```no_run
//! use cores_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = StreamingClient::new(ClientConfig::default())?;
//! let request = StreamingRequest::user("Summarise today's tasks")
//!     .output_mode(OutputMode::Object)
//!     .schema_type(SchemaType::Tasks);
//!
//! let mut handler = callbacks(
//!     |chunk: Chunk| println!("#{} {}", chunk.chunk_index, chunk.data),
//!     || println!("done"),
//!     |error: StreamError| eprintln!("stream failed: {error}"),
//! );
//! client
//!     .stream_object(&request, Credential::from_env().as_ref(), &mut handler)
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Client configuration and explicit credentials.
pub mod config;
/// Line framing and record decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Logging initialisation.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Chunked event reader.
pub mod reader;
/// Background streaming calls with cancellation.
pub mod subscription;
/// Byte-stream source contract.
pub mod transport;
/// Request and response records.
pub mod types;

mod client;

pub use client::StreamingClient;
pub use config::{ClientConfig, Credential};
pub use errors::{ClientError, StreamError};
pub use reader::{
    ByteStream, ChunkHandler, ChunkReader, ReadSummary, Termination, callbacks, chunk_stream,
    read_chunks,
};
pub use subscription::{AbortHandle, ChunkEvent, ChunkSubscription};
pub use transport::ChunkSource;
pub use types::{
    ChatResponse, Chunk, HealthResponse, Message, OutputMode, Role, SchemaDetection, SchemaType,
    SearchResult, ServerStatus, StreamingRequest, WebSearchResponse,
};
