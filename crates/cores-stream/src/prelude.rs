//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, Chunk, ChunkEvent, ChunkHandler, ChunkSubscription, ClientConfig, ClientError,
    Credential, Message, OutputMode, ReadSummary, SchemaType, StreamError, StreamingClient,
    StreamingRequest, callbacks,
};
