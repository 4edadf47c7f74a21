use std::sync::Arc;

use futures::TryStreamExt as _;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument as _, debug, info_span, warn};

use crate::config::{ClientConfig, Credential};
use crate::errors::{ClientError, StreamError};
use crate::reader::{ByteStream, ChunkHandler, ReadSummary, Termination, callbacks, read_chunks};
use crate::subscription::ChunkSubscription;
use crate::transport::ChunkSource;
use crate::types::{
    ChatRequest, ChatResponse, HealthResponse, Message, OutputMode, SchemaDetection, SchemaType,
    ServerStatus, StreamingRequest, WebSearchResponse, validate_messages,
};

const HEALTH_PATH: &str = "/health";
const CHAT_PATH: &str = "/api/v1/chat";
const SEARCH_PATH: &str = "/api/v1/search";
const SERVER_STATUS_PATH: &str = "/api/v1/server-status";
const DETECT_SCHEMA_PATH: &str = "/api/v1/detect-schema";
const STREAM_OBJECT_PATH: &str = "/api/v1/stream-object";

/// HTTP client for the chat/search backend and the structured streaming
/// backend.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct StreamingClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl StreamingClient {
    /// Creates a client from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Creates a client using [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns true when the API backend answers `200 OK` with `status: healthy`.
    ///
    /// Failures are logged and reported as unhealthy.
    pub async fn check_health(&self) -> bool {
        match self.fetch_health().await {
            Ok((status, health)) => status == StatusCode::OK && health.is_healthy(),
            Err(e) => {
                warn!(error = %e, "backend health check failed");
                false
            }
        }
    }

    /// Returns the API backend's health report, or `None` if unavailable.
    pub async fn health_details(&self) -> Option<HealthResponse> {
        match self.fetch_health().await {
            Ok((_, health)) => Some(health),
            Err(e) => {
                warn!(error = %e, "failed to get health details");
                None
            }
        }
    }

    async fn fetch_health(&self) -> Result<(StatusCode, HealthResponse), ClientError> {
        let url = self.config.api_url(HEALTH_PATH);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("GET {url} failed: {e}")))?;
        let status = response.status();
        Ok((status, decode_json(response).await?))
    }

    /// Sends a conversation and returns it extended with the assistant reply.
    pub async fn send_chat(
        &self,
        messages: Vec<Message>,
        credential: Option<&Credential>,
    ) -> Result<ChatResponse, ClientError> {
        validate_messages(&messages)?;
        let url = self.config.api_url(CHAT_PATH);
        self.post_json(&url, &ChatRequest { messages }, credential)
            .await
    }

    /// Runs a web search on the API backend.
    pub async fn web_search(
        &self,
        query: &str,
        credential: Option<&Credential>,
    ) -> Result<WebSearchResponse, ClientError> {
        let query = non_blank(query, "query")?;
        let url = self.config.api_url(SEARCH_PATH);
        self.post_json(&url, &serde_json::json!({ "query": query }), credential)
            .await
    }

    /// Asks the streaming backend which schema suits `message`.
    pub async fn detect_schema(
        &self,
        message: &str,
        credential: Option<&Credential>,
    ) -> Result<SchemaDetection, ClientError> {
        let message = non_blank(message, "message")?;
        let url = self.config.streaming_url(DETECT_SCHEMA_PATH);
        self.post_json(&url, &serde_json::json!({ "message": message }), credential)
            .await
    }

    /// Fetches server status, optionally scoped to a game.
    pub async fn server_status(
        &self,
        game: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<ServerStatus, ClientError> {
        let url = self.config.api_url(SERVER_STATUS_PATH);
        let mut req = self.http.get(&url);
        if let Some(game) = game.map(str::trim).filter(|g| !g.is_empty()) {
            req = req.query(&[("game", game)]);
        }
        let response = authorize(req, credential)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("GET {url} failed: {e}")))?;
        decode_json(response).await
    }

    /// Streams a structured response into `handler`.
    ///
    /// A failure to open the stream is passed to `handler.on_error` and also
    /// returned as `Err`. Once the stream is open, the outcome is reported
    /// through the handler and the returned [`ReadSummary`].
    pub async fn stream_object<H>(
        &self,
        request: &StreamingRequest,
        credential: Option<&Credential>,
        handler: &mut H,
    ) -> Result<ReadSummary, ClientError>
    where
        H: ChunkHandler + ?Sized,
    {
        request.validate()?;
        let span = info_span!("stream_object", schema_type = ?request.schema_type);
        async {
            let bytes = match self.open(request, credential).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    handler.on_error(error.clone());
                    return Err(error.into());
                }
            };
            Ok(read_chunks(bytes, handler).await)
        }
        .instrument(span)
        .await
    }

    /// Starts a streaming call on a background task.
    pub fn start_stream(
        &self,
        request: StreamingRequest,
        credential: Option<Credential>,
    ) -> Result<ChunkSubscription, ClientError> {
        ChunkSubscription::spawn(
            Arc::new(self.clone()),
            request,
            credential,
            self.config.stream_buffer_capacity,
        )
    }

    /// Looks up creative-software knowledge for `query`.
    ///
    /// Returns the `data` of the last chunk that carried a non-null payload.
    pub async fn creative_software_knowledge(
        &self,
        query: &str,
        credential: Option<&Credential>,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        let query = non_blank(query, "query")?;
        let request = StreamingRequest::user(query)
            .output_mode(OutputMode::Object)
            .schema_type(SchemaType::CreativeSoftware);

        let mut result: Option<serde_json::Value> = None;
        let mut handler = callbacks(
            |chunk: crate::types::Chunk| {
                if !chunk.data.is_null() {
                    result = Some(chunk.data);
                }
            },
            || {},
            |_error: StreamError| {},
        );
        let summary = self.stream_object(&request, credential, &mut handler).await?;
        drop(handler);
        match summary.termination {
            Termination::Completed => Ok(result),
            Termination::Failed(error) => Err(error.into()),
        }
    }

    async fn post_json<B, T>(
        &self,
        url: &str,
        body: &B,
        credential: Option<&Credential>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%url, "POST");
        let response = authorize(self.http.post(url).json(body), credential)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("POST {url} failed: {e}")))?;
        decode_json(response).await
    }
}

#[async_trait::async_trait]
impl ChunkSource for StreamingClient {
    async fn open(
        &self,
        request: &StreamingRequest,
        credential: Option<&Credential>,
    ) -> Result<ByteStream, StreamError> {
        let url = self.config.streaming_url(STREAM_OBJECT_PATH);
        debug!(
            %url,
            output_mode = ?request.output_mode,
            schema_type = ?request.schema_type,
            "opening structured stream"
        );
        let req = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        let response = authorize(req, credential).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(response.bytes_stream().map_err(StreamError::from)))
    }
}

fn authorize(
    req: reqwest::RequestBuilder,
    credential: Option<&Credential>,
) -> reqwest::RequestBuilder {
    match credential {
        Some(credential) => req.bearer_auth(credential.token()),
        None => req,
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ClientError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(format!("failed to read response body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str, ClientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}
