use std::fmt;
use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_API_URL: &str = "http://localhost:8082";
const DEFAULT_STREAMING_URL: &str = "http://localhost:8081";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STREAM_BUFFER: usize = 128;

/// Configuration for [`StreamingClient`](crate::StreamingClient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the chat/search backend.
    pub api_base_url: String,
    /// Base URL of the structured streaming backend.
    pub streaming_base_url: String,
    /// HTTP timeout applied to every request, including the whole body of a
    /// streaming call.
    pub timeout: Duration,
    /// Bounded event buffer used by subscriptions.
    pub stream_buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            streaming_base_url: DEFAULT_STREAMING_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Builds a config from the environment, falling back to defaults.
    ///
    /// Reads `CORES_API_URL`, `CORES_STREAMING_URL`, `CORES_TIMEOUT_SECS` and
    /// `CORES_STREAM_BUFFER`.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Some(url) = non_empty_env("CORES_API_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = non_empty_env("CORES_STREAMING_URL") {
            config.streaming_base_url = url;
        }
        if let Some(raw) = non_empty_env("CORES_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                ClientError::Config(format!("invalid CORES_TIMEOUT_SECS `{raw}`: {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = non_empty_env("CORES_STREAM_BUFFER") {
            config.stream_buffer_capacity = raw.trim().parse::<usize>().map_err(|e| {
                ClientError::Config(format!("invalid CORES_STREAM_BUFFER `{raw}`: {e}"))
            })?;
        }
        Ok(config)
    }

    /// Overrides the chat/search backend URL.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Overrides the streaming backend URL.
    pub fn streaming_base_url(mut self, url: impl Into<String>) -> Self {
        self.streaming_base_url = url.into();
        self
    }

    /// Overrides the HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the subscription buffer size.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ClientError::Config("api_base_url must not be empty".into()));
        }
        if self.streaming_base_url.trim().is_empty() {
            return Err(ClientError::Config(
                "streaming_base_url must not be empty".into(),
            ));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }

    pub(crate) fn streaming_url(&self, path: &str) -> String {
        join_url(&self.streaming_base_url, path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Bearer token passed explicitly to each request that needs one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Reads `CORES_API_TOKEN`; returns `None` when unset or blank.
    pub fn from_env() -> Option<Self> {
        non_empty_env("CORES_API_TOKEN").map(Self)
    }

    pub(crate) fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
