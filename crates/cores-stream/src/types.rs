use std::fmt;
use std::str::FromStr;

use crate::errors::ClientError;

/// One record delivered by the streaming endpoint.
///
/// Any JSON object is accepted as a record. Fields that are absent, null or
/// of an unexpected type fall back to their defaults, and only a literal
/// `true` marks a record as final.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct Chunk {
    /// Producer-defined kind (for example `partial` or `complete`).
    pub chunk_type: String,
    /// Arbitrary payload.
    pub data: serde_json::Value,
    /// Position assigned by the producer.
    pub chunk_index: u64,
    /// Marks the last record of a logical stream.
    pub is_final: bool,
}

impl TryFrom<serde_json::Value> for Chunk {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let mut fields = match value {
            serde_json::Value::Object(fields) => fields,
            other => return Err(format!("record is not a JSON object: {other}")),
        };
        Ok(Self {
            chunk_type: fields
                .get("chunk_type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            chunk_index: fields
                .get("chunk_index")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default(),
            is_final: fields.get("is_final") == Some(&serde_json::Value::Bool(true)),
            data: fields.remove("data").unwrap_or_default(),
        })
    }
}

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Conversation returned by the chat endpoint, including the new reply.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatResponse {
    pub messages: Vec<Message>,
}

impl ChatResponse {
    /// Returns the last assistant message, if any.
    pub fn reply(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    #[serde(default)]
    pub relevance_score: f64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WebSearchResponse {
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub summary: String,
}

/// Shape of the objects the streaming endpoint should build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    Object,
    Array,
    NoSchema,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::NoSchema => "no-schema",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            "no-schema" | "no_schema" => Ok(Self::NoSchema),
            other => Err(ClientError::Validation(format!(
                "unknown output mode: {other}"
            ))),
        }
    }
}

/// Schema the streaming endpoint fills in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    General,
    Search,
    Notifications,
    Tasks,
    Analysis,
    CreativeSoftware,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Search => "search",
            Self::Notifications => "notifications",
            Self::Tasks => "tasks",
            Self::Analysis => "analysis",
            Self::CreativeSoftware => "creative_software",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "general" => Ok(Self::General),
            "search" => Ok(Self::Search),
            "notifications" => Ok(Self::Notifications),
            "tasks" => Ok(Self::Tasks),
            "analysis" => Ok(Self::Analysis),
            "creative_software" => Ok(Self::CreativeSoftware),
            other => Err(ClientError::Validation(format!(
                "unknown schema type: {other}"
            ))),
        }
    }
}

/// Body of a structured streaming call.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamingRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mode: Option<OutputMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl StreamingRequest {
    /// Creates a request from a conversation with no selectors set.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            output_mode: None,
            schema_type: None,
            context: None,
        }
    }

    /// Creates a request holding a single user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(vec![Message::user(content)])
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = Some(mode);
        self
    }

    pub fn schema_type(mut self, schema: SchemaType) -> Self {
        self.schema_type = Some(schema);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        validate_messages(&self.messages)
    }
}

pub(crate) fn validate_messages(messages: &[Message]) -> Result<(), ClientError> {
    if messages.is_empty() {
        return Err(ClientError::Validation(
            "at least one message is required".into(),
        ));
    }
    if messages.iter().all(|m| m.content.trim().is_empty()) {
        return Err(ClientError::Validation(
            "message content must not be empty".into(),
        ));
    }
    Ok(())
}

/// Result of asking the streaming backend which schema fits a message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchemaDetection {
    pub detected_schema: String,
    /// Any additional fields the backend reports (confidence, reasoning, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SchemaDetection {
    /// Parses the detected schema, if it is one this client knows.
    pub fn schema_type(&self) -> Option<SchemaType> {
        self.detected_schema.parse().ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
