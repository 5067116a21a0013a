use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// What the editor asked the assistant to do with the prompt.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Continue,
    Rewrite,
    Suggest,
    Character,
    Plot,
    Analyze,
}

impl GenerationKind {
    pub const ALL: [&'static str; 6] = [
        "continue",
        "rewrite",
        "suggest",
        "character",
        "plot",
        "analyze",
    ];
}

impl std::str::FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("expected one of: {}", Self::ALL.join(", ")))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ModelId {
    #[serde(rename = "deepseek-chat")]
    DeepseekChat,
    #[serde(rename = "deepseek-coder")]
    DeepseekCoder,
    #[serde(rename = "deepseek-reasoner")]
    DeepseekReasoner,
}

impl ModelId {
    pub const ALL: [&'static str; 3] = ["deepseek-chat", "deepseek-coder", "deepseek-reasoner"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepseekChat => "deepseek-chat",
            Self::DeepseekCoder => "deepseek-coder",
            Self::DeepseekReasoner => "deepseek-reasoner",
        }
    }
}

impl std::str::FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("expected one of: {}", Self::ALL.join(", ")))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookContext {
    pub genre: String,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_summary: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub streaming: bool,
}

/// Body of `POST /generate`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(rename = "type")]
    pub kind: GenerationKind,
    pub context: String,
    pub model: ModelId,
    pub book_context: BookContext,
    pub settings: GenerationSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamBookContext {
    pub genre: String,
    pub style: String,
}

/// Body of `POST /stream`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub prompt: String,
    pub book_context: StreamBookContext,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::ToolCalls => "tool_calls",
            Self::Other => "other",
        }
    }
}

pub fn map_finish(s: Option<&str>) -> Option<FinishReason> {
    match s {
        Some("stop") => Some(FinishReason::Stop),
        Some("length") => Some(FinishReason::Length),
        Some("content_filter") => Some(FinishReason::ContentFilter),
        Some("tool_calls") | Some("function_call") => Some(FinishReason::ToolCalls),
        Some(_) => Some(FinishReason::Other),
        None => None,
    }
}

// ---- Upstream chunk (OpenAI chat.completion.chunk shape) ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChunkChoice {
    pub fn finish(&self) -> Option<FinishReason> {
        map_finish(self.finish_reason.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One incremental unit of a streamed completion.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(rename = "created", default)]
    pub created_at: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChunkUsage>,
}

impl CompletionChunk {
    /// Non-null content deltas of every choice, in choice order.
    pub fn contents(&self) -> impl Iterator<Item = &str> {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
    }

    /// Finish reason of the first choice that carries one.
    pub fn finish(&self) -> Option<FinishReason> {
        self.choices.iter().find_map(ChunkChoice::finish)
    }
}

// ---- Aggregated response (API JSON, camelCase) ----

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// Placeholder scores; nothing computes these locally, so they stay zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QualityScores {
    pub coherence_score: f32,
    pub creativity_score: f32,
    pub relevance_score: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub generated_at: DateTime<Utc>,
    pub request_id: String,
    /// Milliseconds from request start to aggregation end.
    pub processing_time: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
    pub quality: QualityScores,
    pub metadata: ResponseMetadata,
}

/// Per-user consumption counters read by the quota gate.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub tokens_used: u64,
    pub tokens_limit: u64,
}
