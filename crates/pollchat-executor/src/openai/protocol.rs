//! Chat completions wire types.

use pollchat_core::ChatRequest;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Base URL used when none (or an unusable one) is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalize a configured endpoint to an API base URL.
///
/// Accepts either a base (`https://host/v1`) or a full completions endpoint
/// (`https://host/v1/chat/completions`). An empty path becomes `/v1`.
#[must_use]
pub fn normalize_base_url(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return DEFAULT_BASE_URL.to_string();
    };
    let Ok(mut url) = Url::parse(raw) else {
        return DEFAULT_BASE_URL.to_string();
    };

    let path = url.path().to_string();
    let path = path.strip_suffix(COMPLETIONS_PATH).unwrap_or(&path);
    if path.is_empty() || path == "/" {
        url.set_path("/v1");
    } else {
        url.set_path(path);
    }
    url.as_str().trim_end_matches('/').to_string()
}

/// Request body for a streaming completion.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub stream: bool,
}

/// A message as the service expects it.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WireMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

impl<'a> ChatCompletionRequest<'a> {
    #[must_use]
    pub fn streaming(request: &'a ChatRequest) -> Self {
        let system = request
            .system_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|content| WireMessage {
                role: "system",
                content,
            });
        let history = request.history.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        });

        Self {
            model: &request.model,
            messages: system.into_iter().chain(history).collect(),
            stream: true,
        }
    }
}

/// One streamed completion chunk.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<ErrorFields>,
}

#[derive(Debug, Deserialize)]
struct ErrorFields {
    message: Option<String>,
}

/// Extract `error.message` from an error body.
#[must_use]
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|p| p.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
}
