//! Streaming chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pollchat_core::{ChatRequest, CompletionBackend, CompletionError, Config, FinishReason};
use reqwest::{Client, RequestBuilder};

use super::protocol::{ChatCompletionRequest, error_message, normalize_base_url};
use super::sse::{SseStreamParser, StreamEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    org_id: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    /// Create a client from the credentials and endpoint in `config`.
    ///
    /// # Errors
    /// Returns error if no API key is configured or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CompletionError::Config("OpenAI API key missing".to_string()))?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            org_id: config.org_id.clone(),
            base_url: normalize_base_url(config.chat_endpoint.as_deref()),
        })
    }

    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the streaming completion request.
    #[must_use]
    pub fn build_request(&self, request: &ChatRequest) -> RequestBuilder {
        let mut builder = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&ChatCompletionRequest::streaming(request));
        if let Some(org_id) = &self.org_id {
            builder = builder.header("OpenAI-Organization", org_id);
        }
        builder
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<Option<FinishReason>, CompletionError> {
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(CompletionError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut finish = None;

        'stream: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| CompletionError::Stream(e.to_string()))?;
            for event in parser.feed(&chunk) {
                if apply_event(event, &mut finish, on_delta)? {
                    break 'stream;
                }
            }
        }
        for event in parser.finish() {
            apply_event(event, &mut finish, on_delta)?;
        }

        tracing::debug!(?finish, "Completion stream ended");
        Ok(finish)
    }
}

/// Returns `true` once the stream signalled its end.
fn apply_event(
    event: StreamEvent,
    finish: &mut Option<FinishReason>,
    on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
) -> Result<bool, CompletionError> {
    match event {
        StreamEvent::Delta(text) => on_delta(&text),
        StreamEvent::Finish(reason) => *finish = Some(FinishReason::from_wire(&reason)),
        StreamEvent::Error(message) => return Err(CompletionError::Stream(message)),
        StreamEvent::Done => return Ok(true),
    }
    Ok(false)
}
