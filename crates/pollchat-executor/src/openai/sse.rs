//! Server-sent event parsing for streamed chat completions.

use serde_json::Value;

use super::protocol::ChatCompletionChunk;

/// Event extracted from the completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text appended to the answer.
    Delta(String),
    /// The service reported why the answer ended.
    Finish(String),
    /// The service reported an error inside the stream.
    Error(String),
    /// `[DONE]` terminator.
    Done,
}

/// Incremental parser for SSE byte streams.
///
/// Frames are split on blank lines before decoding, so multi-byte characters
/// split across network chunks are reassembled intact.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();

        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..split]);
            if let Some(payload) = extract_data_payload(&frame) {
                map_payload(&payload, &mut events);
            }
        }

        events
    }

    /// Drain a trailing frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        if let Some(payload) = extract_data_payload(&String::from_utf8_lossy(&rest)) {
            map_payload(&payload, &mut events);
        }
        events
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_payload(payload: &str, events: &mut Vec<StreamEvent>) {
    if payload == "[DONE]" {
        events.push(StreamEvent::Done);
        return;
    }

    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        tracing::debug!(payload, "Skipping unparseable SSE payload");
        return;
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("completion stream reported an error");
        events.push(StreamEvent::Error(message.to_string()));
        return;
    }

    let Ok(chunk) = serde_json::from_value::<ChatCompletionChunk>(value) else {
        return;
    };
    // Only the first choice is requested.
    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };
    if let Some(delta) = choice.delta.content.filter(|d| !d.is_empty()) {
        events.push(StreamEvent::Delta(delta));
    }
    if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
        events.push(StreamEvent::Finish(reason));
    }
}
