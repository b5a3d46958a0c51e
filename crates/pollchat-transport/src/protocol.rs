//! Host payload written to stdout once per invocation.

use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

/// Seconds the host waits before invoking the command again.
pub const RERUN_INTERVAL: f64 = 0.1;

/// Variable set while a stream is being polled.
pub const STREAMING_NOW: &str = "streaming_now";
/// Variable set on the first poll of a turn, before anything was shown.
pub const STREAM_MARKER: &str = "stream_marker";

const BEHAVIOUR_RESPONSE: &str = "response";
const BEHAVIOUR_SCROLL: &str = "scroll";

/// One host payload. Empty fields are left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub behaviour: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub footer: String,
}

impl HostResponse {
    /// Payload showing `text` as the whole response.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            ..Self::default()
        }
    }

    /// Payload showing an error as plain text.
    #[must_use]
    pub fn error(err: impl Display) -> Self {
        Self::text(err.to_string())
    }

    /// Ask the host to invoke the command again after [`RERUN_INTERVAL`].
    #[must_use]
    pub const fn rerun(mut self) -> Self {
        self.rerun = Some(RERUN_INTERVAL);
        self
    }

    /// Set a flag variable (`"1"`) for the next invocation.
    #[must_use]
    pub fn flag(mut self, name: &str) -> Self {
        self.variables.insert(name.to_string(), "1".to_string());
        self
    }

    /// Add the response text after what is already shown.
    #[must_use]
    pub fn append(self) -> Self {
        self.behaviour(BEHAVIOUR_RESPONSE, "append")
    }

    /// Replace the last shown response.
    #[must_use]
    pub fn replace_last(self) -> Self {
        self.behaviour(BEHAVIOUR_RESPONSE, "replacelast")
    }

    #[must_use]
    pub fn scroll_end(self) -> Self {
        self.behaviour(BEHAVIOUR_SCROLL, "end")
    }

    #[must_use]
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = footer.into();
        self
    }

    #[must_use]
    pub fn has_flag(&self, name: &str) -> bool {
        self.variables.get(name).is_some_and(|v| v == "1")
    }

    /// Compact JSON for stdout.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn behaviour(mut self, key: &str, value: &str) -> Self {
        self.behaviour.insert(key.to_string(), value.to_string());
        self
    }
}
