//! Foreground polling of a running turn.

use std::time::{Duration, SystemTime};

use pollchat_core::{
    ConversationLog, FinishReason, Message, ProgressChannel, ProgressError, StoreError, is_stalled,
};
use pollchat_executor::terminate;
use pollchat_transport::{HostResponse, STREAMING_NOW};
use thiserror::Error;

const STALLED_SUFFIX: &str = " [Connection Stalled]";
const STALLED_FOOTER: &str = "You can ask to continue the answer";

/// Poll error.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("No response is streaming")]
    NoStream,
    #[error("Cannot read stream state: {0}")]
    Progress(#[source] ProgressError),
    #[error("Cannot save answer: {0}")]
    Log(#[from] StoreError),
}

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The worker is still writing.
    InProgress { content: String },
    /// The worker finished; the answer has been saved.
    Finished { content: String, reason: FinishReason },
    /// No write within the timeout; whatever arrived has been saved.
    Stalled { content: String },
    /// The worker reported an error, or its record was unreadable.
    Failed { error: String },
}

impl PollOutcome {
    /// Host payload for this outcome.
    #[must_use]
    pub fn into_response(self) -> HostResponse {
        match self {
            Self::InProgress { content } => HostResponse::text(content)
                .rerun()
                .flag(STREAMING_NOW)
                .replace_last()
                .scroll_end(),
            Self::Finished { content, reason } => {
                let response = HostResponse::text(content).replace_last().scroll_end();
                match finish_footer(reason) {
                    Some(footer) => response.footer(footer),
                    None => response,
                }
            }
            Self::Stalled { content } => {
                HostResponse::text(format!("{}{STALLED_SUFFIX}", content.trim()))
                    .footer(STALLED_FOOTER)
                    .replace_last()
                    .scroll_end()
            }
            Self::Failed { error } => HostResponse::text(error).replace_last(),
        }
    }
}

/// Footer explaining why an answer ended early.
#[must_use]
pub const fn finish_footer(reason: FinishReason) -> Option<&'static str> {
    match reason {
        FinishReason::Normal => None,
        FinishReason::Length => Some("Maximum number of tokens reached"),
        FinishReason::ContentFilter => Some("Content was omitted due to a content filter flag"),
    }
}

/// Reads the progress channel on behalf of the host and settles finished turns.
#[derive(Debug, Clone)]
pub struct Poller {
    channel: ProgressChannel,
    log: ConversationLog,
    timeout: Duration,
}

impl Poller {
    #[must_use]
    pub const fn new(channel: ProgressChannel, log: ConversationLog, timeout: Duration) -> Self {
        Self {
            channel,
            log,
            timeout,
        }
    }

    /// Observe the channel once.
    ///
    /// A terminal or stalled record is settled: non-empty content is appended
    /// to the log as the assistant's answer and the channel is discarded.
    ///
    /// # Errors
    /// Returns [`PollError::NoStream`] when no turn is running, or an error if
    /// the channel or the log cannot be accessed.
    pub fn poll(&self, now: SystemTime) -> Result<PollOutcome, PollError> {
        let mut record = match self.channel.peek() {
            Ok(record) => record,
            Err(ProgressError::Missing) => return Err(PollError::NoStream),
            Err(ProgressError::Store(e)) if e.is_corruption() => {
                tracing::warn!("Progress record unreadable, ending turn: {e}");
                self.channel.discard();
                return Ok(PollOutcome::Failed {
                    error: format!("Stream state unreadable: {e}"),
                });
            }
            Err(e) => return Err(PollError::Progress(e)),
        };

        if let Some(error) = record.error.take().filter(|e| !e.is_empty()) {
            tracing::info!(%error, "Worker reported failure");
            self.channel.discard();
            return Ok(PollOutcome::Failed { error });
        }

        let stalled = self
            .channel
            .age(now)
            .is_ok_and(|age| is_stalled(&record, age, self.timeout));
        if !record.is_terminal() && !stalled {
            return Ok(PollOutcome::InProgress {
                content: record.content,
            });
        }

        if !record.content.is_empty() {
            self.log.append(Message::assistant(record.content.clone()))?;
        }
        if stalled {
            self.stop_worker();
        }
        self.channel.discard();

        if stalled {
            tracing::warn!(timeout = ?self.timeout, "Stream stalled");
            Ok(PollOutcome::Stalled {
                content: record.content,
            })
        } else {
            let reason = record.finish_reason.unwrap_or(FinishReason::Normal);
            tracing::info!(?reason, "Stream finished");
            Ok(PollOutcome::Finished {
                content: record.content,
                reason,
            })
        }
    }

    fn stop_worker(&self) {
        match self.channel.read_handle() {
            Ok(Some(pid)) => {
                if terminate(pid) {
                    tracing::info!(pid, "Sent SIGTERM to stalled worker");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Cannot read worker handle: {e}"),
        }
    }
}
