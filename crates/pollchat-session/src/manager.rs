//! Turn manager for default-mode invocations.

use std::time::SystemTime;

use pollchat_core::{
    Config, ConversationLog, DurableStore, LaunchError, Launcher, Message, ProgressChannel,
    ProgressError, StoreError,
};
use pollchat_executor::worker_spec;
use pollchat_transport::{HostResponse, STREAM_MARKER, STREAMING_NOW, markdown_chat};

use crate::poller::{PollError, Poller};

const MARKER_TEXT: &str = "…";

/// Turn error.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("{0}")]
    Log(#[from] StoreError),
    #[error("Cannot start stream: {0}")]
    Progress(#[from] ProgressError),
    #[error("Cannot start worker: {0}")]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Poll(PollError),
}

impl TurnError {
    /// Whether the failure is a local I/O or spawn problem rather than bad
    /// stored data.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Launch(_) => true,
            Self::Log(e) | Self::Poll(PollError::Log(e)) => !e.is_corruption(),
            Self::Progress(_) | Self::Poll(_) => true,
        }
    }
}

/// One default-mode invocation as the host sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryRequest {
    /// Text typed by the user; empty redisplays the conversation.
    pub query: String,
    /// A turn is being polled.
    pub streaming_now: bool,
    /// First poll of the turn; nothing has been shown for the answer yet.
    pub stream_marker: bool,
}

/// Starts turns and answers polls against the files in a [`Config`].
pub struct TurnManager<L>
where
    L: Launcher,
{
    config: Config,
    log: ConversationLog,
    channel: ProgressChannel,
    launcher: L,
}

impl<L> TurnManager<L>
where
    L: Launcher,
{
    /// Create a new turn manager.
    #[must_use]
    pub fn new(config: Config, launcher: L) -> Self {
        let store = DurableStore::new(config.envelope());
        Self {
            log: ConversationLog::new(config.chat_file(), store.clone()),
            channel: ProgressChannel::new(config.stream_file(), config.pid_file(), store),
            config,
            launcher,
        }
    }

    #[must_use]
    pub const fn log(&self) -> &ConversationLog {
        &self.log
    }

    #[must_use]
    pub const fn channel(&self) -> &ProgressChannel {
        &self.channel
    }

    /// Handle one invocation and produce the host payload.
    ///
    /// # Errors
    /// Returns error if the log or channel cannot be accessed, or the worker
    /// cannot be spawned.
    pub async fn handle(&self, request: &PrimaryRequest) -> Result<HostResponse, TurnError> {
        if self.config.api_key.is_none() {
            return Ok(HostResponse::error("OpenAI API key missing"));
        }
        self.log.ensure()?;

        if request.streaming_now {
            return self.respond_stream(request.stream_marker);
        }

        if self.channel.exists() {
            tracing::info!("Resuming stream left by an earlier invocation");
            return Ok(self.resume());
        }

        let messages = self.log.read()?;
        if request.query.trim().is_empty() {
            return Ok(HostResponse::text(markdown_chat(&messages, false)).scroll_end());
        }

        let messages = self.log.append(Message::user(request.query.clone()))?;
        self.start_turn().await?;

        Ok(HostResponse::text(markdown_chat(&messages, true))
            .rerun()
            .flag(STREAMING_NOW)
            .flag(STREAM_MARKER))
    }

    async fn start_turn(&self) -> Result<(), TurnError> {
        let generation = self.channel.reset()?;
        let pid = match self.launcher.spawn(&worker_spec(generation)).await {
            Ok(pid) => pid,
            Err(e) => {
                self.channel.discard();
                return Err(e.into());
            }
        };
        if let Err(e) = self.channel.write_handle(pid) {
            tracing::warn!(pid, "Cannot record worker handle: {e}");
        }
        tracing::info!(pid, %generation, "Turn started");
        Ok(())
    }

    fn resume(&self) -> HostResponse {
        let response = HostResponse::default()
            .rerun()
            .flag(STREAMING_NOW)
            .flag(STREAM_MARKER);
        match self.log.read() {
            Ok(messages) => HostResponse {
                response: markdown_chat(&messages, true),
                ..response
            }
            .scroll_end(),
            Err(e) => {
                tracing::warn!("Cannot show conversation while resuming: {e}");
                response
            }
        }
    }

    fn respond_stream(&self, marker: bool) -> Result<HostResponse, TurnError> {
        if marker {
            return Ok(HostResponse::text(MARKER_TEXT)
                .rerun()
                .flag(STREAMING_NOW)
                .append());
        }

        let poller = Poller::new(self.channel.clone(), self.log.clone(), self.config.timeout);
        match poller.poll(SystemTime::now()) {
            Ok(outcome) => Ok(outcome.into_response()),
            Err(e @ PollError::NoStream) => Ok(HostResponse::error(e)),
            Err(e) => Err(TurnError::Poll(e)),
        }
    }
}
