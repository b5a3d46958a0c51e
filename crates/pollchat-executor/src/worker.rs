//! Streaming worker: one completion stream mirrored into the progress channel.
//!
//! The worker runs `Start -> Streaming -> {Finished | Failed}` exactly once.
//! Every delta republishes the accumulated text; only the terminal write is
//! allowed to fail the worker.

use pollchat_core::{
    ChatRequest, CompletionBackend, Config, ConversationLog, FinishReason, ProgressChannel,
    ProgressError, trim_context,
};
use thiserror::Error;

/// Worker lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Start,
    Streaming,
    Finished(FinishReason),
    Failed(String),
}

/// Worker error.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to persist terminal progress record: {0}")]
    TerminalWrite(#[source] ProgressError),
    #[error("Progress channel belongs to a newer turn")]
    Superseded,
}

impl From<ProgressError> for WorkerError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::Superseded | ProgressError::Missing => Self::Superseded,
            other => Self::TerminalWrite(other),
        }
    }
}

/// Runs one turn's completion stream against a completion backend.
pub struct StreamingWorker<B> {
    config: Config,
    channel: ProgressChannel,
    log: ConversationLog,
    backend: B,
}

impl<B: CompletionBackend> StreamingWorker<B> {
    /// Create a worker. `channel` should be bound to the turn's generation.
    #[must_use]
    pub const fn new(config: Config, channel: ProgressChannel, log: ConversationLog, backend: B) -> Self {
        Self {
            config,
            channel,
            log,
            backend,
        }
    }

    /// Run the turn to a terminal state.
    ///
    /// # Errors
    /// Returns error if the terminal record cannot be written or the channel
    /// has been taken over by another turn.
    pub async fn run(&self) -> Result<WorkerState, WorkerError> {
        let mut state = WorkerState::Start;
        tracing::info!(?state, generation = ?self.channel.generation(), "Worker starting");

        match self.channel.reset() {
            Ok(_) => {}
            Err(ProgressError::Superseded) => return Err(WorkerError::Superseded),
            Err(e) => tracing::warn!("Failed to reset progress channel: {e}"),
        }

        let request = match self.prepare() {
            Ok(request) => request,
            Err(message) => return self.fail("", message),
        };

        state = WorkerState::Streaming;
        tracing::info!(?state, model = %request.model, messages = request.history.len(), "Opening completion stream");

        let mut buffer = String::new();
        let mut superseded = false;
        let channel = &self.channel;
        let mut on_delta = |delta: &str| {
            buffer.push_str(delta);
            if superseded {
                return;
            }
            match channel.publish(&buffer) {
                Ok(()) => {}
                Err(ProgressError::Superseded) => {
                    tracing::warn!("Progress channel taken over, no longer publishing");
                    superseded = true;
                }
                Err(e) => tracing::warn!("Failed to publish progress: {e}"),
            }
        };
        let result = self.backend.stream_chat(&request, &mut on_delta).await;

        if superseded {
            return Err(WorkerError::Superseded);
        }

        match result {
            Ok(reason) => {
                let reason = reason.unwrap_or(FinishReason::Normal);
                self.channel.finish(&buffer, reason)?;
                state = WorkerState::Finished(reason);
                tracing::info!(?state, chars = buffer.chars().count(), "Worker finished");
                Ok(state)
            }
            Err(e) => self.fail(&buffer, e.to_string()),
        }
    }

    fn prepare(&self) -> Result<ChatRequest, String> {
        let model = self
            .config
            .model()
            .ok_or_else(|| "gpt_model not configured".to_string())?;
        let history = self
            .log
            .read()
            .map_err(|e| format!("Cannot read conversation: {e}"))?;

        Ok(ChatRequest {
            model: model.to_string(),
            system_prompt: self.config.system_prompt.clone(),
            history: trim_context(&history, self.config.max_context).to_vec(),
        })
    }

    fn fail(&self, content: &str, message: String) -> Result<WorkerState, WorkerError> {
        self.channel.fail(content, &message)?;
        tracing::error!(error = %message, "Worker failed");
        Ok(WorkerState::Failed(message))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pollchat_core::{CompletionError, DurableStore, Generation, Message};

    use super::*;

    struct ScriptedBackend {
        deltas: Vec<&'static str>,
        outcome: Result<Option<FinishReason>, &'static str>,
        seen: Mutex<Option<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(deltas: Vec<&'static str>, outcome: Result<Option<FinishReason>, &'static str>) -> Self {
            Self {
                deltas,
                outcome,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            request: &ChatRequest,
            on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
        ) -> Result<Option<FinishReason>, CompletionError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            for delta in &self.deltas {
                on_delta(delta);
            }
            self.outcome
                .map_err(|message| CompletionError::Stream(message.to_string()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        store: DurableStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::new(dir.path().join("data"), dir.path().join("cache"));
            config.gpt_model = Some("gpt-4o-mini".to_string());
            config.storage_secret = Some("secret".to_string());
            config.ensure_dirs().unwrap();
            let store = DurableStore::new(config.envelope());
            Self {
                _dir: dir,
                config,
                store,
            }
        }

        fn channel(&self) -> ProgressChannel {
            ProgressChannel::new(self.config.stream_file(), self.config.pid_file(), self.store.clone())
        }

        fn log(&self) -> ConversationLog {
            ConversationLog::new(self.config.chat_file(), self.store.clone())
        }

        fn worker(&self, backend: ScriptedBackend) -> StreamingWorker<ScriptedBackend> {
            let generation = self.channel().reset().unwrap();
            StreamingWorker::new(
                self.config.clone(),
                self.channel().bound(generation),
                self.log(),
                backend,
            )
        }
    }

    #[tokio::test]
    async fn test_finished_stream_writes_terminal_record() {
        let fixture = Fixture::new();
        fixture.log().append(Message::user("hello")).unwrap();
        let worker = fixture.worker(ScriptedBackend::new(
            vec!["Hel", "lo", " there"],
            Ok(Some(FinishReason::Length)),
        ));

        let state = worker.run().await.unwrap();
        assert_eq!(state, WorkerState::Finished(FinishReason::Length));

        let record = fixture.channel().peek().unwrap();
        assert_eq!(record.content, "Hello there");
        assert_eq!(record.finish_reason, Some(FinishReason::Length));
        assert!(record.error.is_none());
        assert_eq!(fixture.log().read().unwrap(), vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn test_missing_finish_reason_is_normal() {
        let fixture = Fixture::new();
        let worker = fixture.worker(ScriptedBackend::new(vec!["ok"], Ok(None)));
        assert_eq!(
            worker.run().await.unwrap(),
            WorkerState::Finished(FinishReason::Normal)
        );
        assert!(fixture.channel().peek().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_stream_error_keeps_partial_content() {
        let fixture = Fixture::new();
        let worker = fixture.worker(ScriptedBackend::new(vec!["partial "], Err("connection reset")));

        let state = worker.run().await.unwrap();
        assert_eq!(
            state,
            WorkerState::Failed("Stream aborted: connection reset".to_string())
        );
        let record = fixture.channel().peek().unwrap();
        assert_eq!(record.content, "partial ");
        assert_eq!(record.error.as_deref(), Some("Stream aborted: connection reset"));
    }

    #[tokio::test]
    async fn test_missing_model_fails_before_streaming() {
        let mut fixture = Fixture::new();
        fixture.config.gpt_model = None;
        let backend = ScriptedBackend::new(vec!["never"], Ok(None));
        let worker = fixture.worker(backend);

        let state = worker.run().await.unwrap();
        assert_eq!(state, WorkerState::Failed("gpt_model not configured".to_string()));
        assert!(worker.backend.seen.lock().unwrap().is_none());
        assert_eq!(
            fixture.channel().peek().unwrap().error.as_deref(),
            Some("gpt_model not configured")
        );
    }

    #[tokio::test]
    async fn test_request_uses_trimmed_history_and_system_prompt() {
        let mut fixture = Fixture::new();
        fixture.config.max_context = 2;
        fixture.config.system_prompt = Some("Answer tersely.".to_string());
        for i in 0..5 {
            fixture.log().append(Message::user(format!("m{i}"))).unwrap();
        }
        let worker = fixture.worker(ScriptedBackend::new(vec![], Ok(None)));
        worker.run().await.unwrap();

        let seen = worker.backend.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.model, "gpt-4o-mini");
        assert_eq!(seen.system_prompt.as_deref(), Some("Answer tersely."));
        assert_eq!(seen.history, vec![Message::user("m3"), Message::user("m4")]);
    }

    #[tokio::test]
    async fn test_superseded_worker_leaves_newer_turn_alone() {
        let fixture = Fixture::new();
        fixture.channel().reset().unwrap();
        let stale = StreamingWorker::new(
            fixture.config.clone(),
            fixture.channel().bound(Generation::new(1)),
            fixture.log(),
            ScriptedBackend::new(vec!["stale"], Ok(None)),
        );

        assert!(matches!(stale.run().await, Err(WorkerError::Superseded)));
        let record = fixture.channel().peek().unwrap();
        assert_eq!(record.content, "");
        assert!(!record.is_terminal());
    }

    #[tokio::test]
    async fn test_unreadable_log_fails_turn() {
        let fixture = Fixture::new();
        std::fs::write(fixture.config.chat_file(), "{not json").unwrap();
        let worker = fixture.worker(ScriptedBackend::new(vec![], Ok(None)));

        let state = worker.run().await.unwrap();
        assert!(matches!(state, WorkerState::Failed(ref m) if m.starts_with("Cannot read conversation")));
    }
}
