//! `pollchat`: streams chat completions into a launcher host that can only
//! run short-lived commands.
//!
//! The host runs the command, reads one JSON payload from stdout and reruns
//! it while the payload asks to. The answer itself is produced by a detached
//! copy of this binary running in worker mode.

mod invocation;

use std::{path::Path, process::ExitCode};

use anyhow::Context;
use pollchat_core::{
    Config, ConfigError, ConversationLog, DurableStore, Envelope, Generation, ProgressChannel,
};
use pollchat_executor::{OpenAiClient, ProcessLauncher, StreamingWorker, WorkerError, WorkerState};
use pollchat_session::{PrimaryRequest, TurnManager};
use pollchat_transport::HostResponse;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::invocation::Mode;

const STORAGE_SECRET_ENV: &str = "storage_secret";

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the host payload, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = Mode::parse(&args, |name| std::env::var(name).ok());

    match run(mode).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode) -> anyhow::Result<ExitCode> {
    match mode {
        Mode::Dump { path } => dump_chat(&path),
        Mode::Worker { generation } => run_worker(generation).await,
        Mode::Primary(request) => run_primary(&request).await,
    }
}

fn load_config() -> Result<Config, ConfigError> {
    let config = Config::from_vars(std::env::vars())?;
    config.ensure_dirs()?;
    Ok(config)
}

async fn run_primary(request: &PrimaryRequest) -> anyhow::Result<ExitCode> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            emit(&HostResponse::error(e))?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let launcher = ProcessLauncher::default().with_log_file(config.worker_log_file());
    let manager = TurnManager::new(config, launcher);
    match manager.handle(request).await {
        Ok(response) => {
            emit(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!("Turn failed: {e}");
            emit(&HostResponse::error(&e))?;
            Ok(if e.is_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

async fn run_worker(generation: Option<Generation>) -> anyhow::Result<ExitCode> {
    let config = load_config().context("worker configuration")?;
    let store = DurableStore::new(config.envelope());
    let mut channel = ProgressChannel::new(config.stream_file(), config.pid_file(), store.clone());
    match generation {
        Some(generation) => channel = channel.bound(generation),
        None => tracing::warn!("Worker started without a generation, writes are unguarded"),
    }
    let log = ConversationLog::new(config.chat_file(), store);

    let backend = match OpenAiClient::from_config(&config) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!("Cannot create completion client: {e}");
            if let Err(write_err) = channel.fail("", &e.to_string()) {
                tracing::error!("Cannot report failure: {write_err}");
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    match StreamingWorker::new(config, channel, log, backend).run().await {
        Ok(WorkerState::Finished(_)) => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(WorkerError::Superseded) => {
            tracing::info!("Turn superseded, worker exiting");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn dump_chat(path: &Path) -> anyhow::Result<ExitCode> {
    let envelope = std::env::var(STORAGE_SECRET_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .map_or_else(Envelope::plaintext, |s| Envelope::from_secret(&s));
    let log = ConversationLog::new(path, DurableStore::new(envelope));
    let messages = log
        .read()
        .with_context(|| format!("reading {}", path.display()))?;
    println!("{}", serde_json::to_string(&messages)?);
    Ok(ExitCode::SUCCESS)
}

fn emit(response: &HostResponse) -> anyhow::Result<()> {
    println!("{}", response.to_json()?);
    Ok(())
}
