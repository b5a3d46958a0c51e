//! Invocation mode selection from arguments and environment.

use std::path::PathBuf;

use pollchat_core::Generation;
use pollchat_executor::command::{GENERATION_ENV, WORKER_FLAG, WORKER_MODE_ENV, WORKER_MODE_VALUE};
use pollchat_session::PrimaryRequest;
use pollchat_transport::{STREAM_MARKER, STREAMING_NOW};

const DUMP_FLAG: &str = "--dump-chat";

/// What this process was started to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Print a conversation log as JSON.
    Dump { path: PathBuf },
    /// Detached streaming worker for one turn.
    Worker { generation: Option<Generation> },
    /// Host invocation.
    Primary(PrimaryRequest),
}

impl Mode {
    /// Pick the mode from `args` (without the program name) and `var`.
    pub fn parse(args: &[String], var: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| var(name).is_some_and(|v| v == "1");

        if let [first, path, ..] = args {
            if first == DUMP_FLAG {
                return Self::Dump {
                    path: PathBuf::from(path),
                };
            }
        }

        let worker_env = var(WORKER_MODE_ENV).is_some_and(|v| v == WORKER_MODE_VALUE);
        let worker_flag = args.first().is_some_and(|a| a == WORKER_FLAG);
        if worker_env || worker_flag {
            return Self::Worker {
                generation: var(GENERATION_ENV).and_then(|g| g.parse().ok()),
            };
        }

        Self::Primary(PrimaryRequest {
            query: args.first().cloned().unwrap_or_default(),
            streaming_now: flag(STREAMING_NOW),
            stream_marker: flag(STREAM_MARKER),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(args: &[&str], vars: &[(&str, &str)]) -> Mode {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Mode::parse(&args, |name| vars.get(name).cloned())
    }

    #[test]
    fn test_dump_mode() {
        assert_eq!(
            parse(&["--dump-chat", "/tmp/chat.json"], &[]),
            Mode::Dump {
                path: PathBuf::from("/tmp/chat.json")
            }
        );
    }

    #[test]
    fn test_worker_mode_from_env_or_flag() {
        assert_eq!(
            parse(&[], &[("POLLCHAT_MODE", "worker"), ("POLLCHAT_GENERATION", "77")]),
            Mode::Worker {
                generation: Some(Generation::new(77))
            }
        );
        assert_eq!(
            parse(&["--stream"], &[("POLLCHAT_GENERATION", "bogus")]),
            Mode::Worker { generation: None }
        );
    }

    #[test]
    fn test_primary_mode() {
        assert_eq!(
            parse(&["hello there"], &[("streaming_now", "1"), ("stream_marker", "0")]),
            Mode::Primary(PrimaryRequest {
                query: "hello there".to_string(),
                streaming_now: true,
                stream_marker: false,
            })
        );
        assert_eq!(parse(&[], &[]), Mode::Primary(PrimaryRequest::default()));
    }

    #[test]
    fn test_dump_flag_without_path_is_a_query() {
        assert_eq!(
            parse(&["--dump-chat"], &[]),
            Mode::Primary(PrimaryRequest {
                query: "--dump-chat".to_string(),
                ..PrimaryRequest::default()
            })
        );
    }
}
