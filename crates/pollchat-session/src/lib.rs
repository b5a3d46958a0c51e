//! Turn orchestration for poll-driven chat.
//!
//! Provides:
//! - `TurnManager` - Start a turn, resume or poll a running one
//! - `Poller` - Read the progress channel and settle finished turns

pub mod manager;
pub mod poller;

pub use manager::{PrimaryRequest, TurnError, TurnManager};
pub use poller::{PollError, PollOutcome, Poller};
