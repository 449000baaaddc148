use thiserror::Error;

use crate::tmux::MuxError;

/// User-facing failures, mapped 1:1 to exit code 1 by `main`.
#[derive(Debug, Error)]
pub enum ForemanError {
    /// The named workshop has no ledger record.
    #[error("no workshop named '{0}' in the ledger")]
    TargetNotFound(String),

    /// The desired set cannot be planned at all. Raised before any
    /// multiplexer call is made.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The tmux control surface cannot be reached.
    #[error("tmux is unavailable: {0}")]
    MultiplexerUnavailable(String),

    /// One action of an otherwise valid plan failed. Earlier actions are
    /// already applied; re-running `apply` plans only the remainder.
    #[error("action {index} ({description}) failed: {source}")]
    ActionFailed {
        index: usize,
        description: String,
        #[source]
        source: MuxError,
    },

    /// Another apply is already in flight for the same session.
    #[error("another apply is already running for session '{0}'")]
    LockBusy(String),

    /// Cancelled between actions. The session is in a consistent
    /// intermediate state; re-running `apply` finishes convergence.
    #[error("interrupted after {completed} action(s); re-run apply to finish")]
    Interrupted { completed: usize },

    /// The ledger file is missing or malformed.
    #[error("ledger: {0}")]
    Ledger(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
