mod client;

pub use client::TmuxClient;

#[cfg(test)]
pub mod fake;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved window name for the holding area. Never a workbench window;
/// at most one per session.
pub const HOLDING_WINDOW: &str = "holding";

/// Layout applied to every converged window.
pub const CANONICAL_LAYOUT: &str = "main-vertical";

/// Window option recording the workbench id the window belongs to.
pub const BENCH_OPTION: &str = "@foreman_bench";

/// Window option recording the layout string captured right after the
/// canonical layout was last applied. A live layout string that differs
/// from this tag means the window drifted and needs reconciliation.
pub const LAYOUT_OPTION: &str = "@foreman_layout";

/// Pane option persisting the pane's role.
pub const ROLE_OPTION: &str = "@foreman_role";

/// Window option marking the enricher's last pass.
pub const ENRICHED_OPTION: &str = "@foreman_enriched";

/// Pane count of a fully equipped workbench window.
pub const MEMBER_PANES: usize = 3;

/// Role of a pane within a workbench window.
///
/// Persisted as a pane option; the positional mapping is the fallback for
/// panes created outside foreman.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaneRole {
    Editor,
    Agent,
    Shell,
}

impl PaneRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaneRole::Editor => "editor",
            PaneRole::Agent => "agent",
            PaneRole::Shell => "shell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "editor" => Some(PaneRole::Editor),
            "agent" => Some(PaneRole::Agent),
            "shell" => Some(PaneRole::Shell),
            _ => None,
        }
    }

    /// Positional fallback: pane 0 edits, pane 1 runs the agent,
    /// everything after is a shell.
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => PaneRole::Editor,
            1 => PaneRole::Agent,
            _ => PaneRole::Shell,
        }
    }
}

/// One window as reported by the multiplexer.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    /// Server-unique window id (e.g. "@3"), usable as a target.
    pub id: String,
    pub index: u32,
    pub name: String,
    /// Live layout string as tmux reports it.
    pub layout: String,
    /// Value of [`LAYOUT_OPTION`], if set.
    pub layout_tag: Option<String>,
    /// Value of [`BENCH_OPTION`], if set.
    pub bench_tag: Option<String>,
}

/// One pane as reported by the multiplexer.
#[derive(Debug, Clone)]
pub struct PaneInfo {
    /// Server-unique pane id (e.g. "%5"). Indexes renumber as panes move;
    /// ids do not, so mutations always target the id.
    pub id: String,
    pub index: u32,
    /// Pid of the pane's controlling process.
    pub pid: i32,
    /// Whether the multiplexer itself marks the pane dead
    /// (process exited under remain-on-exit).
    pub dead: bool,
    /// Value of [`ROLE_OPTION`], if set and recognized.
    pub role_tag: Option<PaneRole>,
}

/// Failures of the multiplexer control surface.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The tmux binary cannot be spawned at all.
    #[error("cannot reach tmux: {0}")]
    Unavailable(String),

    /// A tmux command ran but reported failure.
    #[error("tmux {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// Output did not match the requested format string.
    #[error("unparseable tmux output: {0}")]
    Parse(String),
}

/// Narrow capability surface over the terminal multiplexer.
///
/// Everything the reconciliation engine touches goes through this trait so
/// the planner, executor and enricher can run against an in-memory fake
/// with zero subprocess calls.
///
/// Window targets accept either a window name or a server-unique window id
/// ("@N"). Pane mutations target server-unique pane ids ("%N"), since
/// indexes renumber as panes move; only pane options set right after
/// window creation go by index.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Whether the named session exists. A stopped tmux server is a normal
    /// "no" answer, not an error.
    async fn session_exists(&self, session: &str) -> Result<bool, MuxError>;

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError>;

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>, MuxError>;

    /// Creates a detached session. tmux forcibly creates one window along
    /// with it; its id is returned so the caller can dispose of it once a
    /// real window exists.
    async fn new_session(&self, session: &str, start_path: &Path) -> Result<String, MuxError>;

    async fn new_window(
        &self,
        session: &str,
        name: &str,
        start_path: &Path,
    ) -> Result<(), MuxError>;

    /// Adds one pane to an existing window.
    async fn split_window(
        &self,
        session: &str,
        window: &str,
        start_path: &Path,
    ) -> Result<(), MuxError>;

    /// Moves a pane into an existing window. The source window dies with
    /// its last pane, as tmux semantics dictate.
    async fn move_pane(
        &self,
        session: &str,
        pane_id: &str,
        to_window: &str,
    ) -> Result<(), MuxError>;

    /// Moves a pane out into a brand-new window with the given name.
    async fn break_pane(
        &self,
        session: &str,
        pane_id: &str,
        new_window: &str,
    ) -> Result<(), MuxError>;

    /// Succeeds if the window is already gone: the postcondition is
    /// "window absent", which relocating its last pane may have achieved
    /// on its own.
    async fn kill_window(&self, session: &str, window: &str) -> Result<(), MuxError>;

    async fn kill_pane(&self, pane_id: &str) -> Result<(), MuxError>;

    async fn select_layout(
        &self,
        session: &str,
        window: &str,
        layout: &str,
    ) -> Result<(), MuxError>;

    /// Live layout string of a window.
    async fn window_layout(&self, session: &str, window: &str) -> Result<String, MuxError>;

    async fn set_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError>;

    async fn get_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
    ) -> Result<Option<String>, MuxError>;

    async fn set_pane_option(
        &self,
        session: &str,
        window: &str,
        pane: u32,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError>;

    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<(), MuxError>;

    /// Registers a global key binding. Repeating a registration is a
    /// no-op as far as tmux is concerned.
    async fn bind_key(&self, key: &str, command: &[&str]) -> Result<(), MuxError>;

    /// Command line to attach to a session, for external execution with
    /// inherited stdio.
    fn attach_command(&self, session: &str) -> Vec<String>;
}
