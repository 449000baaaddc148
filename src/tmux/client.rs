use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{MuxError, Multiplexer, PaneInfo, PaneRole, WindowInfo};

const WINDOW_FORMAT: &str =
    "#{window_id}|#{window_index}|#{window_layout}|#{@foreman_layout}|#{@foreman_bench}|#{window_name}";
const PANE_FORMAT: &str = "#{pane_id}|#{pane_index}|#{pane_pid}|#{pane_dead}|#{@foreman_role}";

/// Client for driving tmux via its CLI.
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        debug!(?args, "tmux");
        let output = Command::new(&self.tmux_path)
            .args(args)
            .output()
            .await
            .map_err(|e| MuxError::Unavailable(format!("{}: {}", self.tmux_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MuxError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn session_target(session: &str) -> String {
        format!("={}", session)
    }

    fn window_target(session: &str, window: &str) -> String {
        format!("={}:{}", session, window)
    }

    fn pane_target(session: &str, window: &str, pane: u32) -> String {
        format!("={}:{}.{}", session, window, pane)
    }

    /// Dead panes only stay visible for pruning if the window keeps them
    /// around after their process exits.
    async fn retain_dead_panes(&self, session: &str, window: &str) -> Result<(), MuxError> {
        let target = Self::window_target(session, window);
        self.run(&["set-option", "-w", "-t", &target, "remain-on-exit", "on"])
            .await
            .map(|_| ())
    }

    fn parse_window_line(line: &str) -> Option<WindowInfo> {
        // Window name goes last: it is the only field that may contain '|'.
        let parts: Vec<&str> = line.splitn(6, '|').collect();
        if parts.len() < 6 {
            return None;
        }

        Some(WindowInfo {
            id: parts[0].to_string(),
            index: parts[1].parse().ok()?,
            layout: parts[2].to_string(),
            layout_tag: non_empty(parts[3]),
            bench_tag: non_empty(parts[4]),
            name: parts[5].to_string(),
        })
    }

    fn parse_pane_line(line: &str) -> Option<PaneInfo> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 5 {
            return None;
        }

        Some(PaneInfo {
            id: parts[0].to_string(),
            index: parts[1].parse().ok()?,
            pid: parts[2].parse().unwrap_or(0),
            dead: parts[3] == "1",
            role_tag: PaneRole::parse(parts[4]),
        })
    }
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// Whether a tmux error means "the target is not there", as opposed to a
/// genuine command failure.
fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("can't find")
        || stderr.contains("no such")
        || stderr.contains("no sessions")
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn session_exists(&self, session: &str) -> Result<bool, MuxError> {
        let target = Self::session_target(session);
        match self.run(&["has-session", "-t", &target]).await {
            Ok(_) => Ok(true),
            Err(MuxError::Command { stderr, .. }) if is_missing_target(&stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError> {
        let target = Self::session_target(session);
        let stdout = self
            .run(&["list-windows", "-t", &target, "-F", WINDOW_FORMAT])
            .await?;

        let mut windows: Vec<WindowInfo> = stdout
            .lines()
            .filter_map(Self::parse_window_line)
            .collect();
        windows.sort_by_key(|w| w.index);
        Ok(windows)
    }

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>, MuxError> {
        let target = Self::window_target(session, window);
        let stdout = self
            .run(&["list-panes", "-t", &target, "-F", PANE_FORMAT])
            .await?;

        let mut panes: Vec<PaneInfo> = stdout.lines().filter_map(Self::parse_pane_line).collect();
        panes.sort_by_key(|p| p.index);
        Ok(panes)
    }

    async fn new_session(&self, session: &str, start_path: &Path) -> Result<String, MuxError> {
        let path = start_path.to_string_lossy();
        self.run(&["new-session", "-d", "-s", session, "-c", &path])
            .await?;

        // tmux refuses to create an empty session: record the id of the
        // window it made so the executor can dispose of it later.
        let target = Self::session_target(session);
        let bootstrap = self
            .run(&["display-message", "-p", "-t", &target, "#{window_id}"])
            .await?
            .trim()
            .to_string();
        if bootstrap.is_empty() {
            return Err(MuxError::Parse("empty window id for new session".into()));
        }
        Ok(bootstrap)
    }

    async fn new_window(
        &self,
        session: &str,
        name: &str,
        start_path: &Path,
    ) -> Result<(), MuxError> {
        let target = format!("={}:", session);
        let path = start_path.to_string_lossy();
        self.run(&["new-window", "-d", "-t", &target, "-n", name, "-c", &path])
            .await?;
        self.retain_dead_panes(session, name).await
    }

    async fn split_window(
        &self,
        session: &str,
        window: &str,
        start_path: &Path,
    ) -> Result<(), MuxError> {
        let target = Self::window_target(session, window);
        let path = start_path.to_string_lossy();
        self.run(&["split-window", "-d", "-t", &target, "-c", &path])
            .await
            .map(|_| ())
    }

    async fn move_pane(
        &self,
        session: &str,
        pane_id: &str,
        to_window: &str,
    ) -> Result<(), MuxError> {
        let target = Self::window_target(session, to_window);
        self.run(&["join-pane", "-d", "-s", pane_id, "-t", &target])
            .await
            .map(|_| ())
    }

    async fn break_pane(
        &self,
        session: &str,
        pane_id: &str,
        new_window: &str,
    ) -> Result<(), MuxError> {
        let target = format!("={}:", session);
        self.run(&["break-pane", "-d", "-s", pane_id, "-n", new_window, "-t", &target])
            .await?;
        self.retain_dead_panes(session, new_window).await
    }

    async fn kill_window(&self, session: &str, window: &str) -> Result<(), MuxError> {
        let target = Self::window_target(session, window);
        match self.run(&["kill-window", "-t", &target]).await {
            Ok(_) => Ok(()),
            Err(MuxError::Command { stderr, .. }) if is_missing_target(&stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), MuxError> {
        self.run(&["kill-pane", "-t", pane_id]).await.map(|_| ())
    }

    async fn select_layout(
        &self,
        session: &str,
        window: &str,
        layout: &str,
    ) -> Result<(), MuxError> {
        let target = Self::window_target(session, window);
        self.run(&["select-layout", "-t", &target, layout])
            .await
            .map(|_| ())
    }

    async fn window_layout(&self, session: &str, window: &str) -> Result<String, MuxError> {
        let target = Self::window_target(session, window);
        let stdout = self
            .run(&["display-message", "-p", "-t", &target, "#{window_layout}"])
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn set_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        let target = Self::window_target(session, window);
        self.run(&["set-option", "-w", "-t", &target, key, value])
            .await
            .map(|_| ())
    }

    async fn get_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
    ) -> Result<Option<String>, MuxError> {
        let target = Self::window_target(session, window);
        let stdout = self
            .run(&["show-options", "-w", "-q", "-v", "-t", &target, key])
            .await?;
        Ok(non_empty(stdout.trim()))
    }

    async fn set_pane_option(
        &self,
        session: &str,
        window: &str,
        pane: u32,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        let target = Self::pane_target(session, window, pane);
        self.run(&["set-option", "-p", "-t", &target, key, value])
            .await
            .map(|_| ())
    }

    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<(), MuxError> {
        self.run(&["select-pane", "-t", pane_id, "-T", title])
            .await
            .map(|_| ())
    }

    async fn bind_key(&self, key: &str, command: &[&str]) -> Result<(), MuxError> {
        let mut args = vec!["bind-key", key];
        args.extend_from_slice(command);
        self.run(&args).await.map(|_| ())
    }

    fn attach_command(&self, session: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            Self::session_target(session),
        ]
    }
}
