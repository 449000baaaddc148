//! In-memory [`Multiplexer`] with real tmux semantics: windows die with
//! their last pane, indexes renumber, ids stay stable. Records every
//! operation and can inject failures per command name.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    MuxError, Multiplexer, PaneInfo, PaneRole, WindowInfo, BENCH_OPTION, LAYOUT_OPTION,
    ROLE_OPTION,
};

#[derive(Default)]
pub struct FakeMux {
    state: Mutex<State>,
    ops: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

#[derive(Default)]
struct State {
    sessions: BTreeMap<String, Session>,
    next_window: u32,
    next_pane: u32,
}

#[derive(Default)]
struct Session {
    windows: Vec<Window>,
}

struct Window {
    id: String,
    index: u32,
    name: String,
    layout_name: String,
    options: BTreeMap<String, String>,
    panes: Vec<Pane>,
}

impl Window {
    /// Stand-in for tmux's layout string: changes whenever the layout or
    /// the pane count changes, which is what the planner's drift check
    /// relies on.
    fn layout_string(&self) -> String {
        format!("{}/{}", self.layout_name, self.panes.len())
    }
}

struct Pane {
    id: String,
    dead: bool,
    options: BTreeMap<String, String>,
    title: Option<String>,
}

impl State {
    fn fresh_window(&mut self, name: &str) -> Window {
        let index = self.next_window;
        self.next_window += 1;
        Window {
            id: format!("@{}", index),
            index,
            name: name.to_string(),
            layout_name: "default".to_string(),
            options: BTreeMap::new(),
            panes: Vec::new(),
        }
    }

    fn fresh_pane(&mut self, dead: bool) -> Pane {
        let id = format!("%{}", self.next_pane);
        self.next_pane += 1;
        Pane {
            id,
            dead,
            options: BTreeMap::new(),
            title: None,
        }
    }

    fn session_mut(&mut self, name: &str) -> Result<&mut Session, MuxError> {
        self.sessions.get_mut(name).ok_or_else(|| MuxError::Command {
            command: "target".to_string(),
            stderr: format!("can't find session: {}", name),
        })
    }

    /// Pulls a pane out of whatever window holds it; the window dies with
    /// its last pane.
    fn take_pane(&mut self, session: &str, pane_id: &str) -> Result<Pane, MuxError> {
        let s = self.session_mut(session)?;
        let found = s.windows.iter().enumerate().find_map(|(wi, w)| {
            w.panes
                .iter()
                .position(|p| p.id == pane_id)
                .map(|pi| (wi, pi))
        });
        let (wi, pi) = found.ok_or_else(|| MuxError::Command {
            command: "target".to_string(),
            stderr: format!("can't find pane: {}", pane_id),
        })?;

        let pane = s.windows[wi].panes.remove(pi);
        if s.windows[wi].panes.is_empty() {
            s.windows.remove(wi);
        }
        Ok(pane)
    }
}

fn resolve<'a>(session: &'a mut Session, target: &str) -> Result<&'a mut Window, MuxError> {
    let found = if target.starts_with('@') {
        session.windows.iter_mut().find(|w| w.id == target)
    } else {
        session.windows.iter_mut().find(|w| w.name == target)
    };
    found.ok_or_else(|| MuxError::Command {
        command: "target".to_string(),
        stderr: format!("can't find window: {}", target),
    })
}

/// Seeding handle for one session's initial topology.
pub struct SessionSeed<'a> {
    state: &'a mut State,
    name: String,
}

impl SessionSeed<'_> {
    pub fn window(&mut self, name: &str, f: impl FnOnce(&mut WindowSeed)) {
        let mut window = self.state.fresh_window(name);
        {
            let mut seed = WindowSeed {
                state: &mut *self.state,
                window: &mut window,
            };
            f(&mut seed);
        }
        self.state
            .sessions
            .get_mut(&self.name)
            .expect("seeded session")
            .windows
            .push(window);
    }
}

pub struct WindowSeed<'a> {
    state: &'a mut State,
    window: &'a mut Window,
}

impl WindowSeed<'_> {
    pub fn pane_alive(&mut self) {
        let pane = self.state.fresh_pane(false);
        self.window.panes.push(pane);
    }

    pub fn pane_dead(&mut self) {
        let pane = self.state.fresh_pane(true);
        self.window.panes.push(pane);
    }

    pub fn option(&mut self, key: &str, value: &str) {
        self.window
            .options
            .insert(key.to_string(), value.to_string());
    }

    /// Marks the window as already converged: layout tag equals the live
    /// layout string.
    pub fn canonical(&mut self) {
        let layout = self.window.layout_string();
        self.window
            .options
            .insert(LAYOUT_OPTION.to_string(), layout);
    }
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_session(&self, name: &str, f: impl FnOnce(&mut SessionSeed)) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(name.to_string(), Session::default());
        let mut seed = SessionSeed {
            state: &mut state,
            name: name.to_string(),
        };
        f(&mut seed);
    }

    /// Pid reported for alive panes. The reader probes it with `kill(0)`,
    /// so it must be a process that actually exists and is ours.
    fn alive_pid() -> i32 {
        std::process::id() as i32
    }

    /// Every subsequent call of the named command fails.
    pub fn fail_on(&self, command: &str) {
        *self.fail_on.lock().unwrap() = Some(command.to_string());
    }

    pub fn clear_failures(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.state.lock().unwrap().sessions.contains_key(name)
    }

    pub fn window_names(&self, session: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session)
            .map(|s| s.windows.iter().map(|w| w.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pane_count(&self, session: &str, window: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session)
            .and_then(|s| s.windows.iter().find(|w| w.name == window || w.id == window))
            .map(|w| w.panes.len())
            .unwrap_or(0)
    }

    pub fn pane_titles(&self, session: &str, window: &str) -> Vec<Option<String>> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session)
            .and_then(|s| s.windows.iter().find(|w| w.name == window))
            .map(|w| w.panes.iter().map(|p| p.title.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, command: &str, detail: String) -> Result<(), MuxError> {
        self.ops.lock().unwrap().push(format!("{} {}", command, detail));
        if self.fail_on.lock().unwrap().as_deref() == Some(command) {
            return Err(MuxError::Command {
                command: command.to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

const DEAD_PID: i32 = 999_999_999;

#[async_trait]
impl Multiplexer for FakeMux {
    async fn session_exists(&self, session: &str) -> Result<bool, MuxError> {
        self.record("has-session", session.to_string())?;
        Ok(self.state.lock().unwrap().sessions.contains_key(session))
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError> {
        self.record("list-windows", session.to_string())?;
        let mut state = self.state.lock().unwrap();
        let s = state.session_mut(session)?;
        let mut windows: Vec<WindowInfo> = s
            .windows
            .iter()
            .map(|w| WindowInfo {
                id: w.id.clone(),
                index: w.index,
                name: w.name.clone(),
                layout: w.layout_string(),
                layout_tag: w.options.get(LAYOUT_OPTION).cloned(),
                bench_tag: w.options.get(BENCH_OPTION).cloned(),
            })
            .collect();
        windows.sort_by_key(|w| w.index);
        Ok(windows)
    }

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>, MuxError> {
        self.record("list-panes", format!("{} {}", session, window))?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        Ok(w.panes
            .iter()
            .enumerate()
            .map(|(index, p)| PaneInfo {
                id: p.id.clone(),
                index: index as u32,
                pid: if p.dead { DEAD_PID } else { Self::alive_pid() },
                dead: p.dead,
                role_tag: p.options.get(ROLE_OPTION).and_then(|r| PaneRole::parse(r)),
            })
            .collect())
    }

    async fn new_session(&self, session: &str, start_path: &Path) -> Result<String, MuxError> {
        self.record(
            "new-session",
            format!("{} {}", session, start_path.display()),
        )?;
        let mut state = self.state.lock().unwrap();
        if state.sessions.contains_key(session) {
            return Err(MuxError::Command {
                command: "new-session".to_string(),
                stderr: format!("duplicate session: {}", session),
            });
        }
        // tmux never creates an empty session: a bootstrap window with one
        // shell pane comes with it.
        let mut window = state.fresh_window("zsh");
        let pane = state.fresh_pane(false);
        window.panes.push(pane);
        let id = window.id.clone();
        state
            .sessions
            .insert(session.to_string(), Session { windows: vec![window] });
        Ok(id)
    }

    async fn new_window(
        &self,
        session: &str,
        name: &str,
        start_path: &Path,
    ) -> Result<(), MuxError> {
        self.record(
            "new-window",
            format!("{} {} {}", session, name, start_path.display()),
        )?;
        let mut state = self.state.lock().unwrap();
        let mut window = state.fresh_window(name);
        let pane = state.fresh_pane(false);
        window.panes.push(pane);
        state.session_mut(session)?.windows.push(window);
        Ok(())
    }

    async fn split_window(
        &self,
        session: &str,
        window: &str,
        start_path: &Path,
    ) -> Result<(), MuxError> {
        self.record(
            "split-window",
            format!("{} {} {}", session, window, start_path.display()),
        )?;
        let mut state = self.state.lock().unwrap();
        let pane = state.fresh_pane(false);
        let w = resolve(state.session_mut(session)?, window)?;
        w.panes.push(pane);
        Ok(())
    }

    async fn move_pane(
        &self,
        session: &str,
        pane_id: &str,
        to_window: &str,
    ) -> Result<(), MuxError> {
        self.record("join-pane", format!("{} {} {}", session, pane_id, to_window))?;
        let mut state = self.state.lock().unwrap();
        // Target first: a missing target must not eat the source pane.
        resolve(state.session_mut(session)?, to_window)?;
        let pane = state.take_pane(session, pane_id)?;
        let w = resolve(state.session_mut(session)?, to_window)?;
        w.panes.push(pane);
        Ok(())
    }

    async fn break_pane(
        &self,
        session: &str,
        pane_id: &str,
        new_window: &str,
    ) -> Result<(), MuxError> {
        self.record(
            "break-pane",
            format!("{} {} {}", session, pane_id, new_window),
        )?;
        let mut state = self.state.lock().unwrap();
        let pane = state.take_pane(session, pane_id)?;
        let mut window = state.fresh_window(new_window);
        window.panes.push(pane);
        state.session_mut(session)?.windows.push(window);
        Ok(())
    }

    async fn kill_window(&self, session: &str, window: &str) -> Result<(), MuxError> {
        self.record("kill-window", format!("{} {}", session, window))?;
        let mut state = self.state.lock().unwrap();
        let s = state.session_mut(session)?;
        // Already gone is success: the postcondition holds.
        s.windows
            .retain(|w| !(w.id == window || w.name == window));
        Ok(())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), MuxError> {
        self.record("kill-pane", pane_id.to_string())?;
        let mut state = self.state.lock().unwrap();
        let sessions: Vec<String> = state.sessions.keys().cloned().collect();
        for name in sessions {
            if state.take_pane(&name, pane_id).is_ok() {
                return Ok(());
            }
        }
        Err(MuxError::Command {
            command: "kill-pane".to_string(),
            stderr: format!("can't find pane: {}", pane_id),
        })
    }

    async fn select_layout(
        &self,
        session: &str,
        window: &str,
        layout: &str,
    ) -> Result<(), MuxError> {
        self.record(
            "select-layout",
            format!("{} {} {}", session, window, layout),
        )?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        w.layout_name = layout.to_string();
        Ok(())
    }

    async fn window_layout(&self, session: &str, window: &str) -> Result<String, MuxError> {
        self.record("display-layout", format!("{} {}", session, window))?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        Ok(w.layout_string())
    }

    async fn set_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        self.record(
            "set-window-option",
            format!("{} {} {}={}", session, window, key, value),
        )?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        w.options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_window_option(
        &self,
        session: &str,
        window: &str,
        key: &str,
    ) -> Result<Option<String>, MuxError> {
        self.record("show-window-option", format!("{} {} {}", session, window, key))?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        Ok(w.options.get(key).cloned())
    }

    async fn set_pane_option(
        &self,
        session: &str,
        window: &str,
        pane: u32,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        self.record(
            "set-pane-option",
            format!("{} {}.{} {}={}", session, window, pane, key, value),
        )?;
        let mut state = self.state.lock().unwrap();
        let w = resolve(state.session_mut(session)?, window)?;
        let p = w
            .panes
            .get_mut(pane as usize)
            .ok_or_else(|| MuxError::Command {
                command: "set-pane-option".to_string(),
                stderr: format!("can't find pane: {}", pane),
            })?;
        p.options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<(), MuxError> {
        self.record("select-pane", format!("{} -T {}", pane_id, title))?;
        let mut state = self.state.lock().unwrap();
        for s in state.sessions.values_mut() {
            for w in s.windows.iter_mut() {
                if let Some(p) = w.panes.iter_mut().find(|p| p.id == pane_id) {
                    p.title = Some(title.to_string());
                    return Ok(());
                }
            }
        }
        Err(MuxError::Command {
            command: "select-pane".to_string(),
            stderr: format!("can't find pane: {}", pane_id),
        })
    }

    async fn bind_key(&self, key: &str, command: &[&str]) -> Result<(), MuxError> {
        self.record("bind-key", format!("{} {}", key, command.join(" ")))
    }

    fn attach_command(&self, session: &str) -> Vec<String> {
        vec![
            "tmux".to_string(),
            "attach-session".to_string(),
            "-t".to_string(),
            format!("={}", session),
        ]
    }
}
