use tracing::debug;

use crate::tmux::{MuxError, Multiplexer, PaneRole, HOLDING_WINDOW};

/// Snapshot of one live session, read fresh on every invocation.
///
/// Staleness is never acceptable for an engine acting on live processes,
/// so nothing here is cached across invocations.
#[derive(Debug, Clone)]
pub struct ObservedSession {
    pub name: String,
    pub exists: bool,
    pub windows: Vec<ObservedWindow>,
}

impl ObservedSession {
    pub fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            windows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservedWindow {
    /// Server-unique id, the preferred action target.
    pub id: String,
    pub index: u32,
    pub name: String,
    pub layout: String,
    pub layout_tag: Option<String>,
    pub bench_tag: Option<String>,
    pub panes: Vec<ObservedPane>,
}

impl ObservedWindow {
    pub fn is_holding(&self) -> bool {
        self.name == HOLDING_WINDOW
    }

    pub fn alive_count(&self) -> usize {
        self.panes.iter().filter(|p| p.alive).count()
    }

    pub fn dead_count(&self) -> usize {
        self.panes.iter().filter(|p| !p.alive).count()
    }
}

#[derive(Debug, Clone)]
pub struct ObservedPane {
    /// Server-unique id (e.g. "%5"), stable across pane renumbering.
    pub id: String,
    pub index: u32,
    pub alive: bool,
    pub role: PaneRole,
}

/// Reads the full live topology of `session`. Absence of the session is a
/// normal answer, not an error; only an unreachable control surface fails.
pub async fn observe(mux: &dyn Multiplexer, session: &str) -> Result<ObservedSession, MuxError> {
    if !mux.session_exists(session).await? {
        debug!(session, "session absent");
        return Ok(ObservedSession::absent(session));
    }

    let mut windows = Vec::new();
    for info in mux.list_windows(session).await? {
        let panes = mux
            .list_panes(session, &info.id)
            .await?
            .into_iter()
            .map(|p| ObservedPane {
                alive: !p.dead && pid_alive(p.pid),
                role: p.role_tag.unwrap_or_else(|| PaneRole::from_index(p.index)),
                id: p.id,
                index: p.index,
            })
            .collect();

        windows.push(ObservedWindow {
            id: info.id,
            index: info.index,
            name: info.name,
            layout: info.layout,
            layout_tag: info.layout_tag,
            bench_tag: info.bench_tag,
            panes,
        });
    }

    debug!(session, windows = windows.len(), "observed");
    Ok(ObservedSession {
        name: session.to_string(),
        exists: true,
        windows,
    })
}

/// The multiplexer keeps a dead pane's row visible until it is pruned, so
/// a pane counts as alive only while its controlling process still runs.
fn pid_alive(pid: i32) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}
