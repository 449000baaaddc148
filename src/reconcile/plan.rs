use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::tmux::{BENCH_OPTION, HOLDING_WINDOW, MEMBER_PANES};

use super::state::{ObservedSession, ObservedWindow};

/// Target topology for one session, projected from the ledger.
///
/// Rebuilt fresh on every invocation; nothing desired-side is persisted
/// outside the ledger itself.
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// Session name, unique in the multiplexer namespace.
    pub session: String,
    /// Workshop root, used as the start path for the session itself and
    /// the holding window.
    pub root: PathBuf,
    /// Active workbenches in ledger order. Order is caller-controlled and
    /// decides member window ordering in the plan.
    pub members: Vec<DesiredMember>,
}

#[derive(Debug, Clone)]
pub struct DesiredMember {
    pub id: String,
    /// Window name, unique within the session.
    pub name: String,
    pub path: PathBuf,
}

/// One corrective step. Mutation targets are window/pane ids where the
/// resource already exists, names where it is created within this plan.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    CreateSession {
        session: String,
        path: PathBuf,
    },
    CreateWindow {
        name: String,
        path: PathBuf,
        /// Workbench id for a member window; `None` for the holding window.
        bench: Option<String>,
    },
    RelocatePane {
        pane: String,
        from_window: String,
        pane_index: u32,
    },
    PruneDeadPane {
        pane: String,
        pane_index: u32,
    },
    KillWindow {
        window: String,
        window_name: String,
    },
    ReconcileLayout {
        window: String,
        window_name: String,
    },
    SetWindowOption {
        window: String,
        window_name: String,
        key: String,
        value: String,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CreateSession { session, path } => {
                write!(f, "create session '{}' at {}", session, path.display())
            }
            Action::CreateWindow { name, path, bench } => match bench {
                Some(_) => write!(f, "create window '{}' at {}", name, path.display()),
                None => write!(f, "create holding window"),
            },
            Action::RelocatePane {
                from_window,
                pane_index,
                ..
            } => {
                write!(f, "relocate pane {}.{} to holding", from_window, pane_index)
            }
            Action::PruneDeadPane { pane_index, .. } => {
                write!(f, "prune dead pane {} from holding", pane_index)
            }
            Action::KillWindow { window_name, .. } => {
                write!(f, "kill window '{}'", window_name)
            }
            Action::ReconcileLayout { window_name, .. } => {
                write!(f, "apply canonical layout to '{}'", window_name)
            }
            Action::SetWindowOption {
                window_name, key, ..
            } => {
                write!(f, "tag window '{}' with {}", window_name, key)
            }
        }
    }
}

/// Per-window rollup for human display only; execution never reads it.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub name: String,
    pub is_holding: bool,
    pub pane_count: usize,
    pub dead_pane_count: usize,
    pub healthy: bool,
}

/// Computed corrective actions plus the display rollup. Immutable once
/// computed; empty `actions` is the convergence fixed point.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub session: String,
    pub session_exists: bool,
    pub windows: Vec<WindowSummary>,
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Pure diff of desired against observed state. No I/O; identical inputs
/// always yield an identical, identically-ordered plan.
///
/// Emission order is fixed: session, window creates, relocations and
/// kills, holding prunes, layout, tagging. The executor replays actions
/// in exactly this order, so later actions may assume the topology the
/// earlier ones produce.
pub fn plan(desired: &DesiredState, observed: &ObservedSession) -> Plan {
    let mut actions = Vec::new();

    if !observed.exists {
        actions.push(Action::CreateSession {
            session: desired.session.clone(),
            path: desired.root.clone(),
        });
        for m in &desired.members {
            actions.push(member_create(m));
        }
        return Plan {
            session: desired.session.clone(),
            session_exists: false,
            windows: Vec::new(),
            actions,
        };
    }

    let member_names: HashSet<&str> = desired.members.iter().map(|m| m.name.as_str()).collect();

    // Classify live windows. The first window named `holding` is the
    // holding area; duplicates of it, and duplicate member names, are
    // surplus like everything else unmatched.
    let mut holding: Option<&ObservedWindow> = None;
    let mut matched: HashMap<&str, &ObservedWindow> = HashMap::new();
    let mut surplus: Vec<&ObservedWindow> = Vec::new();

    for w in &observed.windows {
        if w.is_holding() {
            if holding.is_none() {
                holding = Some(w);
            } else {
                surplus.push(w);
            }
        } else if member_names.contains(w.name.as_str()) && !matched.contains_key(w.name.as_str())
        {
            matched.insert(w.name.as_str(), w);
        } else {
            surplus.push(w);
        }
    }

    for m in &desired.members {
        if !matched.contains_key(m.name.as_str()) {
            actions.push(member_create(m));
        }
    }

    let incoming: usize = surplus.iter().map(|w| w.alive_count()).sum();
    let holding_created = incoming > 0 && holding.is_none();
    if holding_created {
        actions.push(Action::CreateWindow {
            name: HOLDING_WINDOW.to_string(),
            path: desired.root.clone(),
            bench: None,
        });
    }

    // Surplus windows: alive panes are never destroyed, they downgrade
    // into the holding area; dead panes are discarded with the window.
    for w in &surplus {
        for p in w.panes.iter().filter(|p| p.alive) {
            actions.push(Action::RelocatePane {
                pane: p.id.clone(),
                from_window: w.name.clone(),
                pane_index: p.index,
            });
        }
        actions.push(Action::KillWindow {
            window: w.id.clone(),
            window_name: w.name.clone(),
        });
    }

    // The holding area keeps no dead panes, and does not outlive its last
    // pane; it is recreated on demand.
    let mut holding_killed = false;
    let mut holding_pruned = false;
    if let Some(h) = holding {
        for p in h.panes.iter().filter(|p| !p.alive) {
            holding_pruned = true;
            actions.push(Action::PruneDeadPane {
                pane: p.id.clone(),
                pane_index: p.index,
            });
        }
        if h.alive_count() == 0 && incoming == 0 {
            holding_killed = true;
            actions.push(Action::KillWindow {
                window: h.id.clone(),
                window_name: h.name.clone(),
            });
        }
    }

    // Layout convergence. A window whose live layout string still equals
    // its recorded tag is already canonical; skipping it is the primary
    // source of idempotence. Windows created within this plan are seeded
    // canonical by the executor and need nothing here.
    for m in &desired.members {
        if let Some(w) = matched.get(m.name.as_str()) {
            if w.layout_tag.as_deref() != Some(w.layout.as_str()) {
                actions.push(Action::ReconcileLayout {
                    window: w.id.clone(),
                    window_name: w.name.clone(),
                });
            }
        }
    }
    match holding {
        Some(h) if !holding_killed => {
            let stale = h.layout_tag.as_deref() != Some(h.layout.as_str());
            if incoming > 0 || holding_pruned || stale {
                actions.push(Action::ReconcileLayout {
                    window: h.id.clone(),
                    window_name: h.name.clone(),
                });
            }
        }
        None if holding_created => {
            actions.push(Action::ReconcileLayout {
                window: HOLDING_WINDOW.to_string(),
                window_name: HOLDING_WINDOW.to_string(),
            });
        }
        _ => {}
    }

    // Re-tag member windows whose recorded workbench id drifted (window
    // adopted from a manual create, or a bench re-pointed in the ledger).
    for m in &desired.members {
        if let Some(w) = matched.get(m.name.as_str()) {
            if w.bench_tag.as_deref() != Some(m.id.as_str()) {
                actions.push(Action::SetWindowOption {
                    window: w.id.clone(),
                    window_name: w.name.clone(),
                    key: BENCH_OPTION.to_string(),
                    value: m.id.clone(),
                });
            }
        }
    }

    let windows = observed
        .windows
        .iter()
        .map(|w| summarize(w, &member_names))
        .collect();

    Plan {
        session: desired.session.clone(),
        session_exists: true,
        windows,
        actions,
    }
}

fn member_create(m: &DesiredMember) -> Action {
    Action::CreateWindow {
        name: m.name.clone(),
        path: m.path.clone(),
        bench: Some(m.id.clone()),
    }
}

fn summarize(w: &ObservedWindow, member_names: &HashSet<&str>) -> WindowSummary {
    let dead = w.dead_count();
    let healthy = if w.is_holding() {
        dead == 0
    } else if member_names.contains(w.name.as_str()) {
        dead == 0 && w.panes.len() == MEMBER_PANES
    } else {
        false
    };

    WindowSummary {
        name: w.name.clone(),
        is_holding: w.is_holding(),
        pane_count: w.panes.len(),
        dead_pane_count: dead,
        healthy,
    }
}
