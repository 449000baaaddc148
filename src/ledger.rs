//! Read-only projection of the workshop ledger into desired session
//! topology. The ledger itself (and all CRUD on it) lives elsewhere;
//! foreman only ever looks things up.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForemanError;
use crate::reconcile::plan::{DesiredMember, DesiredState};
use crate::tmux::HOLDING_WINDOW;

/// One workspace, mapped to one tmux session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workshop {
    pub id: String,
    pub name: String,
    pub root: PathBuf,
}

/// One unit of work, mapped to one tmux window while active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workbench {
    pub id: String,
    pub workshop_id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub workshops: Vec<Workshop>,
    #[serde(default)]
    pub workbenches: Vec<Workbench>,
}

impl Ledger {
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foreman")
            .join("ledger.json")
    }

    pub fn load(path: &Path) -> Result<Self, ForemanError> {
        debug!(path = %path.display(), "loading ledger");
        let raw = fs::read_to_string(path)
            .map_err(|e| ForemanError::Ledger(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| ForemanError::Ledger(format!("{}: {}", path.display(), e)))
    }

    pub fn workshop_by_name(&self, name: &str) -> Option<&Workshop> {
        self.workshops.iter().find(|w| w.name == name)
    }

    /// The workshop whose root contains `dir`, innermost root winning when
    /// workshops nest.
    pub fn workshop_for_dir(&self, dir: &Path) -> Option<&Workshop> {
        self.workshops
            .iter()
            .filter(|w| dir.starts_with(&w.root))
            .max_by_key(|w| w.root.components().count())
    }

    /// Workbenches of one workshop in ledger (creation) order, which is
    /// also the window order the planner will produce.
    pub fn benches_for<'a>(&'a self, workshop_id: &'a str) -> impl Iterator<Item = &'a Workbench> + 'a {
        self.workbenches
            .iter()
            .filter(move |b| b.workshop_id == workshop_id)
    }
}

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Collapses anything tmux targets would choke on (':', '.', spaces, ...)
/// into dashes.
pub fn sanitize_name(name: &str) -> String {
    UNSAFE_CHARS
        .replace_all(name, "-")
        .trim_matches('-')
        .to_string()
}

/// Resolves `target` and projects its active workbenches into the desired
/// topology. Every violation here is caught before the multiplexer is
/// touched at all.
pub fn desired_state(ledger: &Ledger, target: &str) -> Result<DesiredState, ForemanError> {
    let workshop = ledger
        .workshop_by_name(target)
        .ok_or_else(|| ForemanError::TargetNotFound(target.to_string()))?;
    desired_for_workshop(ledger, workshop)
}

pub fn desired_for_workshop(
    ledger: &Ledger,
    workshop: &Workshop,
) -> Result<DesiredState, ForemanError> {
    let session = sanitize_name(&workshop.name);
    if session.is_empty() {
        return Err(ForemanError::Precondition(format!(
            "workshop name '{}' leaves nothing usable as a session name",
            workshop.name
        )));
    }
    if !workshop.root.is_dir() {
        return Err(ForemanError::Precondition(format!(
            "workshop root {} is missing or not a directory",
            workshop.root.display()
        )));
    }

    let mut members = Vec::new();
    let mut seen = HashSet::new();
    for bench in ledger.benches_for(&workshop.id).filter(|b| b.active) {
        let name = sanitize_name(&bench.name);
        if name.is_empty() {
            return Err(ForemanError::Precondition(format!(
                "workbench '{}' leaves nothing usable as a window name",
                bench.name
            )));
        }
        if name == HOLDING_WINDOW {
            return Err(ForemanError::Precondition(format!(
                "workbench name '{}' collides with the reserved holding window",
                bench.name
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(ForemanError::Precondition(format!(
                "two active workbenches map to the window name '{}'",
                name
            )));
        }
        if !bench.path.is_dir() {
            return Err(ForemanError::Precondition(format!(
                "workbench '{}' path {} is missing or not a directory",
                bench.name,
                bench.path.display()
            )));
        }
        if !bench.path.starts_with(&workshop.root) {
            return Err(ForemanError::Precondition(format!(
                "workbench '{}' path {} is outside the workshop root {}",
                bench.name,
                bench.path.display(),
                workshop.root.display()
            )));
        }

        members.push(DesiredMember {
            id: bench.id.clone(),
            name,
            path: bench.path.clone(),
        });
    }

    if members.is_empty() {
        return Err(ForemanError::Precondition(format!(
            "workshop '{}' has no active workbenches",
            workshop.name
        )));
    }

    Ok(DesiredState {
        session,
        root: workshop.root.clone(),
        members,
    })
}
