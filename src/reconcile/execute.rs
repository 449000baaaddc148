use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ForemanError;
use crate::tmux::{
    Multiplexer, MuxError, PaneRole, BENCH_OPTION, CANONICAL_LAYOUT, HOLDING_WINDOW,
    LAYOUT_OPTION, MEMBER_PANES, ROLE_OPTION,
};

use super::plan::{Action, Plan};

/// Cooperative cancellation, checked between actions only. An action is
/// never abandoned halfway: a relocation without its matching source kill
/// would leave the session in a state no re-plan can explain.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ExecReport {
    pub completed: usize,
}

/// Applies a plan's actions strictly in emission order, stopping at the
/// first failure. No rollback: a fresh plan computed against the
/// partially-converged session contains exactly the remaining work, so
/// re-running `apply` is always the recovery path.
pub async fn execute(
    mux: &dyn Multiplexer,
    plan: &Plan,
    cancel: &CancelFlag,
) -> Result<ExecReport, ForemanError> {
    let mut exec = Execution {
        mux,
        session: &plan.session,
        bootstrap: None,
        holding_pending: false,
    };

    for (index, action) in plan.actions.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(completed = index, "apply cancelled between actions");
            return Err(ForemanError::Interrupted { completed: index });
        }

        debug!(index, %action, "executing");
        exec.apply(action)
            .await
            .map_err(|source| ForemanError::ActionFailed {
                index,
                description: action.to_string(),
                source,
            })?;
    }

    Ok(ExecReport {
        completed: plan.actions.len(),
    })
}

struct Execution<'a> {
    mux: &'a dyn Multiplexer,
    session: &'a str,
    /// Window id of the throwaway window tmux created alongside the
    /// session, disposed of once the first real window exists.
    bootstrap: Option<String>,
    /// Set when the plan created the holding window: it materializes out
    /// of the first relocated pane instead of an empty shell window.
    holding_pending: bool,
}

impl Execution<'_> {
    async fn apply(&mut self, action: &Action) -> Result<(), MuxError> {
        match action {
            Action::CreateSession { session, path } => {
                let bootstrap = self.mux.new_session(session, path).await?;
                self.bootstrap = Some(bootstrap);
                Ok(())
            }
            Action::CreateWindow {
                name,
                path,
                bench: Some(bench),
            } => self.create_member_window(name, path, bench).await,
            Action::CreateWindow { bench: None, .. } => {
                self.holding_pending = true;
                Ok(())
            }
            Action::RelocatePane { pane, .. } => {
                if self.holding_pending {
                    self.holding_pending = false;
                    self.mux
                        .break_pane(self.session, pane, HOLDING_WINDOW)
                        .await
                } else {
                    self.mux.move_pane(self.session, pane, HOLDING_WINDOW).await
                }
            }
            Action::PruneDeadPane { pane, .. } => self.mux.kill_pane(pane).await,
            Action::KillWindow { window, .. } => {
                self.mux.kill_window(self.session, window).await
            }
            Action::ReconcileLayout { window, .. } => self.reconcile_layout(window).await,
            Action::SetWindowOption {
                window, key, value, ..
            } => {
                self.mux
                    .set_window_option(self.session, window, key, value)
                    .await
            }
        }
    }

    async fn create_member_window(
        &mut self,
        name: &str,
        path: &std::path::Path,
        bench: &str,
    ) -> Result<(), MuxError> {
        self.mux.new_window(self.session, name, path).await?;

        // tmux sessions always hold at least one window; the bootstrap one
        // is only disposable now that a real window exists.
        if let Some(bootstrap) = self.bootstrap.take() {
            self.mux.kill_window(self.session, &bootstrap).await?;
        }

        for _ in 1..MEMBER_PANES {
            self.mux.split_window(self.session, name, path).await?;
        }

        // Tag roles by the indexes tmux actually assigned, not assumed
        // base-index-zero positions.
        let panes = self.mux.list_panes(self.session, name).await?;
        for pane in &panes {
            self.mux
                .set_pane_option(
                    self.session,
                    name,
                    pane.index,
                    ROLE_OPTION,
                    PaneRole::from_index(pane.index).as_str(),
                )
                .await?;
        }

        self.mux
            .set_window_option(self.session, name, BENCH_OPTION, bench)
            .await?;
        self.reconcile_layout(name).await
    }

    async fn reconcile_layout(&self, window: &str) -> Result<(), MuxError> {
        self.mux
            .select_layout(self.session, window, CANONICAL_LAYOUT)
            .await?;
        // Record the resulting layout string so the next plan can tell an
        // untouched window from a drifted one.
        let layout = self.mux.window_layout(self.session, window).await?;
        self.mux
            .set_window_option(self.session, window, LAYOUT_OPTION, &layout)
            .await
    }
}
