use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::ForemanError;
use crate::ledger::{self, Ledger};
use crate::lock::SessionLock;
use crate::reconcile::enrich::enrich;
use crate::reconcile::execute::{execute, CancelFlag};
use crate::reconcile::plan::{plan, Plan};
use crate::reconcile::state::observe;
use crate::tmux::{Multiplexer, MuxError, TmuxClient};

/// Everything the commands need from the environment, resolved once by
/// the entry point and passed down explicitly.
pub struct Ctx {
    pub ledger_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Ctx {
    pub fn new(ledger_override: Option<PathBuf>) -> Self {
        let ledger_path = ledger_override
            .or_else(|| std::env::var_os("FOREMAN_LEDGER").map(PathBuf::from))
            .unwrap_or_else(Ledger::default_path);
        let data_dir = ledger_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            ledger_path,
            data_dir,
        }
    }

    fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }
}

/// Reconciles one workshop's session: observe, plan, confirm, execute,
/// then decorate. A converged session and a declined confirmation are
/// both clean no-ops.
pub async fn apply(ctx: &Ctx, target: &str, yes: bool, json: bool) -> Result<()> {
    let ledger = Ledger::load(&ctx.ledger_path)?;
    let desired = ledger::desired_state(&ledger, target)?;

    // Held from before observation until execution finishes: plans
    // computed from unserialized reads race on the live session.
    let _lock = SessionLock::acquire(&ctx.lock_dir(), &desired.session)?;

    let mux = TmuxClient::new();
    let observed = observe(&mux, &desired.session).await.map_err(mux_failure)?;
    let the_plan = plan(&desired, &observed);

    if json {
        let rendered =
            serde_json::to_string_pretty(&the_plan).context("Failed to encode plan")?;
        println!("{}", rendered);
    } else {
        print_plan(&the_plan);
    }

    if the_plan.is_converged() {
        println!("Nothing to do.");
        return Ok(());
    }

    if !yes {
        let prompt = format!("Apply {} action(s)?", the_plan.actions.len());
        if !confirm(&prompt)? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let cancel = CancelFlag::new();
    let handler = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler.cancel();
        }
    });

    let report = execute(&mux, &the_plan, &cancel).await?;
    info!(
        session = %desired.session,
        actions = report.completed,
        "session converged"
    );
    println!("Applied {} action(s).", report.completed);

    enrich(&mux, &desired.session).await;
    Ok(())
}

/// Attaches the current terminal to a workshop's running session.
pub async fn connect(ctx: &Ctx, target: &str) -> Result<()> {
    let ledger = Ledger::load(&ctx.ledger_path)?;
    let workshop = ledger
        .workshop_by_name(target)
        .ok_or_else(|| ForemanError::TargetNotFound(target.to_string()))?;
    let session = ledger::sanitize_name(&workshop.name);

    let mux = TmuxClient::new();
    if !mux.session_exists(&session).await.map_err(mux_failure)? {
        return Err(ForemanError::Precondition(format!(
            "session '{}' is not running; run 'foreman apply {}' first",
            session, target
        ))
        .into());
    }

    let cmd = mux.attach_command(&session);
    debug!(?cmd, "attaching");
    let status = std::process::Command::new(&cmd[0])
        .args(&cmd[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute tmux attach")?;

    if !status.success() {
        anyhow::bail!("attach exited with {}", status);
    }
    Ok(())
}

/// Runs the cosmetic pass alone. With no target, the workshop is inferred
/// from the current working directory.
pub async fn enrich_session(ctx: &Ctx, target: Option<&str>) -> Result<()> {
    let ledger = Ledger::load(&ctx.ledger_path)?;
    let workshop = match target {
        Some(name) => ledger
            .workshop_by_name(name)
            .ok_or_else(|| ForemanError::TargetNotFound(name.to_string()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get working directory")?;
            ledger.workshop_for_dir(&cwd).ok_or_else(|| {
                ForemanError::TargetNotFound(format!(
                    "no workshop root contains {}",
                    cwd.display()
                ))
            })?
        }
    };
    let session = ledger::sanitize_name(&workshop.name);

    let mux = TmuxClient::new();
    enrich(&mux, &session).await;
    println!("Enriched session '{}'.", session);
    Ok(())
}

/// The planner only runs against a snapshot it could fully read; any read
/// failure means the control surface cannot be trusted this invocation.
fn mux_failure(e: MuxError) -> ForemanError {
    ForemanError::MultiplexerUnavailable(e.to_string())
}

fn print_plan(plan: &Plan) {
    if plan.session_exists {
        println!("Session '{}':", plan.session);
        for w in &plan.windows {
            let marker = if w.is_holding { " (holding)" } else { "" };
            let health = if w.healthy { "healthy" } else { "needs attention" };
            println!(
                "  {}{}: {} pane(s), {} dead, {}",
                w.name, marker, w.pane_count, w.dead_pane_count, health
            );
        }
    } else {
        println!("Session '{}' does not exist yet.", plan.session);
    }

    if !plan.actions.is_empty() {
        println!("Plan:");
        for (i, action) in plan.actions.iter().enumerate() {
            println!("  {}. {}", i + 1, action);
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
