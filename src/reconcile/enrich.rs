use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::tmux::{Multiplexer, MuxError, ENRICHED_OPTION, HOLDING_WINDOW};

use super::state::{observe, ObservedPane, ObservedWindow};

/// Bumped when the decoration scheme changes, so already-enriched windows
/// from older versions get re-titled once.
const ENRICH_VERSION: &str = "1";

/// Global bindings are registered once per process; tmux itself treats a
/// repeated registration as a no-op anyway.
static KEYS_BOUND: AtomicBool = AtomicBool::new(false);

/// Cosmetic pass over a session: key bindings and pane titles. Idempotent
/// and safe on sessions foreman never created.
///
/// Strictly best-effort. Decoration is UX polish layered on top of
/// structural state, so an unreachable multiplexer or any individual
/// failure is logged and swallowed, never surfaced to the caller.
pub async fn enrich(mux: &dyn Multiplexer, session: &str) {
    if let Err(e) = try_enrich(mux, session).await {
        debug!(session, error = %e, "enrichment skipped");
    }
}

async fn try_enrich(mux: &dyn Multiplexer, session: &str) -> Result<(), MuxError> {
    let observed = observe(mux, session).await?;
    if !observed.exists {
        debug!(session, "nothing to enrich");
        return Ok(());
    }

    if !KEYS_BOUND.swap(true, Ordering::SeqCst) {
        mux.bind_key("H", &["select-window", "-t", HOLDING_WINDOW]).await?;
        mux.bind_key("S", &["choose-tree", "-s"]).await?;
    }

    for window in &observed.windows {
        let marker = mux
            .get_window_option(session, &window.id, ENRICHED_OPTION)
            .await?;
        if marker.as_deref() == Some(ENRICH_VERSION) {
            continue;
        }

        for pane in &window.panes {
            mux.set_pane_title(&pane.id, pane_title(window, pane)).await?;
        }
        mux.set_window_option(session, &window.id, ENRICHED_OPTION, ENRICH_VERSION)
            .await?;
    }

    Ok(())
}

/// Title from the persisted role tag when present, positional fallback
/// otherwise; panes parked in the holding area are all orphans.
fn pane_title(window: &ObservedWindow, pane: &ObservedPane) -> &'static str {
    if window.is_holding() {
        "orphan"
    } else {
        pane.role.as_str()
    }
}
