//! # Deadline Watchdog
//!
//! Races the host's hard deadline. A background task waits on either a
//! one-shot cancellation from the main path or a timer armed for
//! `deadline - margin`:
//!
//! ```text
//!            arm()                          disarm()
//!   main ────┬──── pull ── build ── push ──── release ──► cancel ─┐
//!            │                                                    │
//!   watchdog └──── select! { cancel => exit,  ◄───────────────────┘
//!                           timer  => release + fatal log }
//! ```
//!
//! The watchdog never interrupts the in-flight registry or builder call. It
//! removes the workspace so that no data outlives the invocation, and the
//! in-flight call then fails on its own.

use crate::constants::TIMEOUT_MESSAGE;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// How the watchdog task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The main path finished first.
    Cancelled,
    /// The timer fired and the watchdog released the workspace.
    Fired,
}

/// Background task guarding one invocation's workspace.
pub struct Watchdog {
    cancel: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<WatchdogOutcome>>,
}

impl Watchdog {
    /// Arms the watchdog to fire `margin` before `deadline`.
    ///
    /// A deadline already inside the margin fires immediately.
    pub fn arm(deadline: DateTime<Utc>, margin: Duration, workspace: Arc<Workspace>) -> Self {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Self::arm_after(remaining.saturating_sub(margin), workspace)
    }

    /// Arms the watchdog to fire after `delay`.
    pub fn arm_after(delay: Duration, workspace: Arc<Workspace>) -> Self {
        let (cancel, cancelled) = oneshot::channel::<()>();
        debug!("Watchdog armed to fire in {:?}", delay);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled => WatchdogOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {
                    workspace.release();
                    error!(
                        error = %format!("invocation timeout after {:?}", delay),
                        "{}", TIMEOUT_MESSAGE
                    );
                    WatchdogOutcome::Fired
                }
            }
        });

        Self {
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    /// Sends the cancellation signal and waits for the task to exit.
    pub async fn disarm(mut self) -> WatchdogOutcome {
        if let Some(cancel) = self.cancel.take() {
            // The receiver is gone once the timer fired.
            let _ = cancel.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(WatchdogOutcome::Cancelled),
            None => WatchdogOutcome::Cancelled,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
