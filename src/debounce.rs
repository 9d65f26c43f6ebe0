//! Change debouncer: coalesces bursts of local edits into one outbound flush.
//!
//! The debouncer keeps the pending arguments in a single slot. Every
//! [`Debouncer::schedule`] call overwrites the slot and pushes the deadline
//! out; [`Debouncer::expired`] resolves once the deadline passes and yields
//! whatever is in the slot at that moment.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use crate::session::PendingEdit;

#[derive(Debug)]
struct Armed {
    edit: PendingEdit,
    deadline: Instant,
}

/// Single-slot debouncer driven by the engine's event loop.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    armed: Option<Armed>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, armed: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending edit and restart the delay.
    pub fn schedule(&mut self, content: &str, language: &str) {
        let deadline = Instant::now() + self.delay;
        match self.armed.as_mut() {
            Some(armed) => {
                armed.edit.content.clear();
                armed.edit.content.push_str(content);
                armed.edit.language.clear();
                armed.edit.language.push_str(language);
                armed.deadline = deadline;
            }
            None => {
                self.armed = Some(Armed {
                    edit: PendingEdit {
                        content: content.to_string(),
                        language: language.to_string(),
                    },
                    deadline,
                });
            }
        }
    }

    /// Drop the pending edit, if any. Returns whether something was pending.
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|a| a.deadline)
    }

    /// Wait for the current deadline and take the pending edit.
    ///
    /// Never resolves while nothing is scheduled. Cancel-safe: dropping the
    /// future before the deadline leaves the slot untouched.
    pub async fn expired(&mut self) -> PendingEdit {
        let deadline = match self.deadline() {
            Some(deadline) => deadline,
            None => return std::future::pending().await,
        };
        sleep_until(deadline).await;
        match self.armed.take() {
            Some(armed) => armed.edit,
            None => std::future::pending().await,
        }
    }
}
