//! Keeps the background session in step with the alarm store and derives the
//! text shown on its status surface.

use std::sync::Arc;

use log::info;

use super::format::{clock_time, humanize_millis};
use super::model::{earliest, StatusText};
use super::store::AlarmStore;

/// Renders status text. Implemented by whatever owns the persistent
/// notification.
pub trait StatusDisplay: Send {
    fn show(&mut self, status: &StatusText);
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Started,
    Stopped,
    Unchanged,
}

pub struct SessionController {
    store: Arc<AlarmStore>,
    display: Box<dyn StatusDisplay>,
    running: bool,
    clock_format: fn(i64) -> String,
}

impl SessionController {
    pub fn new(store: Arc<AlarmStore>, display: Box<dyn StatusDisplay>) -> Self {
        Self {
            store,
            display,
            running: false,
            clock_format: clock_time,
        }
    }

    /// Overrides how fire times are rendered (local `HH:MM` by default).
    pub fn with_clock_format(mut self, clock_format: fn(i64) -> String) -> Self {
        self.clock_format = clock_format;
        self
    }

    pub fn session_should_be_running(&self) -> bool {
        self.store.has_pending_request() || self.store.has_scheduled_trigger()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Status for the current store contents. An armed alarm takes precedence
    /// over a queued one; `None` means there is nothing to show.
    pub fn status(&self) -> Option<StatusText> {
        if let Some(next) = earliest(&self.store.scheduled_triggers()) {
            return Some(StatusText {
                title: String::from("Alarm is set"),
                body: format!(
                    "Alarm will ring at {}",
                    (self.clock_format)(next.fire_at_epoch_millis)
                ),
            });
        }

        self.store.pending_requests().first().map(|request| StatusText {
            title: String::from("Alarm will be set"),
            body: format!(
                "Alarm will ring {} after the screen turns off",
                humanize_millis(request.delay_millis)
            ),
        })
    }

    /// Recomputes the status and pushes it to the display.
    pub fn refresh_status(&mut self) -> Option<StatusText> {
        let status = self.status();
        match &status {
            Some(text) => self.display.show(text),
            None => self.display.clear(),
        }
        status
    }

    /// Brings the running flag in line with the store. The host starts or
    /// stops the session according to the returned transition.
    pub fn reconcile(&mut self) -> SessionTransition {
        let should_run = self.session_should_be_running();
        match (self.running, should_run) {
            (false, true) => {
                self.running = true;
                info!("Alarm session started");
                SessionTransition::Started
            }
            (true, false) => {
                self.running = false;
                self.display.clear();
                info!("No alarms left, alarm session stopped");
                SessionTransition::Stopped
            }
            _ => SessionTransition::Unchanged,
        }
    }
}
