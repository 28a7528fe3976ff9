//! Display state subscription.
//!
//! Display transitions are published on a [`DisplayEventBus`]. The monitor
//! only holds a receiver while the alarm session runs, so transitions that
//! happen with nothing queued are never observed.

use log::{debug, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use super::error::Result;
use super::lifecycle::AlarmLifecycleManager;
use super::model::{DisplayState, StatusText};
use super::session::SessionController;

const BUS_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct DisplayEventBus {
    sender: broadcast::Sender<DisplayState>,
}

impl DisplayEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes a transition. Returns how many subscribers saw it.
    pub fn publish(&self, state: DisplayState) -> usize {
        self.sender.send(state).unwrap_or(0)
    }
}

impl Default for DisplayEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct DeviceStateMonitor {
    receiver: Option<broadcast::Receiver<DisplayState>>,
}

impl DeviceStateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, bus: &DisplayEventBus) {
        if self.receiver.is_none() {
            self.receiver = Some(bus.sender.subscribe());
            debug!("Subscribed to display transitions");
        }
    }

    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("Unsubscribed from display transitions");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.receiver.is_some()
    }

    /// Waits for the next transition. Pends forever while unsubscribed, so
    /// it can sit in a `select!` unconditionally.
    pub async fn next_transition(&mut self) -> DisplayState {
        loop {
            let received = match self.receiver.as_mut() {
                Some(receiver) => receiver.recv().await,
                None => return std::future::pending().await,
            };
            match received {
                Ok(state) => return state,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} display transitions", missed);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                }
            }
        }
    }

    /// Reacts to a transition. Display-off arms every queued alarm and
    /// refreshes the session status.
    pub fn on_transition(
        &self,
        state: DisplayState,
        manager: &mut AlarmLifecycleManager,
        session: &mut SessionController,
    ) -> Result<Option<StatusText>> {
        match state {
            DisplayState::Inactive => {
                debug!("Display turned off");
                manager.materialize_pending()?;
                Ok(session.refresh_status())
            }
            DisplayState::Active => {
                // TODO: offer to keep or discard the armed alarm once there is a prompt surface
                debug!("Display turned on");
                Ok(None)
            }
        }
    }
}
