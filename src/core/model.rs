use serde::{Deserialize, Serialize};

/// Delay applied when a ringing alarm is snoozed.
pub const DEFAULT_SNOOZE_MINUTES: u64 = 10;

/// "Arm an alarm this many milliseconds after the display next turns off."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingRequest {
    pub delay_millis: u64,
}

impl PendingRequest {
    pub fn new(delay_millis: u64) -> Self {
        Self { delay_millis }
    }
}

/// An alarm registered with the wake scheduler.
///
/// Equality covers both fields, so two triggers sharing an id but not a fire
/// time are different alarms as far as the store is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTrigger {
    pub id: u32,
    pub fire_at_epoch_millis: i64,
}

impl ScheduledTrigger {
    pub fn new(id: u32, fire_at_epoch_millis: i64) -> Self {
        Self {
            id,
            fire_at_epoch_millis,
        }
    }
}

/// Display power state reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Active,
    Inactive,
}

/// Text shown on the session's persistent status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub title: String,
    pub body: String,
}

/// Picks the trigger that will ring first. Ties keep insertion order.
pub fn earliest(triggers: &[ScheduledTrigger]) -> Option<ScheduledTrigger> {
    triggers
        .iter()
        .copied()
        .min_by_key(|t| t.fire_at_epoch_millis)
}
