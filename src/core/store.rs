//! Persistent alarm state: pending delay requests and scheduled triggers.
//!
//! The store has no policy of its own. It is shared as `Arc<AlarmStore>`
//! between the lifecycle manager and the session controller, and every
//! read-modify-write runs under one lock so interleaved handlers cannot
//! lose each other's updates.

use std::sync::{Mutex, MutexGuard};

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{AlarmError, Result};
use super::model::{PendingRequest, ScheduledTrigger};
use super::storage::SlotStorage;

pub const PENDING_SLOT: &str = "pending_requests";
pub const TRIGGERS_SLOT: &str = "scheduled_triggers";

pub struct AlarmStore {
    storage: Mutex<Box<dyn SlotStorage>>,
}

impl AlarmStore {
    pub fn new(storage: impl SlotStorage + 'static) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SlotStorage>> {
        // A panicking handler cannot leave a slot half written, so the data
        // behind a poisoned lock is still usable.
        self.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        read_lenient(&**self.lock(), PENDING_SLOT)
    }

    pub fn add_pending_request(&self, request: PendingRequest) -> Result<()> {
        self.update_pending(|pending| pending.push(request))
    }

    pub fn add_pending_requests(&self, requests: &[PendingRequest]) -> Result<()> {
        self.update_pending(|pending| pending.extend_from_slice(requests))
    }

    pub fn clear_pending_requests(&self) -> Result<()> {
        self.lock().remove_slot(PENDING_SLOT)?;
        Ok(())
    }

    pub fn has_pending_request(&self) -> bool {
        !self.pending_requests().is_empty()
    }

    pub fn scheduled_triggers(&self) -> Vec<ScheduledTrigger> {
        read_lenient(&**self.lock(), TRIGGERS_SLOT)
    }

    pub fn add_scheduled_trigger(&self, trigger: ScheduledTrigger) -> Result<()> {
        self.update_triggers(|triggers| triggers.push(trigger))
    }

    pub fn add_scheduled_triggers(&self, new_triggers: &[ScheduledTrigger]) -> Result<()> {
        self.update_triggers(|triggers| triggers.extend_from_slice(new_triggers))
    }

    /// Removes the first trigger equal to `trigger`. Absent triggers are ignored.
    pub fn remove_scheduled_trigger(&self, trigger: &ScheduledTrigger) -> Result<()> {
        self.update_triggers(|triggers| {
            if let Some(pos) = triggers.iter().position(|t| t == trigger) {
                triggers.remove(pos);
            }
        })
    }

    pub fn has_scheduled_trigger(&self) -> bool {
        !self.scheduled_triggers().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_pending_request() && !self.has_scheduled_trigger()
    }

    /// Appends freshly armed triggers and empties the pending collection as one
    /// step. If the pending slot cannot be cleared the trigger slot is put back
    /// the way it was, so the requests are armed again on the next attempt
    /// and not twice.
    pub fn commit_armed(&self, armed: &[ScheduledTrigger]) -> Result<()> {
        let mut storage = self.lock();
        let previous = storage.read_slot(TRIGGERS_SLOT)?;
        update_slot(&mut **storage, TRIGGERS_SLOT, |triggers: &mut Vec<ScheduledTrigger>| {
            triggers.extend_from_slice(armed)
        })?;

        if let Err(e) = storage.remove_slot(PENDING_SLOT) {
            let restored = match &previous {
                Some(blob) => storage.write_slot(TRIGGERS_SLOT, blob),
                None => storage.remove_slot(TRIGGERS_SLOT),
            };
            if let Err(undo) = restored {
                warn!("Failed to roll back slot {}: {}", TRIGGERS_SLOT, undo);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Applies `f` to the pending collection and writes the result back
    /// while holding the store lock.
    pub fn update_pending<R>(&self, f: impl FnOnce(&mut Vec<PendingRequest>) -> R) -> Result<R> {
        update_slot(&mut **self.lock(), PENDING_SLOT, f)
    }

    /// Same as [`update_pending`](Self::update_pending) for the trigger collection.
    pub fn update_triggers<R>(
        &self,
        f: impl FnOnce(&mut Vec<ScheduledTrigger>) -> R,
    ) -> Result<R> {
        update_slot(&mut **self.lock(), TRIGGERS_SLOT, f)
    }
}

/// Reads a slot for display or policy decisions. Anything unreadable counts
/// as an empty collection.
fn read_lenient<T: DeserializeOwned>(storage: &dyn SlotStorage, slot: &'static str) -> Vec<T> {
    match storage.read_slot(slot) {
        Ok(Some(blob)) => decode(slot, &blob),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Failed to read slot {}: {}. Treating as empty.", slot, e);
            Vec::new()
        }
    }
}

fn decode<T: DeserializeOwned>(slot: &'static str, blob: &str) -> Vec<T> {
    if blob.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(blob).unwrap_or_else(|e| {
        warn!("Slot {} holds malformed data ({}). Treating as empty.", slot, e);
        Vec::new()
    })
}

/// Read-modify-write of a single slot. An I/O failure on the read aborts the
/// update so the existing blob is never replaced by an empty list.
fn update_slot<T, R>(
    storage: &mut dyn SlotStorage,
    slot: &'static str,
    f: impl FnOnce(&mut Vec<T>) -> R,
) -> Result<R>
where
    T: Serialize + DeserializeOwned,
{
    let mut items: Vec<T> = match storage.read_slot(slot)? {
        Some(blob) => decode(slot, &blob),
        None => Vec::new(),
    };
    let result = f(&mut items);

    if items.is_empty() {
        storage.remove_slot(slot)?;
    } else {
        let blob =
            serde_json::to_string(&items).map_err(|source| AlarmError::Encode { slot, source })?;
        storage.write_slot(slot, &blob)?;
    }
    Ok(result)
}
