//! Scheduling policy for deferred alarms.
//!
//! ```text
//!          request_after          materialize_pending          wake
//!  Idle ─────────────────► Pending ─────────────────► Armed ─────────► Fired
//!   ▲                       │   ▲                       │               │ │
//!   │     clear_pending     │   │         snooze        │               │ │
//!   ├───────────────────────┘   └───────────────────────┼───────────────┘ │
//!   │                  cancel_one / cancel_all          │                 │
//!   ├───────────────────────────────────────────────────┘                 │
//!   │                              dismiss                                │
//!   └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use super::clock::Clock;
use super::error::{Result, ScheduleError};
use super::identity::TriggerIdentity;
use super::model::{earliest, PendingRequest, ScheduledTrigger};
use super::scheduler::WakeScheduler;
use super::store::AlarmStore;

pub struct AlarmLifecycleManager {
    store: Arc<AlarmStore>,
    scheduler: Box<dyn WakeScheduler>,
    identity: TriggerIdentity,
    clock: Arc<dyn Clock>,
}

impl AlarmLifecycleManager {
    pub fn new(
        store: Arc<AlarmStore>,
        scheduler: Box<dyn WakeScheduler>,
        identity: TriggerIdentity,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            identity,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<AlarmStore> {
        &self.store
    }

    /// Queues an alarm to be armed `delay_millis` after the next display-off.
    ///
    /// Callers only request while the store is empty; this is not checked here.
    pub fn request_after(&mut self, delay_millis: u64) -> Result<()> {
        self.store
            .add_pending_request(PendingRequest::new(delay_millis))?;
        debug!("Alarm queued to ring {} ms after display-off", delay_millis);
        Ok(())
    }

    /// Arms every pending request relative to now and empties the pending
    /// collection. Requests the scheduler refuses are dropped.
    ///
    /// Returns the triggers that were armed. On a storage failure every
    /// registration made here is withdrawn and the store is left as it was.
    pub fn materialize_pending(&mut self) -> Result<Vec<ScheduledTrigger>> {
        let pending = self.store.pending_requests();
        if pending.is_empty() {
            debug!("No pending alarms to arm");
            return Ok(Vec::new());
        }

        debug!("Arming {} pending alarms...", pending.len());
        let now = self.clock.now_millis();
        let mut live = self.store.scheduled_triggers();
        let mut armed = Vec::with_capacity(pending.len());

        for request in pending {
            let fire_at = now.saturating_add(i64::try_from(request.delay_millis).unwrap_or(i64::MAX));
            let id = self.identity.new_id(&live);

            match self.scheduler.register(id, fire_at) {
                Ok(()) => {
                    let trigger = ScheduledTrigger::new(id, fire_at);
                    live.push(trigger);
                    armed.push(trigger);
                }
                Err(ScheduleError::PermissionDenied) => {
                    warn!(
                        "No permission to schedule exact alarms, dropping request of {} ms",
                        request.delay_millis
                    );
                }
            }
        }

        if let Err(e) = self.store.commit_armed(&armed) {
            for trigger in &armed {
                self.scheduler.unregister(trigger.id);
            }
            return Err(e);
        }
        debug!("Armed {} alarms", armed.len());
        Ok(armed)
    }

    /// Unregisters and forgets every scheduled trigger. Safe to repeat.
    pub fn cancel_all(&mut self) -> Result<usize> {
        let triggers = self.store.scheduled_triggers();
        if triggers.is_empty() {
            debug!("No alarms to cancel");
            return Ok(0);
        }

        debug!("Cancelling {} alarms...", triggers.len());
        for trigger in &triggers {
            self.cancel_one(trigger)?;
        }
        Ok(triggers.len())
    }

    /// Unregisters a single trigger and removes it from the store. Stale
    /// triggers are harmless.
    pub fn cancel_one(&mut self, trigger: &ScheduledTrigger) -> Result<()> {
        self.scheduler.unregister(trigger.id);
        self.store.remove_scheduled_trigger(trigger)
    }

    /// Drops queued requests that have not been armed yet.
    pub fn clear_pending(&mut self) -> Result<()> {
        self.store.clear_pending_requests()
    }

    /// Finds the stored trigger a wake callback refers to. A reported id must
    /// match a stored trigger, so a stale wake resolves to `None`. Without an
    /// id the earliest due trigger is taken.
    pub fn resolve_fired(&self, fired_id: Option<u32>) -> Option<ScheduledTrigger> {
        let triggers = self.store.scheduled_triggers();
        match fired_id {
            Some(id) => triggers
                .iter()
                .filter(|t| t.id == id)
                .copied()
                .min_by_key(|t| t.fire_at_epoch_millis),
            None => earliest(&triggers),
        }
    }

    pub fn dismiss(&mut self, trigger: &ScheduledTrigger) -> Result<()> {
        info!("Alarm {} dismissed", trigger.id);
        self.cancel_one(trigger)
    }

    /// Replaces a rung trigger with a new pending request of `delay_millis`.
    pub fn snooze(&mut self, trigger: &ScheduledTrigger, delay_millis: u64) -> Result<()> {
        info!("Alarm {} snoozed for {} ms", trigger.id, delay_millis);
        self.cancel_one(trigger)?;
        self.request_after(delay_millis)
    }

    /// Re-registers stored triggers with the scheduler after a restart.
    pub fn rehydrate(&mut self) -> Result<usize> {
        let triggers = self.store.scheduled_triggers();
        let mut restored = 0;
        for trigger in &triggers {
            match self
                .scheduler
                .register(trigger.id, trigger.fire_at_epoch_millis)
            {
                Ok(()) => restored += 1,
                Err(ScheduleError::PermissionDenied) => {
                    warn!(
                        "Could not restore alarm {}, permission denied. Forgetting it.",
                        trigger.id
                    );
                    self.store.remove_scheduled_trigger(trigger)?;
                }
            }
        }
        if restored > 0 {
            info!("Restored {} alarms from storage", restored);
        }
        Ok(restored)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the lifecycle, session and monitor tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::core::identity::IdStrategy;
    use crate::core::storage::{MemorySlotStorage, SlotStorage};

    #[derive(Default)]
    pub struct SchedulerLog {
        pub registered: HashMap<u32, i64>,
        pub unregister_calls: Vec<u32>,
        pub deny: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeScheduler {
        pub log: Arc<Mutex<SchedulerLog>>,
    }

    impl WakeScheduler for FakeScheduler {
        fn register(&mut self, id: u32, fire_at: i64) -> std::result::Result<(), ScheduleError> {
            let mut log = self.log.lock().unwrap();
            if log.deny {
                return Err(ScheduleError::PermissionDenied);
            }
            log.registered.insert(id, fire_at);
            Ok(())
        }

        fn unregister(&mut self, id: u32) {
            let mut log = self.log.lock().unwrap();
            log.registered.remove(&id);
            log.unregister_calls.push(id);
        }
    }

    pub struct FixedClock(pub AtomicI64);

    impl FixedClock {
        pub fn at(millis: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(millis)))
        }

        pub fn advance(&self, millis: i64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    pub const NOW: i64 = 1_700_000_000_000;

    pub fn manager() -> (AlarmLifecycleManager, FakeScheduler, Arc<FixedClock>) {
        manager_on(MemorySlotStorage::new())
    }

    pub fn manager_on(
        storage: impl SlotStorage + 'static,
    ) -> (AlarmLifecycleManager, FakeScheduler, Arc<FixedClock>) {
        let scheduler = FakeScheduler::default();
        let clock = FixedClock::at(NOW);
        let store = Arc::new(AlarmStore::new(storage));
        let manager = AlarmLifecycleManager::new(
            store,
            Box::new(scheduler.clone()),
            TriggerIdentity::new(IdStrategy::Unique),
            clock.clone(),
        );
        (manager, scheduler, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{manager, manager_on, NOW};
    use super::*;
    use crate::core::storage::testing::FlakyStorage;
    use crate::core::store::PENDING_SLOT;

    #[test]
    fn test_request_then_materialize() {
        let (mut manager, scheduler, _) = manager();

        manager.request_after(5000).unwrap();
        assert_eq!(manager.store().pending_requests(), vec![PendingRequest::new(5000)]);
        assert!(scheduler.log.lock().unwrap().registered.is_empty());

        let armed = manager.materialize_pending().unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].fire_at_epoch_millis, NOW + 5000);

        let store = manager.store();
        assert!(!store.has_pending_request());
        assert_eq!(store.scheduled_triggers(), armed);
        assert_eq!(
            scheduler.log.lock().unwrap().registered.get(&armed[0].id),
            Some(&(NOW + 5000))
        );
    }

    #[test]
    fn test_materialize_without_pending_is_noop() {
        let (mut manager, scheduler, _) = manager();
        assert!(manager.materialize_pending().unwrap().is_empty());
        assert!(manager.store().is_empty());
        assert!(scheduler.log.lock().unwrap().registered.is_empty());
    }

    #[test]
    fn test_permission_denied_drops_request() {
        let (mut manager, scheduler, _) = manager();
        scheduler.log.lock().unwrap().deny = true;

        manager.request_after(1000).unwrap();
        let armed = manager.materialize_pending().unwrap();

        assert!(armed.is_empty());
        assert!(manager.store().is_empty(), "denied request must not be re-queued");
    }

    #[test]
    fn test_two_requests_get_distinct_ids() {
        let (mut manager, _, _) = manager();
        manager.request_after(1000).unwrap();
        manager.request_after(2000).unwrap();

        let armed = manager.materialize_pending().unwrap();
        assert_eq!(armed.len(), 2);
        assert_ne!(armed[0].id, armed[1].id);
        assert_eq!(manager.store().scheduled_triggers().len(), 2);
    }

    #[test]
    fn test_cancel_all_is_idempotent() {
        let (mut manager, scheduler, _) = manager();
        manager.request_after(1000).unwrap();
        manager.request_after(2000).unwrap();
        manager.materialize_pending().unwrap();

        assert_eq!(manager.cancel_all().unwrap(), 2);
        assert!(manager.store().is_empty());
        assert!(scheduler.log.lock().unwrap().registered.is_empty());

        assert_eq!(manager.cancel_all().unwrap(), 0);
        assert!(manager.store().is_empty());
    }

    #[test]
    fn test_cancel_stale_trigger_is_noop() {
        let (mut manager, scheduler, _) = manager();
        let stale = ScheduledTrigger::new(99, NOW);
        manager.cancel_one(&stale).unwrap();
        assert!(manager.store().is_empty());
        assert_eq!(scheduler.log.lock().unwrap().unregister_calls, vec![99]);
    }

    #[test]
    fn test_resolve_fired_by_reported_id_else_earliest() {
        let (manager, _, _) = manager();
        let late = ScheduledTrigger::new(1, NOW + 9000);
        let soon = ScheduledTrigger::new(2, NOW + 1000);
        manager.store().add_scheduled_triggers(&[late, soon]).unwrap();

        assert_eq!(manager.resolve_fired(Some(1)), Some(late));
        assert_eq!(manager.resolve_fired(None), Some(soon));
        assert_eq!(manager.resolve_fired(Some(77)), None);
    }

    #[test]
    fn test_stale_wake_does_not_ring_other_alarm() {
        let (mut manager, _, _) = manager();
        let cancelled = ScheduledTrigger::new(1, NOW + 1000);
        let other = ScheduledTrigger::new(2, NOW + 5000);
        manager.store().add_scheduled_triggers(&[cancelled, other]).unwrap();
        manager.cancel_one(&cancelled).unwrap();

        assert_eq!(manager.resolve_fired(Some(1)), None);
        assert_eq!(manager.store().scheduled_triggers(), vec![other]);
    }

    #[test]
    fn test_failed_commit_arms_requests_once() {
        let storage = FlakyStorage::default();
        let faults = storage.faults.clone();
        let (mut manager, scheduler, _) = manager_on(storage);
        manager.request_after(5000).unwrap();

        faults.lock().unwrap().fail_remove_once = Some(PENDING_SLOT);
        assert!(manager.materialize_pending().is_err());
        assert!(!manager.store().has_scheduled_trigger());
        assert_eq!(manager.store().pending_requests(), vec![PendingRequest::new(5000)]);
        assert!(scheduler.log.lock().unwrap().registered.is_empty());

        // The next display-off arms the same request exactly once
        let armed = manager.materialize_pending().unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(manager.store().scheduled_triggers(), armed);
        assert!(!manager.store().has_pending_request());
        assert_eq!(scheduler.log.lock().unwrap().registered.len(), 1);
    }

    #[test]
    fn test_snooze_requeues_fixed_delay() {
        let (mut manager, scheduler, _) = manager();
        manager.request_after(5000).unwrap();
        let trigger = manager.materialize_pending().unwrap()[0];

        manager.snooze(&trigger, 10 * 60 * 1000).unwrap();

        let store = manager.store();
        assert!(!store.has_scheduled_trigger());
        assert_eq!(store.pending_requests(), vec![PendingRequest::new(600_000)]);
        assert!(!scheduler.log.lock().unwrap().registered.contains_key(&trigger.id));
    }

    #[test]
    fn test_rehydrate_registers_stored_triggers() {
        let (mut manager, scheduler, _) = manager();
        let stored = ScheduledTrigger::new(5, NOW + 100);
        manager.store().add_scheduled_trigger(stored).unwrap();

        assert_eq!(manager.rehydrate().unwrap(), 1);
        assert_eq!(
            scheduler.log.lock().unwrap().registered.get(&5),
            Some(&(NOW + 100))
        );

        scheduler.log.lock().unwrap().deny = true;
        assert_eq!(manager.rehydrate().unwrap(), 0);
        assert!(manager.store().is_empty());
    }
}
