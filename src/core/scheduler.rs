use super::error::ScheduleError;

/// OS-level exact wake scheduling.
///
/// Implementations deliver at most one fired callback per registered id.
/// Registering an id that is already registered replaces the earlier
/// registration.
pub trait WakeScheduler: Send {
    fn register(&mut self, id: u32, fire_at_epoch_millis: i64) -> Result<(), ScheduleError>;

    /// Idempotent: unknown or already-fired ids are ignored.
    fn unregister(&mut self, id: u32);
}
