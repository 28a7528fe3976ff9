//! Session host: owns every alarm component inside one actor task and feeds
//! it user commands, display transitions and wake callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::{
    clock::{Clock, SystemClock},
    config::Settings,
    error::{AlarmError, Result, ScheduleError},
    format::humanize_millis,
    identity::TriggerIdentity,
    lifecycle::AlarmLifecycleManager,
    model::{DisplayState, ScheduledTrigger, StatusText},
    monitor::{DeviceStateMonitor, DisplayEventBus},
    scheduler::WakeScheduler,
    session::{SessionController, SessionTransition, StatusDisplay},
    storage::{FileSlotStorage, SlotStorage},
    store::AlarmStore,
};

pub enum LoopCommand {
    Request { delay_millis: u64 },
    /// Wake callback for a registered trigger id
    Fired(u32),
    Dismiss,
    Snooze,
    Cancel,
    Status(oneshot::Sender<HostSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub status: Option<StatusText>,
    pub session_running: bool,
    /// Triggers that fired and wait for the user, oldest first
    pub ringing: Vec<ScheduledTrigger>,
    pub pending: usize,
    pub scheduled: usize,
}

/// Wake scheduler backed by tokio timers. Each registration is a sleeping
/// task that reports back to the host loop.
pub struct TokioScheduler {
    tx: mpsc::Sender<LoopCommand>,
    tasks: HashMap<u32, JoinHandle<()>>,
    clock: Arc<dyn Clock>,
    exact_permitted: bool,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::Sender<LoopCommand>, clock: Arc<dyn Clock>, exact_permitted: bool) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
            clock,
            exact_permitted,
        }
    }
}

impl WakeScheduler for TokioScheduler {
    fn register(&mut self, id: u32, fire_at_epoch_millis: i64) -> std::result::Result<(), ScheduleError> {
        if !self.exact_permitted {
            return Err(ScheduleError::PermissionDenied);
        }

        // Past-due triggers fire right away
        let wait = u64::try_from(fire_at_epoch_millis.saturating_sub(self.clock.now_millis())).unwrap_or(0);
        let tx = self.tx.clone();
        self.tasks.retain(|_, task| !task.is_finished());
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(wait)).await;
            let _ = tx.send(LoopCommand::Fired(id)).await;
        });

        if let Some(previous) = self.tasks.insert(id, task) {
            debug!("Alarm id {} registered twice, replacing the earlier wake", id);
            previous.abort();
        }
        Ok(())
    }

    fn unregister(&mut self, id: u32) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

/// Shows session status in the log, standing in for a persistent notification.
struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show(&mut self, status: &StatusText) {
        info!("{}: {}", status.title, status.body);
    }

    fn clear(&mut self) {
        debug!("Status cleared");
    }
}

struct Host {
    settings: Settings,
    manager: AlarmLifecycleManager,
    session: SessionController,
    monitor: DeviceStateMonitor,
    bus: DisplayEventBus,
    ringing: VecDeque<ScheduledTrigger>,
}

impl Host {
    fn handle(&mut self, cmd: LoopCommand) -> Result<()> {
        match cmd {
            LoopCommand::Request { delay_millis } => {
                if self.session.session_should_be_running() {
                    warn!("An alarm is already set or queued, cancel it first");
                    return Ok(());
                }
                self.manager.request_after(delay_millis)?;
                info!(
                    "Alarm will ring {} after the screen turns off",
                    humanize_millis(delay_millis)
                );
            }
            LoopCommand::Fired(id) => match self.manager.resolve_fired(Some(id)) {
                Some(trigger) if self.ringing.contains(&trigger) => {
                    debug!("Alarm {} is already ringing", trigger.id);
                }
                Some(trigger) => {
                    info!("Alarm {} is ringing! Dismiss or snooze it.", trigger.id);
                    self.ringing.push_back(trigger);
                }
                None => debug!("Wake for unknown alarm id {}, ignoring", id),
            },
            LoopCommand::Dismiss => match self.ringing.pop_front() {
                Some(trigger) => self.manager.dismiss(&trigger)?,
                None => warn!("No alarm is ringing"),
            },
            LoopCommand::Snooze => match self.ringing.pop_front() {
                Some(trigger) => self.manager.snooze(&trigger, self.settings.snooze_millis())?,
                None => warn!("No alarm is ringing"),
            },
            LoopCommand::Cancel => {
                self.ringing.clear();
                let cancelled = self.manager.cancel_all()?;
                self.manager.clear_pending()?;
                info!("Cancelled {} alarms", cancelled);
            }
            LoopCommand::Status(reply) => {
                let _ = reply.send(self.snapshot());
                return Ok(());
            }
            LoopCommand::Shutdown => return Ok(()),
        }
        self.sync_session();
        Ok(())
    }

    fn on_display(&mut self, state: DisplayState) -> Result<()> {
        self.monitor
            .on_transition(state, &mut self.manager, &mut self.session)?;
        self.sync_session();
        Ok(())
    }

    /// Starts or stops the session after a store mutation.
    fn sync_session(&mut self) {
        match self.session.reconcile() {
            SessionTransition::Started => self.monitor.subscribe(&self.bus),
            SessionTransition::Stopped => self.monitor.unsubscribe(),
            SessionTransition::Unchanged => {}
        }
        if self.session.is_running() {
            self.session.refresh_status();
        }
    }

    fn snapshot(&self) -> HostSnapshot {
        let store = self.manager.store();
        HostSnapshot {
            status: self.session.status(),
            session_running: self.session.is_running(),
            ringing: self.ringing.iter().copied().collect(),
            pending: store.pending_requests().len(),
            scheduled: store.scheduled_triggers().len(),
        }
    }
}

/// Cloneable entry point into a running host.
#[derive(Clone)]
pub struct AppHandle {
    tx: mpsc::Sender<LoopCommand>,
    display: DisplayEventBus,
}

impl AppHandle {
    pub async fn send(&self, cmd: LoopCommand) -> bool {
        self.tx.send(cmd).await.is_ok()
    }

    /// Reports a display transition, as the platform broadcast would.
    pub fn display_changed(&self, state: DisplayState) -> usize {
        self.display.publish(state)
    }

    pub async fn snapshot(&self) -> Option<HostSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.send(LoopCommand::Status(reply)).await {
            return None;
        }
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        self.send(LoopCommand::Shutdown).await;
    }
}

/// Builds the components from `settings`, restores persisted alarms and spawns
/// the host loop. Must be called from within a tokio runtime.
pub fn start(settings: Settings) -> Result<(AppHandle, JoinHandle<()>)> {
    let storage = FileSlotStorage::new(settings.data_dir.clone());
    start_with_storage(settings, storage)
}

/// Like [`start`], keeping alarm state in `storage` instead of `data_dir`.
pub fn start_with_storage(
    settings: Settings,
    storage: impl SlotStorage + 'static,
) -> Result<(AppHandle, JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::channel(32);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(AlarmStore::new(storage));
    let scheduler = TokioScheduler::new(tx.clone(), clock.clone(), settings.exact_wake_permitted);

    let mut manager = AlarmLifecycleManager::new(
        store.clone(),
        Box::new(scheduler),
        TriggerIdentity::new(settings.id_strategy),
        clock,
    );
    manager.rehydrate()?;

    let bus = DisplayEventBus::new();
    let mut host = Host {
        settings,
        manager,
        session: SessionController::new(store, Box::new(LogDisplay)),
        monitor: DeviceStateMonitor::new(),
        bus: bus.clone(),
        ringing: VecDeque::new(),
    };
    host.sync_session();

    let task = tokio::spawn(async move {
        debug!("Alarm host loop started");
        loop {
            let result = tokio::select! {
                cmd = rx.recv() => match cmd {
                    None | Some(LoopCommand::Shutdown) => break,
                    Some(cmd) => host.handle(cmd),
                },
                state = host.monitor.next_transition() => host.on_display(state),
            };
            // A handler can fail after part of its work is stored
            if let Err(e) = result {
                error!("Alarm handler failed: {}", e);
                host.sync_session();
            }
        }
        debug!("Alarm host loop stopped");
    });

    Ok((AppHandle { tx, display: bus }, task))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInput {
    Request(u64),
    Display(DisplayState),
    Dismiss,
    Snooze,
    Cancel,
    Status,
    Help,
    Quit,
}

const HELP: &str = "commands: request <seconds> | request <h> <m> <s> | screen off | screen on | \
dismiss | snooze | cancel | status | help | quit";

pub fn parse_input(line: &str) -> Option<UserInput> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let input = match words.as_slice() {
        ["request", secs] => UserInput::Request(secs.parse::<u64>().ok()?.checked_mul(1000)?),
        ["request", h, m, s] => {
            let (h, m, s): (u64, u64, u64) = (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
            let secs = h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(s)?;
            UserInput::Request(secs.checked_mul(1000)?)
        }
        ["screen", "off"] => UserInput::Display(DisplayState::Inactive),
        ["screen", "on"] => UserInput::Display(DisplayState::Active),
        ["dismiss"] => UserInput::Dismiss,
        ["snooze"] => UserInput::Snooze,
        ["cancel"] => UserInput::Cancel,
        ["status"] => UserInput::Status,
        ["help"] => UserInput::Help,
        ["quit"] | ["exit"] => UserInput::Quit,
        _ => return None,
    };
    Some(input)
}

fn print_snapshot(snapshot: &HostSnapshot) {
    match &snapshot.status {
        Some(status) => println!("{}: {}", status.title, status.body),
        None => println!("No alarm set"),
    }
    for trigger in &snapshot.ringing {
        println!("Alarm {} is ringing", trigger.id);
    }
}

/// Runs the host with console input until `quit` or end of input.
pub async fn run(settings: Settings) -> Result<()> {
    let (handle, host) = start(settings)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    while let Some(line) = lines.next_line().await.map_err(AlarmError::Input)? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match parse_input(&line) {
            Some(UserInput::Request(delay_millis)) => LoopCommand::Request { delay_millis },
            Some(UserInput::Display(state)) => {
                if handle.display_changed(state) == 0 {
                    debug!("No alarm session listening for display changes");
                }
                continue;
            }
            Some(UserInput::Dismiss) => LoopCommand::Dismiss,
            Some(UserInput::Snooze) => LoopCommand::Snooze,
            Some(UserInput::Cancel) => LoopCommand::Cancel,
            Some(UserInput::Status) => {
                if let Some(snapshot) = handle.snapshot().await {
                    print_snapshot(&snapshot);
                }
                continue;
            }
            Some(UserInput::Help) => {
                println!("{}", HELP);
                continue;
            }
            Some(UserInput::Quit) => break,
            None => {
                println!("Unknown command: {}", line.trim());
                continue;
            }
        };
        if !handle.send(cmd).await {
            break;
        }
    }

    handle.shutdown().await;
    join_host(host).await
}

async fn join_host(host: JoinHandle<()>) -> Result<()> {
    host.await.map_err(AlarmError::Host)
}
