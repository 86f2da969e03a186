use std::{sync::Arc, time::Duration};

use log::info;
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{persistence::StateStore, recorder::SessionRecorder};

use super::{
    notify::Notifier,
    state::{PhaseTransition, TimerState, TimerStatus},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub status: TimerStatus,
    pub title: &'static str,
    pub display: String,
    pub progress_percent: f64,
}

impl From<&TimerState> for TimerSnapshot {
    fn from(state: &TimerState) -> Self {
        Self {
            status: state.status(),
            title: state.phase.title(),
            display: state.display(),
            progress_percent: state.progress_percent(),
            state: state.clone(),
        }
    }
}

/// Capabilities the controller writes through.
pub struct TimerServices {
    pub state_store: Arc<dyn StateStore>,
    pub recorder: SessionRecorder,
    pub notifier: Arc<dyn Notifier>,
}

struct Shared {
    timer: TimerState,
    /// Revision a start waiting on the recorder was issued at. It only blocks
    /// further starts until a pause, reset or skip moves the revision on.
    pending_start: Option<u64>,
    /// Bumped by every intent that stops or moves the countdown, so stale
    /// tickers and superseded starts can tell they lost.
    revision: u64,
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the timer state for one signed-in user. All mutations, user intents
/// and ticks alike, go through the state mutex.
#[derive(Clone)]
pub struct PomodoroController {
    shared: Arc<Mutex<Shared>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    changes: Arc<watch::Sender<TimerState>>,
    state_store: Arc<dyn StateStore>,
    recorder: SessionRecorder,
    notifier: Arc<dyn Notifier>,
    user_id: Option<String>,
    tick_interval: Duration,
}

impl PomodoroController {
    /// Restores the last persisted state (always paused) or starts fresh.
    /// `user_id` is `None` when nobody is signed in; sessions are then not
    /// recorded.
    pub fn new(user_id: Option<String>, services: TimerServices) -> Self {
        let timer = services
            .state_store
            .load()
            .map(TimerState::restored)
            .unwrap_or_default();

        info!(
            "Timer ready: {} {} ({} focus sessions completed)",
            timer.phase.as_str(),
            timer.display(),
            timer.completed_focus_count
        );

        let (changes, _) = watch::channel(timer.clone());
        let controller = Self {
            shared: Arc::new(Mutex::new(Shared {
                timer: timer.clone(),
                pending_start: None,
                revision: 0,
            })),
            ticker: Arc::new(Mutex::new(None)),
            changes: Arc::new(changes),
            state_store: services.state_store,
            recorder: services.recorder,
            notifier: services.notifier,
            user_id,
            tick_interval: DEFAULT_TICK_INTERVAL,
        };
        controller.publish(&timer);
        controller
    }

    /// Every beat still takes one second off the countdown, so anything other
    /// than one second only makes sense for compressed runs in tests.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Receives the state after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.changes.subscribe()
    }

    pub async fn state(&self) -> TimerState {
        self.shared.lock().await.timer.clone()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::from(&self.shared.lock().await.timer)
    }

    /// Starts the countdown, opening a session record first. Does nothing
    /// while running or while a start issued since the last pause, reset or
    /// skip is still opening its record.
    pub async fn start(&self, task_id: Option<String>) -> TimerState {
        let (phase, task, revision) = {
            let mut shared = self.shared.lock().await;
            let in_flight = shared.pending_start == Some(shared.revision);
            if shared.timer.running || in_flight {
                log_debug!("start ignored: timer already running");
                return shared.timer.clone();
            }
            shared.pending_start = Some(shared.revision);
            (
                shared.timer.phase,
                shared.timer.resolve_task(task_id.as_deref()),
                shared.revision,
            )
        };

        // Finish on a task of its own so a dropped caller cannot leave
        // `pending_start` set.
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let session_id = match controller.user_id.as_deref() {
                Some(user_id) => controller.recorder.open(user_id, task, phase).await,
                None => {
                    log_debug!("no signed-in user; {} session not recorded", phase.as_str());
                    None
                }
            };
            controller.finish_start(session_id, task_id, revision).await
        });

        match handle.await {
            Ok(state) => state,
            Err(err) => {
                log_error!("start task failed: {err}");
                self.state().await
            }
        }
    }

    async fn finish_start(
        &self,
        session_id: Option<String>,
        task_id: Option<String>,
        revision: u64,
    ) -> TimerState {
        let (snapshot, ticker_revision) = {
            let mut shared = self.shared.lock().await;
            if shared.pending_start == Some(revision) {
                shared.pending_start = None;
            }

            if shared.revision != revision {
                log_warn!(
                    "start superseded while opening session; record {:?} left open",
                    session_id
                );
                return shared.timer.clone();
            }

            shared.timer.mark_started(session_id, task_id);
            // Skipped while idle: the countdown is already at zero.
            self.complete_if_due(&mut shared);
            self.publish(&shared.timer);
            (shared.timer.clone(), shared.revision)
        };

        if snapshot.running {
            self.spawn_ticker(ticker_revision).await;
        }
        snapshot
    }

    /// Stops the countdown. The open session record stays open.
    pub async fn pause(&self) -> TimerState {
        let snapshot = {
            let mut shared = self.shared.lock().await;
            shared.revision += 1;
            shared.timer.pause();
            self.publish(&shared.timer);
            shared.timer.clone()
        };

        self.cancel_ticker().await;
        snapshot
    }

    /// Restarts the current phase. The open session record is abandoned, not
    /// finalized.
    pub async fn reset(&self) -> TimerState {
        let snapshot = {
            let mut shared = self.shared.lock().await;
            shared.revision += 1;
            if let Some(session_id) = shared.timer.active_session_id.as_deref() {
                log_info!("Abandoning session {} on reset", session_id);
            }
            shared.timer.reset();
            self.publish(&shared.timer);
            shared.timer.clone()
        };

        self.cancel_ticker().await;
        snapshot
    }

    /// Forces the countdown to zero. A running phase completes right away
    /// through the same path as a tick reaching zero.
    pub async fn skip(&self) -> TimerState {
        let snapshot = {
            let mut shared = self.shared.lock().await;
            shared.revision += 1;
            shared.timer.skip();
            self.complete_if_due(&mut shared);
            self.publish(&shared.timer);
            shared.timer.clone()
        };

        self.cancel_ticker().await;
        snapshot
    }

    /// Not rejected while running; disabling task changes mid-phase is up to
    /// the presentation layer.
    pub async fn set_current_task(&self, task_id: Option<String>) -> TimerState {
        let mut shared = self.shared.lock().await;
        shared.timer.set_current_task(task_id);
        self.publish(&shared.timer);
        shared.timer.clone()
    }

    /// Stops the ticker and writes the final state.
    pub async fn shutdown(&self) {
        self.cancel_ticker().await;
        let shared = self.shared.lock().await;
        self.publish(&shared.timer);
        log_info!("Timer shut down at {}", shared.timer.display());
    }

    /// One ticker beat. Returns false once the ticker should stop.
    async fn on_tick(&self, revision: u64) -> bool {
        let mut shared = self.shared.lock().await;
        if shared.revision != revision || !shared.timer.running {
            return false;
        }

        shared.timer.tick();
        self.complete_if_due(&mut shared);
        self.publish(&shared.timer);
        shared.timer.running
    }

    fn complete_if_due(&self, shared: &mut Shared) -> Option<PhaseTransition> {
        let transition = shared.timer.settle()?;
        shared.revision += 1;

        if let Some((session_id, actual_minutes)) = transition.finalize.clone() {
            // Fire and forget: errors are logged inside the task.
            drop(self.recorder.finalize(session_id, actual_minutes));
        }

        log_info!(
            "{} finished, next up {} ({} focus sessions completed)",
            transition.from.as_str(),
            transition.to.as_str(),
            transition.completed_focus_count
        );

        if let Err(err) = self.notifier.notify(&transition) {
            log_warn!("Notification not delivered: {err:?}");
        }

        Some(transition)
    }

    fn publish(&self, timer: &TimerState) {
        if let Err(err) = self.state_store.save(timer) {
            log_error!("Failed to persist timer state: {err:?}");
        }
        self.changes.send_replace(timer.clone());
    }

    async fn spawn_ticker(&self, revision: u64) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();
        let period = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !controller.on_tick(revision).await {
                            break;
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }

            log_debug!("ticker for revision {} stopped", revision);
        });

        *ticker_guard = Some(Ticker { handle, cancel });
    }

    async fn cancel_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel.cancel();
            ticker.handle.abort();
        }
    }
}
