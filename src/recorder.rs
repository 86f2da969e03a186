use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time};
use uuid::Uuid;

use crate::{
    db::{NewSession, SessionRecord},
    phase::Phase,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_RECORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend that owns session records (the `pomodoro_sessions` table).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts an incomplete record and returns its id.
    async fn create_session(&self, session: NewSession) -> Result<String>;

    /// Marks a record complete with its actual duration and end time.
    async fn complete_session(
        &self,
        session_id: &str,
        actual_minutes: u32,
        ended_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Opens and finalizes session records on behalf of the timer. Store failures
/// are logged here and never reach the caller.
#[derive(Clone)]
pub struct SessionRecorder {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_RECORDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns `None` when the store is unavailable.
    pub async fn open(&self, user_id: &str, task_id: Option<String>, phase: Phase) -> Option<String> {
        let session = NewSession::new(user_id, task_id, phase, Utc::now());

        match time::timeout(self.timeout, self.store.create_session(session)).await {
            Ok(Ok(session_id)) => {
                log_info!("Opened {} session {}", phase.as_str(), session_id);
                Some(session_id)
            }
            Ok(Err(err)) => {
                log_error!("Failed to open {} session: {err:?}", phase.as_str());
                None
            }
            Err(_) => {
                log_warn!(
                    "Opening {} session timed out after {:?}",
                    phase.as_str(),
                    self.timeout
                );
                None
            }
        }
    }

    /// Closes the record in the background; the end time is taken now.
    pub fn finalize(&self, session_id: String, actual_minutes: u32) -> JoinHandle<()> {
        let store = self.store.clone();
        let timeout = self.timeout;
        let ended_at = Utc::now();

        tokio::spawn(async move {
            let update = store.complete_session(&session_id, actual_minutes, ended_at);
            match time::timeout(timeout, update).await {
                Ok(Ok(())) => log_info!("Completed session {} ({} min)", session_id, actual_minutes),
                Ok(Err(err)) => log_error!("Failed to complete session {}: {err:?}", session_id),
                Err(_) => log_warn!("Completing session {} timed out after {:?}", session_id, timeout),
            }
        })
    }
}

/// In-process session store. Useful when no database is configured and as a
/// recording fake in tests.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<Vec<SessionRecord>>,
    failing: AtomicBool,
    create_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails until `set_failing(false)`.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: NewSession) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("session store unavailable");
        }

        let id = Uuid::new_v4().to_string();
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("session records lock poisoned"))?;
        records.push(SessionRecord::open(id.clone(), session));
        Ok(id)
    }

    async fn complete_session(
        &self,
        session_id: &str,
        actual_minutes: u32,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("session store unavailable");
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("session records lock poisoned"))?;
        let record = records
            .iter_mut()
            .find(|record| record.id == session_id)
            .ok_or_else(|| anyhow!("session {session_id} not found"))?;
        record.finish(actual_minutes, ended_at);
        Ok(())
    }
}
