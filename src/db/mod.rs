use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use models::{CompletedSession, NewSession, SessionRecord};

use migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

/// Owns the worker thread; dropped with the last `Database` clone.
struct Worker {
    jobs: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if let Err(err) = self.jobs.send(WorkerMessage::Stop) {
            error!("Failed to stop session DB worker: {err}");
        }
        if let Err(join_err) = handle.join() {
            error!("Session DB worker panicked: {join_err:?}");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

/// Body of the worker thread: reports readiness once, then runs jobs in
/// arrival order until told to stop or every sender is gone.
fn run_worker(
    path: PathBuf,
    ready: mpsc::Sender<Result<()>>,
    jobs: mpsc::Receiver<WorkerMessage>,
) {
    let mut conn = match open_connection(&path) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        error!("Session DB opener went away before the worker was ready");
        return;
    }

    while let Ok(message) = jobs.recv() {
        match message {
            WorkerMessage::Run(job) => job(&mut conn),
            WorkerMessage::Stop => break,
        }
    }

    info!("Session DB worker stopped");
}

/// SQLite-backed session store. All statements run on one worker thread that
/// owns the connection; callers await replies over oneshot channels.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_path = db_path.clone();

        let thread = thread::Builder::new()
            .name("timevault-db".into())
            .spawn(move || run_worker(worker_path, ready_tx, jobs_rx))
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Session database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                error!("Session DB caller dropped before the reply");
            }
        });

        self.worker
            .jobs
            .send(WorkerMessage::Run(job))
            .map_err(|err| anyhow!("failed to send job to DB worker: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_database(dir: &tempfile::TempDir) -> Database {
        Database::new(dir.path().join("timevault.sqlite3")).expect("database opens")
    }

    #[test]
    fn new_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = Database::new(blocker.join("timevault.sqlite3"));
        assert!(result.is_err());
    }

    #[test]
    fn new_fails_when_file_is_not_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timevault.sqlite3");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        assert!(Database::new(path).is_err());
    }

    #[tokio::test]
    async fn execute_returns_task_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir);

        let err = db
            .execute(|_conn| -> Result<()> { Err(anyhow!("no such session")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such session");

        // The worker keeps serving after a failed job.
        let one: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn clone_keeps_worker_alive_after_original_drops() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir);
        let clone = db.clone();
        drop(db);

        let version: i32 = clone
            .execute(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
        assert_eq!(clone.path(), dir.path().join("timevault.sqlite3"));
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir);
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, user_id, title, created_at, updated_at)
                 VALUES ('tsk-1', 'user-1', 'Write report', 'now', 'now')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        // Joins the worker thread.
        drop(db);

        let reopened = open_database(&dir);
        let count: i64 = reopened
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
