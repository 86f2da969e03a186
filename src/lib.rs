pub mod config;
pub mod db;
pub mod persistence;
pub mod phase;
pub mod recorder;
pub mod shell;
pub mod stats;
pub mod timer;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};

use config::AppConfig;
use db::Database;
use persistence::FileStateStore;
use recorder::SessionRecorder;
use timer::{LogNotifier, Notifier, PomodoroController, SilentNotifier, TimerServices};

pub use phase::Phase;
pub use timer::{TimerSnapshot, TimerState};

/// Wires config, storage and the timer together and runs the interactive shell.
pub async fn run() -> Result<()> {
    let config = AppConfig::load()?;
    utils::init_logging(config.debug);

    log::info!("TimeVault starting up...");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let database = Database::new(config.database_path())?;
    let recorder = SessionRecorder::new(Arc::new(database.clone()))
        .with_timeout(config.recorder_timeout());
    let notifier: Arc<dyn Notifier> = if config.notifications {
        Arc::new(LogNotifier)
    } else {
        Arc::new(SilentNotifier)
    };

    let services = TimerServices {
        state_store: Arc::new(FileStateStore::new(&config.data_dir)),
        recorder,
        notifier,
    };
    let controller = PomodoroController::new(config.user_id.clone(), services);

    shell::run_shell(controller, database).await
}
