use anyhow::Result;
use log::info;

use super::state::PhaseTransition;

pub const NOTIFICATION_TITLE: &str = "TimeVault";

/// Delivers the phase-completion message. Failures are reported to the caller
/// but the controller only logs them.
pub trait Notifier: Send + Sync {
    fn notify(&self, transition: &PhaseTransition) -> Result<()>;
}

/// Writes the notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, transition: &PhaseTransition) -> Result<()> {
        info!("[{NOTIFICATION_TITLE}] {}", transition.message());
        Ok(())
    }
}

/// No notification capability (disabled or not permitted).
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _transition: &PhaseTransition) -> Result<()> {
        Ok(())
    }
}
