pub mod controller;
pub mod notify;
pub mod state;

pub use controller::{PomodoroController, TimerServices, TimerSnapshot};
pub use notify::{LogNotifier, Notifier, SilentNotifier};
pub use state::{PhaseTransition, TimerState, TimerStatus};
