use serde::{Deserialize, Serialize};

use crate::phase::{format_time, Phase};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Idle,
    Running,
}

impl Default for TimerStatus {
    fn default() -> Self {
        TimerStatus::Idle
    }
}

/// Persisted timer state. Missing keys fall back to defaults and the key names
/// written by earlier releases are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerState {
    #[serde(alias = "timeLeft")]
    pub remaining_seconds: u32,
    #[serde(alias = "isRunning")]
    pub running: bool,
    #[serde(alias = "sessionType")]
    pub phase: Phase,
    #[serde(alias = "completedPomodoros")]
    pub completed_focus_count: u32,
    #[serde(alias = "currentTaskId")]
    pub selected_task_id: Option<String>,
    #[serde(alias = "sessionId")]
    pub active_session_id: Option<String>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            remaining_seconds: Phase::Focus.nominal_secs(),
            running: false,
            phase: Phase::Focus,
            completed_focus_count: 0,
            selected_task_id: None,
            active_session_id: None,
        }
    }
}

/// Outcome of the completion algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub completed_focus_count: u32,
    /// Session to close, with the minutes to record against it.
    pub finalize: Option<(String, u32)>,
}

impl PhaseTransition {
    pub fn message(&self) -> &'static str {
        match self.from {
            Phase::Focus => "Focus session completed! Time for a break.",
            Phase::ShortBreak | Phase::LongBreak => {
                "Break time over! Ready for another focus session?"
            }
        }
    }
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State as it must look after a reload: never running, countdown clamped
    /// to the phase's nominal length.
    pub fn restored(mut self) -> Self {
        self.running = false;
        self.remaining_seconds = self.remaining_seconds.min(self.phase.nominal_secs());
        self
    }

    pub fn status(&self) -> TimerStatus {
        if self.running {
            TimerStatus::Running
        } else {
            TimerStatus::Idle
        }
    }

    pub fn display(&self) -> String {
        format_time(self.remaining_seconds)
    }

    pub fn progress_percent(&self) -> f64 {
        let total = self.phase.nominal_secs() as f64;
        (total - self.remaining_seconds as f64) / total * 100.0
    }

    /// Task a new session should be linked to: the explicit argument when
    /// non-empty, otherwise the selected task.
    pub fn resolve_task(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.selected_task_id.clone())
    }

    pub fn mark_started(&mut self, session_id: Option<String>, task_id: Option<String>) {
        self.running = true;
        self.active_session_id = session_id;
        if let Some(task_id) = task_id.filter(|id| !id.is_empty()) {
            self.selected_task_id = Some(task_id);
        }
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self) {
        self.remaining_seconds = self.phase.nominal_secs();
        self.running = false;
        self.active_session_id = None;
    }

    pub fn skip(&mut self) {
        self.remaining_seconds = 0;
    }

    pub fn set_current_task(&mut self, task_id: Option<String>) {
        self.selected_task_id = task_id.filter(|id| !id.is_empty());
    }

    /// Advances the countdown by one second. Returns false when nothing ticked.
    pub fn tick(&mut self) -> bool {
        if self.running && self.remaining_seconds > 0 {
            self.remaining_seconds -= 1;
            true
        } else {
            false
        }
    }

    pub fn is_due(&self) -> bool {
        self.running && self.remaining_seconds == 0
    }

    /// Runs the completion algorithm and moves to the next phase.
    pub fn complete(&mut self) -> PhaseTransition {
        let from = self.phase;
        // Completion only happens at zero, so the full planned length is recorded.
        let finalize = self
            .active_session_id
            .take()
            .map(|id| (id, from.planned_minutes()));

        if from == Phase::Focus {
            self.completed_focus_count = self.completed_focus_count.saturating_add(1);
        }
        let to = from.next(self.completed_focus_count);

        self.running = false;
        self.phase = to;
        self.remaining_seconds = to.nominal_secs();

        PhaseTransition {
            from,
            to,
            completed_focus_count: self.completed_focus_count,
            finalize,
        }
    }

    /// Completes the phase when the countdown has hit zero while running.
    pub fn settle(&mut self) -> Option<PhaseTransition> {
        if self.is_due() {
            Some(self.complete())
        } else {
            None
        }
    }
}
