use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const FOCUS_SECS: u32 = 25 * 60;
pub const SHORT_BREAK_SECS: u32 = 5 * 60;
pub const LONG_BREAK_SECS: u32 = 15 * 60;

/// Every n-th completed focus session is followed by a long break.
pub const LONG_BREAK_EVERY: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Focus
    }
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Focus, Phase::ShortBreak, Phase::LongBreak];

    pub fn nominal_secs(self) -> u32 {
        match self {
            Phase::Focus => FOCUS_SECS,
            Phase::ShortBreak => SHORT_BREAK_SECS,
            Phase::LongBreak => LONG_BREAK_SECS,
        }
    }

    pub fn planned_minutes(self) -> u32 {
        self.nominal_secs() / 60
    }

    pub fn is_break(self) -> bool {
        !matches!(self, Phase::Focus)
    }

    /// Wire name used by the session store (`session_type` column).
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Focus => "focus",
            Phase::ShortBreak => "short_break",
            Phase::LongBreak => "long_break",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "focus" => Ok(Phase::Focus),
            "short_break" => Ok(Phase::ShortBreak),
            "long_break" => Ok(Phase::LongBreak),
            other => Err(anyhow!("unknown session type {other}")),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Phase::Focus => "Focus Session",
            Phase::ShortBreak => "Short Break",
            Phase::LongBreak => "Long Break",
        }
    }

    /// Phase that follows `self`. `completed_focus_count` must already include
    /// the session that just finished when `self` is `Focus`.
    pub fn next(self, completed_focus_count: u32) -> Phase {
        match self {
            Phase::Focus if completed_focus_count % LONG_BREAK_EVERY == 0 => Phase::LongBreak,
            Phase::Focus => Phase::ShortBreak,
            Phase::ShortBreak | Phase::LongBreak => Phase::Focus,
        }
    }
}

/// Formats a second count as `MM:SS`; minutes are not wrapped into hours.
pub fn format_time(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
