use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::{db::CompletedSession, phase::Phase};

/// Dashboard summary over a user's completed sessions.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusStats {
    pub total_focus_sessions: usize,
    pub total_focus_minutes: u32,
    pub average_session_minutes: f64,
    /// Tasks the user has marked done, counted by the task store.
    pub completed_tasks: u32,
    pub today_sessions: usize,
    pub this_week_sessions: usize,
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_sunday() as i64)
}

impl FocusStats {
    /// `today` and `this week` are counted over every phase, the rest over
    /// focus sessions only. Weeks start on Sunday; dates are UTC.
    pub fn compute(sessions: &[CompletedSession], completed_tasks: u32, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let week_start = week_start(today);
        let week_end = week_start + Duration::days(6);

        let focus: Vec<&CompletedSession> = sessions
            .iter()
            .filter(|session| session.phase == Phase::Focus)
            .collect();
        let total_focus_minutes: u32 = focus
            .iter()
            .map(|session| session.actual_minutes.unwrap_or(0))
            .sum();
        let average_session_minutes = if focus.is_empty() {
            0.0
        } else {
            total_focus_minutes as f64 / focus.len() as f64
        };

        let today_sessions = sessions
            .iter()
            .filter(|session| session.started_at.date_naive() == today)
            .count();
        let this_week_sessions = sessions
            .iter()
            .filter(|session| {
                let day = session.started_at.date_naive();
                day >= week_start && day <= week_end
            })
            .count();

        Self {
            total_focus_sessions: focus.len(),
            total_focus_minutes,
            average_session_minutes,
            completed_tasks,
            today_sessions,
            this_week_sessions,
        }
    }
}

/// How far back the daily series reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFrame {
    #[default]
    Week,
    Month,
}

impl TimeFrame {
    pub fn days(self) -> u32 {
        match self {
            TimeFrame::Week => 7,
            TimeFrame::Month => 30,
        }
    }
}

impl FromStr for TimeFrame {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "week" => Ok(TimeFrame::Week),
            "month" => Ok(TimeFrame::Month),
            other => bail!("unknown time frame '{other}' (expected week or month)"),
        }
    }
}

/// Focus sessions and minutes started on one UTC day.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyFocus {
    pub date: NaiveDate,
    pub sessions: usize,
    pub minutes: u32,
}

/// One entry per day for the frame ending today, oldest first. Days without
/// focus sessions are present with zero counts.
pub fn daily_focus(sessions: &[CompletedSession], frame: TimeFrame, now: DateTime<Utc>) -> Vec<DailyFocus> {
    let today = now.date_naive();
    (0..frame.days())
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset as i64);
            let (count, minutes) = sessions
                .iter()
                .filter(|session| {
                    session.phase == Phase::Focus && session.started_at.date_naive() == date
                })
                .fold((0, 0u32), |(count, minutes), session| {
                    (count + 1, minutes + session.actual_minutes.unwrap_or(0))
                });
            DailyFocus {
                date,
                sessions: count,
                minutes,
            }
        })
        .collect()
}
