//! Session records as the session store keeps them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Insert payload for a freshly started phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: String,
    pub task_id: Option<String>,
    #[serde(rename = "session_type")]
    pub phase: Phase,
    #[serde(rename = "planned_duration")]
    pub planned_minutes: u32,
    pub started_at: DateTime<Utc>,
}

impl NewSession {
    pub fn new(user_id: &str, task_id: Option<String>, phase: Phase, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            task_id,
            phase,
            planned_minutes: phase.planned_minutes(),
            started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    #[serde(rename = "session_type")]
    pub phase: Phase,
    #[serde(rename = "planned_duration")]
    pub planned_minutes: u32,
    #[serde(rename = "actual_duration")]
    pub actual_minutes: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl SessionRecord {
    pub fn open(id: String, session: NewSession) -> Self {
        Self {
            id,
            user_id: session.user_id,
            task_id: session.task_id,
            phase: session.phase,
            planned_minutes: session.planned_minutes,
            actual_minutes: None,
            started_at: session.started_at,
            ended_at: None,
            completed: false,
        }
    }

    pub fn finish(&mut self, actual_minutes: u32, ended_at: DateTime<Utc>) {
        self.actual_minutes = Some(actual_minutes);
        self.ended_at = Some(ended_at);
        self.completed = true;
    }
}

/// Completed session joined with its task title, as the analytics view reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedSession {
    pub id: String,
    pub task_id: Option<String>,
    pub task_title: String,
    #[serde(rename = "session_type")]
    pub phase: Phase,
    #[serde(rename = "planned_duration")]
    pub planned_minutes: u32,
    #[serde(rename = "actual_duration")]
    pub actual_minutes: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub const NO_TASK_TITLE: &str = "No Task";
