use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::{
    db::{
        helpers::{parse_datetime, parse_optional_datetime, to_optional_u32, to_u32},
        models::{CompletedSession, NewSession, SessionRecord, NO_TASK_TITLE},
        Database,
    },
    phase::Phase,
    recorder::SessionStore,
};

const SESSION_COLUMNS: &str = "id, user_id, task_id, session_type, planned_duration, actual_duration, started_at, ended_at, completed";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let session_type: String = row.get("session_type")?;
    let planned: i64 = row.get("planned_duration")?;
    let actual: Option<i64> = row.get("actual_duration")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        task_id: row.get("task_id")?,
        phase: Phase::parse(&session_type)?,
        planned_minutes: to_u32(planned, "planned_duration")?,
        actual_minutes: to_optional_u32(actual, "actual_duration")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        completed: row.get("completed")?,
    })
}

fn row_to_completed(row: &Row) -> Result<CompletedSession> {
    let session_type: String = row.get("session_type")?;
    let planned: i64 = row.get("planned_duration")?;
    let actual: Option<i64> = row.get("actual_duration")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let task_title: Option<String> = row.get("task_title")?;

    Ok(CompletedSession {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        task_title: task_title.unwrap_or_else(|| NO_TASK_TITLE.to_string()),
        phase: Phase::parse(&session_type)?,
        planned_minutes: to_u32(planned, "planned_duration")?,
        actual_minutes: to_optional_u32(actual, "actual_duration")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &NewSession) -> Result<String> {
        let record = session.clone();
        self.execute(move |conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO pomodoro_sessions (id, user_id, task_id, session_type, planned_duration, started_at, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![
                    id,
                    record.user_id,
                    record.task_id,
                    record.phase.as_str(),
                    record.planned_minutes,
                    record.started_at.to_rfc3339(),
                ],
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn complete_session(
        &self,
        session_id: &str,
        actual_minutes: u32,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE pomodoro_sessions
                 SET actual_duration = ?1,
                     ended_at = ?2,
                     completed = 1
                 WHERE id = ?3",
                params![actual_minutes, ended_at.to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session {session_id} not found"));
            }

            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM pomodoro_sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            Ok(session)
        })
        .await
    }

    /// Sessions that were opened but never finalized (paused, reset or
    /// superseded), newest first.
    pub async fn list_incomplete_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM pomodoro_sessions
                 WHERE user_id = ?1 AND completed = 0
                 ORDER BY started_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut rows = stmt.query(params![user_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Completed sessions for a user joined with their task title, newest first.
    pub async fn list_completed_sessions(&self, user_id: &str) -> Result<Vec<CompletedSession>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.task_id, s.session_type, s.planned_duration, s.actual_duration,
                        s.started_at, s.ended_at, t.title AS task_title
                 FROM pomodoro_sessions s
                 LEFT JOIN tasks t ON t.id = s.task_id
                 WHERE s.user_id = ?1 AND s.completed = 1
                 ORDER BY s.started_at DESC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_completed(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Number of the user's tasks marked completed.
    pub async fn count_completed_tasks(&self, user_id: &str) -> Result<u32> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND completed = 1",
                params![user_id],
                |row| row.get(0),
            )?;
            to_u32(count, "completed_tasks")
        })
        .await
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn create_session(&self, session: NewSession) -> Result<String> {
        self.insert_session(&session).await
    }

    async fn complete_session(
        &self,
        session_id: &str,
        actual_minutes: u32,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        Database::complete_session(self, session_id, actual_minutes, ended_at).await
    }
}
