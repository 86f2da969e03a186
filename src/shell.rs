use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::info;
use tokio::io::{self, AsyncBufReadExt, BufReader};

use crate::{
    db::Database,
    stats::{daily_focus, DailyFocus, FocusStats, TimeFrame},
    timer::{PomodoroController, TimerSnapshot, TimerState},
};

const HELP: &str = "commands: start [task] | pause | reset | skip | task <id>|none | status | stats [week|month] | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Option<String>),
    Pause,
    Reset,
    Skip,
    SelectTask(Option<String>),
    Status,
    Stats(TimeFrame),
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let argument = parts.next().map(str::to_string);
        if parts.next().is_some() {
            bail!("too many arguments for '{verb}'");
        }

        let command = match (verb.as_str(), argument) {
            ("start", task) => Command::Start(task),
            ("pause", None) => Command::Pause,
            ("reset", None) => Command::Reset,
            ("skip", None) => Command::Skip,
            ("task", Some(task)) if task.eq_ignore_ascii_case("none") => Command::SelectTask(None),
            ("task", Some(task)) => Command::SelectTask(Some(task)),
            ("task", None) => bail!("usage: task <id>|none"),
            ("status", None) => Command::Status,
            ("stats", None) => Command::Stats(TimeFrame::default()),
            ("stats", Some(frame)) => Command::Stats(frame.parse()?),
            ("help", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            (other, Some(_)) if matches!(other, "pause" | "reset" | "skip" | "status" | "help" | "quit" | "exit") => {
                bail!("'{other}' takes no arguments")
            }
            (other, _) => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

fn render(snapshot: &TimerSnapshot) -> String {
    let state = &snapshot.state;
    let task = state.selected_task_id.as_deref().unwrap_or("-");
    format!(
        "{} {} [{:?}] {:.0}% | completed today: {} | task: {}",
        snapshot.title,
        snapshot.display,
        snapshot.status,
        snapshot.progress_percent,
        state.completed_focus_count,
        task
    )
}

fn render_stats(stats: &FocusStats) -> String {
    format!(
        "focus sessions: {} | focus time: {} min | average: {:.1} min | tasks done: {} | today: {} | this week: {}",
        stats.total_focus_sessions,
        stats.total_focus_minutes,
        stats.average_session_minutes,
        stats.completed_tasks,
        stats.today_sessions,
        stats.this_week_sessions
    )
}

fn render_day(day: &DailyFocus) -> String {
    format!(
        "  {} {:>2} sessions {:>4} min",
        day.date.format("%a %b %d"),
        day.sessions,
        day.minutes
    )
}

async fn print_stats(
    controller: &PomodoroController,
    database: &Database,
    frame: TimeFrame,
) -> Result<()> {
    let Some(user_id) = controller.user_id() else {
        println!("not signed in; no sessions recorded");
        return Ok(());
    };
    let sessions = database.list_completed_sessions(user_id).await?;
    let completed_tasks = database.count_completed_tasks(user_id).await?;
    let now = Utc::now();

    println!("{}", render_stats(&FocusStats::compute(&sessions, completed_tasks, now)));
    for day in daily_focus(&sessions, frame, now) {
        println!("{}", render_day(&day));
    }
    Ok(())
}

/// Announces phase changes that happen between commands (ticks reaching zero).
fn spawn_phase_watcher(controller: &PomodoroController) -> tokio::task::JoinHandle<()> {
    let mut changes = controller.subscribe();
    tokio::spawn(async move {
        let mut last: TimerState = changes.borrow().clone();
        while changes.changed().await.is_ok() {
            let current = changes.borrow().clone();
            if current.phase != last.phase {
                println!(
                    "{} is over, {} ready ({})",
                    last.phase.title(),
                    current.phase.title(),
                    current.display()
                );
            }
            last = current;
        }
    })
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run_shell(controller: PomodoroController, database: Database) -> Result<()> {
    let watcher = spawn_phase_watcher(&controller);
    let mut lines = BufReader::new(io::stdin()).lines();

    println!("{HELP}");
    println!("{}", render(&controller.snapshot().await));

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match command {
            Command::Start(task) => {
                controller.start(task).await;
            }
            Command::Pause => {
                controller.pause().await;
            }
            Command::Reset => {
                controller.reset().await;
            }
            Command::Skip => {
                controller.skip().await;
            }
            Command::SelectTask(task) => {
                controller.set_current_task(task).await;
            }
            Command::Status => {}
            Command::Stats(frame) => {
                if let Err(err) = print_stats(&controller, &database, frame).await {
                    println!("stats unavailable: {err}");
                }
                continue;
            }
            Command::Help => {
                println!("{HELP}");
                continue;
            }
            Command::Quit => break,
        }

        println!("{}", render(&controller.snapshot().await));
    }

    controller.shutdown().await;
    watcher.abort();
    info!("Shell closed");
    Ok(())
}
