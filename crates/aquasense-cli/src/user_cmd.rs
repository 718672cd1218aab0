//! User dashboard subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;
use std::time::Duration;

use tokio::sync::watch;

use aquasense_core::PeriodKind;
use aquasense_core::db::unix_timestamp;
use aquasense_core::model::{Repeat, ScheduleStatus};

use crate::dashboard::{DashboardError, NewSchedule, ScheduleEdit, UserDashboard};
use crate::fmt::{self, format_time, parse_time};
use crate::live::LiveReadings;

const DAY_SECS: i64 = 86_400;

/// Clock and display settings shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub now: i64,
    pub offset_secs: i32,
    /// Fallback refresh for live views.
    pub refresh: Duration,
}

/// User dashboard actions.
#[derive(clap::Subcommand, Debug)]
pub enum UserAction {
    /// Profile, latest reading, next feeding and today's totals.
    Overview,
    /// Sensor readings in a time range.
    Readings {
        /// Start of the range (default: 24 hours ago).
        #[arg(long)]
        from: Option<String>,
        /// End of the range, exclusive (default: now).
        #[arg(long)]
        to: Option<String>,
        /// Maximum results.
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Follow the latest readings until interrupted.
    Watch {
        /// Readings per snapshot.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
    /// List feeding schedules.
    Schedules {
        /// Filter by status: pending, in-progress, completed.
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Create, edit or delete a schedule.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Queue a feeding for the next runtime tick.
    FeedNow {
        /// Grams of feed.
        amount: f64,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Recent feedings.
    Feedings {
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Record or list mortality.
    Mortality {
        #[command(subcommand)]
        action: MortalityAction,
    },
    /// Aggregated hourly, daily, weekly or monthly reports.
    Reports {
        /// hour, day, week or month.
        kind: PeriodKind,
        /// Earliest bucket start (default: 30 days ago).
        #[arg(long)]
        from: Option<String>,
        /// Bucket starts before this time (default: now).
        #[arg(long)]
        to: Option<String>,
    },
    /// Edit profile name or email.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ScheduleAction {
    /// Add a schedule.
    Add {
        /// When to feed.
        #[arg(long)]
        at: String,
        /// Grams of feed.
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "")]
        notes: String,
        /// daily or weekly.
        #[arg(long)]
        repeat: Option<String>,
    },
    /// Edit a pending schedule.
    Edit {
        id: String,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        /// daily, weekly or none.
        #[arg(long)]
        repeat: Option<String>,
    },
    /// Delete a pending schedule.
    Delete { id: String },
}

#[derive(clap::Subcommand, Debug)]
pub enum MortalityAction {
    /// Record dead fish.
    Record {
        count: u32,
        #[arg(long)]
        cause: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
        /// When it was observed (default: now).
        #[arg(long)]
        at: Option<String>,
    },
    /// Recent mortality events.
    List {
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

fn parse_status(s: &str) -> Result<ScheduleStatus, DashboardError> {
    match s {
        "pending" => Ok(ScheduleStatus::Pending),
        "in-progress" | "in_progress" => Ok(ScheduleStatus::InProgress),
        "completed" => Ok(ScheduleStatus::Completed),
        other => Err(DashboardError::Invalid(format!("unknown status '{other}'"))),
    }
}

/// `none` clears the repetition.
fn parse_repeat(s: &str) -> Result<Option<Repeat>, DashboardError> {
    match s {
        "daily" => Ok(Some(Repeat::Daily)),
        "weekly" => Ok(Some(Repeat::Weekly)),
        "none" | "once" => Ok(None),
        other => Err(DashboardError::Invalid(format!("unknown repeat '{other}'"))),
    }
}

fn time_or(input: Option<&str>, default: i64, ctx: &Context) -> Result<i64, DashboardError> {
    input.map_or(Ok(default), |s| parse_time(s, ctx.offset_secs, ctx.now))
}

/// Execute a user dashboard action against `dash`.
pub async fn run(
    dash: &UserDashboard,
    action: UserAction,
    ctx: &Context,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let offset = ctx.offset_secs;
    match action {
        UserAction::Overview => {
            let overview = dash.overview(ctx.now).await?;
            fmt::write_overview(out, &overview, offset)?;
        }
        UserAction::Readings { from, to, limit } => {
            let from = time_or(from.as_deref(), ctx.now - DAY_SECS, ctx)?;
            let to = time_or(to.as_deref(), ctx.now + 1, ctx)?;
            let readings = dash.readings(from, to, limit).await?;
            fmt::write_readings(out, &readings, offset)?;
        }
        UserAction::Watch { limit } => {
            let live = LiveReadings::new(dash.clone(), limit, ctx.refresh);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });
            live.run(shutdown_rx, |readings| {
                writeln!(out, "--- {} ---", format_time(unix_timestamp(), offset))?;
                fmt::write_readings(out, readings, offset)?;
                out.flush()?;
                Ok(())
            })
            .await?;
            ctrl_c.abort();
        }
        UserAction::Schedules { status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let schedules = dash.schedules(status).await?;
            fmt::write_schedules(out, &schedules, offset)?;
        }
        UserAction::Schedule { action } => run_schedule(dash, action, ctx, out).await?,
        UserAction::FeedNow { amount, notes } => {
            let schedule = dash.feed_now(amount, &notes, ctx.now).await?;
            writeln!(out, "Feeding queued for the next runtime tick.")?;
            fmt::write_schedule(out, &schedule, offset)?;
        }
        UserAction::Feedings { limit } => {
            let logs = dash.feeding_logs(limit).await?;
            fmt::write_feeding_logs(out, &logs, offset)?;
        }
        UserAction::Mortality { action } => match action {
            MortalityAction::Record {
                count,
                cause,
                notes,
                at,
            } => {
                let at = time_or(at.as_deref(), ctx.now, ctx)?;
                let log = dash.record_mortality(count, cause, &notes, at).await?;
                writeln!(out, "Recorded {} death(s) at {}.", log.count, format_time(at, offset))?;
            }
            MortalityAction::List { limit } => {
                let logs = dash.mortality_logs(limit).await?;
                fmt::write_mortality_logs(out, &logs, offset)?;
            }
        },
        UserAction::Reports { kind, from, to } => {
            let from = time_or(from.as_deref(), ctx.now - 30 * DAY_SECS, ctx)?;
            let to = time_or(to.as_deref(), ctx.now + 1, ctx)?;
            let reports = dash.reports(kind, from, to).await?;
            fmt::write_reports(out, &reports)?;
        }
        UserAction::Profile { name, email } => {
            let profile = dash.update_profile(name, email).await?;
            fmt::write_profile(out, &profile, offset)?;
        }
    }
    Ok(())
}

async fn run_schedule(
    dash: &UserDashboard,
    action: ScheduleAction,
    ctx: &Context,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        ScheduleAction::Add {
            at,
            amount,
            notes,
            repeat,
        } => {
            let new = NewSchedule {
                scheduled_at: parse_time(&at, ctx.offset_secs, ctx.now)?,
                feed_amount: amount,
                notes,
                repeat: repeat.as_deref().map(parse_repeat).transpose()?.flatten(),
            };
            let schedule = dash.create_schedule(new, ctx.now).await?;
            writeln!(out, "Schedule created.")?;
            fmt::write_schedule(out, &schedule, ctx.offset_secs)?;
        }
        ScheduleAction::Edit {
            id,
            at,
            amount,
            notes,
            repeat,
        } => {
            let edit = ScheduleEdit {
                scheduled_at: at
                    .as_deref()
                    .map(|s| parse_time(s, ctx.offset_secs, ctx.now))
                    .transpose()?,
                feed_amount: amount,
                notes,
                repeat: repeat.as_deref().map(parse_repeat).transpose()?,
            };
            let schedule = dash.update_schedule(&id, edit).await?;
            writeln!(out, "Schedule updated.")?;
            fmt::write_schedule(out, &schedule, ctx.offset_secs)?;
        }
        ScheduleAction::Delete { id } => {
            dash.delete_schedule(&id).await?;
            writeln!(out, "Schedule {id} deleted.")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_repeat() {
        assert_eq!(parse_status("in-progress").unwrap(), ScheduleStatus::InProgress);
        assert!(parse_status("done").is_err());
        assert_eq!(parse_repeat("weekly").unwrap(), Some(Repeat::Weekly));
        assert_eq!(parse_repeat("none").unwrap(), None);
        assert!(parse_repeat("hourly").is_err());
    }
}
