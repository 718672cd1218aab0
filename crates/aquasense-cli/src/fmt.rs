//! Output formatting helpers.
//!
//! Times are shown and parsed in the pond's local offset.

use std::io::{self, Write};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use aquasense_core::model::{
    FeedingLog, MetricStats, MortalityLog, PeriodReport, Schedule, SensorReading, UserProfile,
};

use crate::dashboard::{DashboardError, FleetRow, Overview, RoleCounts};

fn zone(offset_secs: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_secs).unwrap_or_else(|| Utc.fix())
}

/// `YYYY-MM-DD HH:MM` in the given offset.
pub fn format_time(ts: i64, offset_secs: i32) -> String {
    DateTime::from_timestamp(ts, 0).map_or_else(
        || ts.to_string(),
        |dt| {
            dt.with_timezone(&zone(offset_secs))
                .format("%Y-%m-%d %H:%M")
                .to_string()
        },
    )
}

/// Parse a user-supplied time: `now`, unix seconds, RFC 3339, or a local
/// `YYYY-MM-DD[ HH:MM[:SS]]`.
pub fn parse_time(input: &str, offset_secs: i32, now: i64) -> Result<i64, DashboardError> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(secs) = input.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }
    let local = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(input, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .ok_or_else(|| DashboardError::Invalid(format!("unrecognised time '{input}'")))?;
    zone(offset_secs)
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| DashboardError::Invalid(format!("ambiguous time '{input}'")))
}

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn mean(stats: &MetricStats) -> String {
    opt(stats.mean())
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}~")
    }
}

pub fn write_profile(w: &mut impl Write, p: &UserProfile, offset_secs: i32) -> io::Result<()> {
    writeln!(w, "  User:     {}", p.uid)?;
    writeln!(w, "  Name:     {}", p.name)?;
    if !p.email.is_empty() {
        writeln!(w, "  Email:    {}", p.email)?;
    }
    writeln!(w, "  Role:     {}", p.role)?;
    writeln!(w, "  Joined:   {}", format_time(p.joined_at, offset_secs))?;
    Ok(())
}

pub fn write_overview(w: &mut impl Write, o: &Overview, offset_secs: i32) -> io::Result<()> {
    write_profile(w, &o.profile, offset_secs)?;
    match &o.latest_reading {
        Some(r) => writeln!(
            w,
            "  Latest:   {}  temp {}  pH {}  DO {}  NH3 {}",
            format_time(r.recorded_at, offset_secs),
            opt(r.temperature),
            opt(r.ph),
            opt(r.dissolved_oxygen),
            opt(r.ammonia),
        )?,
        None => writeln!(w, "  Latest:   no readings yet")?,
    }
    match &o.next_schedule {
        Some(s) => writeln!(
            w,
            "  Next:     {}  {:.1} g",
            format_time(s.scheduled_at, offset_secs),
            s.feed_amount
        )?,
        None => writeln!(w, "  Next:     nothing scheduled")?,
    }
    match &o.today {
        Some(t) => writeln!(
            w,
            "  Today:    {} feeding(s), {:.1} g, {} death(s)",
            t.feeding.feedings, t.feeding.total_amount, t.mortality.deaths
        )?,
        None => writeln!(w, "  Today:    no activity")?,
    }
    Ok(())
}

pub fn write_readings(w: &mut impl Write, readings: &[SensorReading], offset_secs: i32) -> io::Result<()> {
    if readings.is_empty() {
        return writeln!(w, "No readings found.");
    }
    writeln!(
        w,
        "{:<17} {:>8} {:>6} {:>8} {:>8}",
        "TIME", "TEMP", "PH", "DO", "NH3"
    )?;
    for r in readings {
        writeln!(
            w,
            "{:<17} {:>8} {:>6} {:>8} {:>8}",
            format_time(r.recorded_at, offset_secs),
            opt(r.temperature),
            opt(r.ph),
            opt(r.dissolved_oxygen),
            opt(r.ammonia),
        )?;
    }
    Ok(())
}

pub fn write_schedules(w: &mut impl Write, schedules: &[Schedule], offset_secs: i32) -> io::Result<()> {
    if schedules.is_empty() {
        return writeln!(w, "No schedules found.");
    }
    writeln!(
        w,
        "{:<32} {:<17} {:>8} {:<11} {:<7} NOTES",
        "ID", "WHEN", "GRAMS", "STATUS", "REPEAT"
    )?;
    for s in schedules {
        let repeat = match s.repeat {
            Some(r) => format!("{r:?}").to_lowercase(),
            None => "-".to_string(),
        };
        writeln!(
            w,
            "{:<32} {:<17} {:>8.1} {:<11} {:<7} {}",
            s.id,
            format_time(s.scheduled_at, offset_secs),
            s.feed_amount,
            s.status,
            repeat,
            truncate(&s.notes, 30),
        )?;
        if let Some(err) = &s.last_error {
            writeln!(w, "{:<32} last error: {}", "", truncate(err, 60))?;
        }
    }
    writeln!(w, "\n{} schedule(s)", schedules.len())
}

pub fn write_schedule(w: &mut impl Write, s: &Schedule, offset_secs: i32) -> io::Result<()> {
    writeln!(w, "  Schedule: {}", s.id)?;
    writeln!(w, "  When:     {}", format_time(s.scheduled_at, offset_secs))?;
    writeln!(w, "  Amount:   {:.1} g", s.feed_amount)?;
    writeln!(w, "  Status:   {}", s.status)?;
    if let Some(repeat) = s.repeat {
        writeln!(w, "  Repeat:   {}", format!("{repeat:?}").to_lowercase())?;
    }
    if !s.notes.is_empty() {
        writeln!(w, "  Notes:    {}", s.notes)?;
    }
    Ok(())
}

pub fn write_feeding_logs(w: &mut impl Write, logs: &[FeedingLog], offset_secs: i32) -> io::Result<()> {
    if logs.is_empty() {
        return writeln!(w, "No feedings recorded.");
    }
    writeln!(w, "{:<17} {:>8} {:<32} NOTES", "FED AT", "GRAMS", "SCHEDULE")?;
    for log in logs {
        writeln!(
            w,
            "{:<17} {:>8.1} {:<32} {}",
            format_time(log.fed_at, offset_secs),
            log.feed_amount,
            log.schedule_id.as_deref().unwrap_or("-"),
            truncate(&log.notes, 30),
        )?;
    }
    Ok(())
}

pub fn write_mortality_logs(w: &mut impl Write, logs: &[MortalityLog], offset_secs: i32) -> io::Result<()> {
    if logs.is_empty() {
        return writeln!(w, "No mortality recorded.");
    }
    writeln!(w, "{:<17} {:>6} {:<20} NOTES", "RECORDED", "COUNT", "CAUSE")?;
    for log in logs {
        writeln!(
            w,
            "{:<17} {:>6} {:<20} {}",
            format_time(log.recorded_at, offset_secs),
            log.count,
            truncate(log.cause.as_deref().unwrap_or("-"), 20),
            truncate(&log.notes, 30),
        )?;
    }
    Ok(())
}

pub fn write_reports(w: &mut impl Write, reports: &[PeriodReport]) -> io::Result<()> {
    if reports.is_empty() {
        return writeln!(w, "No reports in range.");
    }
    writeln!(
        w,
        "{:<14} {:>8} {:>8} {:>6} {:>8} {:>6} {:>8} {:>9} {:>7}",
        "PERIOD", "READINGS", "TEMP", "PH", "DO", "NH3", "FEEDINGS", "GRAMS", "DEATHS"
    )?;
    for r in reports {
        writeln!(
            w,
            "{:<14} {:>8} {:>8} {:>6} {:>8} {:>6} {:>8} {:>9.1} {:>7}",
            r.key,
            r.readings.readings,
            mean(&r.readings.temperature),
            mean(&r.readings.ph),
            mean(&r.readings.dissolved_oxygen),
            mean(&r.readings.ammonia),
            r.feeding.feedings,
            r.feeding.total_amount,
            r.mortality.deaths,
        )?;
    }
    Ok(())
}

pub fn write_users(w: &mut impl Write, users: &[UserProfile]) -> io::Result<()> {
    if users.is_empty() {
        return writeln!(w, "No users found.");
    }
    writeln!(w, "{:<24} {:<24} {:<11} EMAIL", "UID", "NAME", "ROLE")?;
    for u in users {
        writeln!(
            w,
            "{:<24} {:<24} {:<11} {}",
            truncate(&u.uid, 24),
            truncate(&u.name, 24),
            u.role,
            u.email
        )?;
    }
    writeln!(w, "\n{} user(s)", users.len())
}

pub fn write_fleet(w: &mut impl Write, rows: &[FleetRow], offset_secs: i32) -> io::Result<()> {
    if rows.is_empty() {
        return writeln!(w, "No ponds registered.");
    }
    writeln!(
        w,
        "{:<24} {:<11} {:<17} {:>8} {:>6} {:>8}",
        "UID", "ROLE", "LAST READING", "TEMP", "PH", "DO"
    )?;
    for row in rows {
        let (when, temp, ph, oxygen) = row.latest.as_ref().map_or_else(
            || ("never".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
            |r| {
                (
                    format_time(r.recorded_at, offset_secs),
                    opt(r.temperature),
                    opt(r.ph),
                    opt(r.dissolved_oxygen),
                )
            },
        );
        writeln!(
            w,
            "{:<24} {:<11} {:<17} {:>8} {:>6} {:>8}",
            truncate(&row.profile.uid, 24),
            row.profile.role,
            when,
            temp,
            ph,
            oxygen
        )?;
    }
    Ok(())
}

pub fn write_role_counts(w: &mut impl Write, counts: &RoleCounts) -> io::Result<()> {
    writeln!(w, "  Users:        {}", counts.users)?;
    writeln!(w, "  Admins:       {}", counts.admins)?;
    writeln!(w, "  Super-admins: {}", counts.superadmins)?;
    writeln!(w, "  Total:        {}", counts.total())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-10-19T14:35:10Z
    const TS: i64 = 1_792_420_510;

    #[test]
    fn formats_in_pond_offset() {
        assert_eq!(format_time(TS, 0), "2026-10-19 14:35");
        assert_eq!(format_time(TS, 2 * 3_600), "2026-10-19 16:35");
    }

    #[test]
    fn parses_each_accepted_form() {
        assert_eq!(parse_time("now", 0, TS).unwrap(), TS);
        assert_eq!(parse_time("1792420510", 0, 0).unwrap(), TS);
        assert_eq!(parse_time("2026-10-19T14:35:10Z", 0, 0).unwrap(), TS);
        assert_eq!(parse_time("2026-10-19 14:35:10", 0, 0).unwrap(), TS);
        assert_eq!(parse_time("2026-10-19 16:35:10", 2 * 3_600, 0).unwrap(), TS);
        assert_eq!(
            parse_time("2026-10-19", 0, 0).unwrap(),
            TS - 14 * 3_600 - 35 * 60 - 10
        );
        assert!(parse_time("yesterday-ish", 0, 0).is_err());
    }

    #[test]
    fn empty_tables_say_so() {
        let mut out = Vec::new();
        write_readings(&mut out, &[], 0).unwrap();
        write_schedules(&mut out, &[], 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("No readings found."));
        assert!(text.contains("No schedules found."));
    }

    #[test]
    fn schedule_table_shows_last_error() {
        let mut schedule = Schedule::new("u1", "s1", TS, 12.5, "dawn");
        schedule.last_error = Some("feeder timed out".into());
        let mut out = Vec::new();
        write_schedules(&mut out, &[schedule], 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pending"));
        assert!(text.contains("12.5"));
        assert!(text.contains("last error: feeder timed out"));
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("abcdef", 4), "abc~");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
