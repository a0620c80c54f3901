//! Report command for per-project time totals.
//!
//! This module implements `dwell report` with various period options
//! (--week, --last-week, --day, --last-day) and output formats (human-readable, JSON).

use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{ArgGroup, Args};
use serde::Serialize;

use dwell_core::ProjectId;
use dwell_db::Database;

use super::util::{format_duration, project_names};

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("period").args(["week", "last_week", "day", "last_day"])))]
pub struct ReportArgs {
    /// Current week, Monday to Sunday (default).
    #[arg(long)]
    pub week: bool,

    /// Previous week.
    #[arg(long)]
    pub last_week: bool,

    /// Today.
    #[arg(long)]
    pub day: bool,

    /// Yesterday.
    #[arg(long)]
    pub last_day: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReportArgs {
    pub const fn period(&self) -> Period {
        if self.last_week {
            Period::LastWeek
        } else if self.day {
            Period::Day
        } else if self.last_day {
            Period::LastDay
        } else {
            Period::Week
        }
    }
}

/// Report period type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Week,
    LastWeek,
    Day,
    LastDay,
}

/// Period type for JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Week,
    Day,
}

/// Time spent on one project within the period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTotal {
    pub name: String,
    pub duration_ms: i64,
    pub entry_count: usize,
}

/// Computed report data.
#[derive(Debug)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_type: PeriodType,
    pub timezone: String,
    /// Sorted by time descending, then name.
    pub by_project: Vec<ProjectTotal>,
    pub unassigned_ms: i64,
    pub unassigned_count: usize,
}

impl ReportData {
    fn total_ms(&self) -> i64 {
        self.by_project.iter().map(|p| p.duration_ms).sum::<i64>() + self.unassigned_ms
    }

    fn entry_count(&self) -> usize {
        self.by_project.iter().map(|p| p.entry_count).sum::<usize>() + self.unassigned_count
    }
}

// ========== Period Date Calculation ==========

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
fn local_midnight_to_utc(local_date: NaiveDate) -> DateTime<Utc> {
    let midnight = local_date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // Spring-forward gap at midnight: the first local hour after it exists.
            let one_am = midnight + chrono::Duration::hours(1);
            Local.from_local_datetime(&one_am).earliest().map_or_else(
                || Utc.from_utc_datetime(&midnight),
                |dt| dt.with_timezone(&Utc),
            )
        }
    }
}

fn monday_of(today: NaiveDate) -> NaiveDate {
    today - chrono::Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// Get boundaries for a given period as a half-open interval, using the
/// provided local date as reference.
pub fn get_period_boundaries(period: Period, today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let (start, end) = match period {
        Period::Week => {
            let monday = monday_of(today);
            (monday, monday + chrono::Duration::days(7))
        }
        Period::LastWeek => {
            let monday = monday_of(today);
            (monday - chrono::Duration::days(7), monday)
        }
        Period::Day => (today, today + chrono::Duration::days(1)),
        Period::LastDay => (today - chrono::Duration::days(1), today),
    };
    (local_midnight_to_utc(start), local_midnight_to_utc(end))
}

// ========== Progress Bar ==========

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "ratio is clamped to 0..=10 before the cast"
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

// ========== Report Generation ==========

/// Sums entries that start within the period. An entry still running past
/// the period end only counts up to the end.
pub fn generate_report_data(
    db: &Database,
    period: Period,
    today: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<ReportData> {
    let (period_start, period_end) = get_period_boundaries(period, today);

    let period_type = match period {
        Period::Week | Period::LastWeek => PeriodType::Week,
        Period::Day | Period::LastDay => PeriodType::Day,
    };

    let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());

    let names = project_names(db)?;
    let mut totals: HashMap<ProjectId, ProjectTotal> = HashMap::new();
    let mut unassigned_ms = 0;
    let mut unassigned_count = 0;

    for entry in db.entries_in_range(period_start, period_end)? {
        let end = entry.end_time.min(period_end);
        let ms = (end - entry.start_time).num_milliseconds().max(0);
        let name = entry.project_id.and_then(|id| names.get(&id).map(|name| (id, name)));
        match name {
            Some((id, name)) => {
                let total = totals.entry(id).or_insert_with(|| ProjectTotal {
                    name: name.clone(),
                    duration_ms: 0,
                    entry_count: 0,
                });
                total.duration_ms += ms;
                total.entry_count += 1;
            }
            None => {
                unassigned_ms += ms;
                unassigned_count += 1;
            }
        }
    }

    let mut by_project: Vec<ProjectTotal> = totals.into_values().collect();
    by_project.sort_by(|a, b| {
        b.duration_ms
            .cmp(&a.duration_ms)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(ReportData {
        generated_at,
        period_start,
        period_end,
        period_type,
        timezone,
        by_project,
        unassigned_ms,
        unassigned_count,
    })
}

/// Formats the period description for the report header.
fn format_period_description(data: &ReportData) -> String {
    let start_date = data.period_start.with_timezone(&Local).date_naive();
    match data.period_type {
        PeriodType::Week => format!("Week of {}", start_date.format("%b %-d, %Y")),
        PeriodType::Day => start_date.format("%A, %b %-d, %Y").to_string(),
    }
}

fn duration(ms: i64) -> String {
    format_duration(chrono::Duration::milliseconds(ms))
}

/// Writes the human-readable report.
pub fn write_report<W: Write>(writer: &mut W, data: &ReportData) -> Result<()> {
    writeln!(writer, "TIME REPORT: {}", format_period_description(data))?;

    if data.entry_count() == 0 {
        let period_word = match data.period_type {
            PeriodType::Week => "week",
            PeriodType::Day => "day",
        };
        writeln!(writer)?;
        writeln!(writer, "No time recorded this {period_word}.")?;
        writeln!(writer)?;
        writeln!(writer, "Hint: Run 'dwell status' to check tracking health.")?;
        return Ok(());
    }

    let max_ms = data
        .by_project
        .iter()
        .map(|p| p.duration_ms)
        .chain([data.unassigned_ms])
        .max()
        .unwrap_or(0);

    writeln!(writer)?;
    writeln!(writer, "BY PROJECT")?;
    writeln!(writer, "──────────")?;
    if data.by_project.is_empty() {
        writeln!(writer, "(no assigned entries)")?;
    }
    for project in &data.by_project {
        writeln!(
            writer,
            "{:<24} {:>7}  {}",
            project.name,
            duration(project.duration_ms),
            progress_bar(project.duration_ms, max_ms)
        )?;
    }

    if data.unassigned_count > 0 {
        writeln!(writer)?;
        writeln!(
            writer,
            "{:<24} {:>7}  {}",
            "(unassigned)",
            duration(data.unassigned_ms),
            progress_bar(data.unassigned_ms, max_ms)
        )?;
        writeln!(
            writer,
            "Tip: Run 'dwell entries' and 'dwell assign <entry> <project>' to categorize"
        )?;
    }

    let total_ms = data.total_ms();
    let assigned_ms = total_ms - data.unassigned_ms;

    writeln!(writer)?;
    writeln!(writer, "SUMMARY")?;
    writeln!(writer, "───────")?;
    writeln!(writer, "Total tracked:  {}", duration(total_ms))?;
    // Percentages only mean something once there is half an hour of data.
    if total_ms >= 1_800_000 {
        #[expect(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            reason = "percentage of a positive total"
        )]
        let assigned_pct = (assigned_ms as f64 / total_ms as f64 * 100.0).round() as i64;
        writeln!(writer, "Assigned:       {} ({assigned_pct}%)", duration(assigned_ms))?;
    } else {
        writeln!(writer, "Assigned:       {}", duration(assigned_ms))?;
    }
    writeln!(writer, "Entries:        {}", data.entry_count())?;
    writeln!(writer, "Timezone:       {}", data.timezone)?;
    Ok(())
}

// ========== JSON Output ==========

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub generated_at: String,
    pub timezone: String,
    pub period: JsonPeriod,
    pub by_project: Vec<JsonProjectEntry>,
    pub unassigned: JsonTotals,
    pub totals: JsonTotals,
}

#[derive(Debug, Serialize)]
pub struct JsonPeriod {
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub period_type: PeriodType,
}

#[derive(Debug, Serialize)]
pub struct JsonProjectEntry {
    pub project: String,
    pub duration_ms: i64,
    pub entry_count: usize,
}

#[derive(Debug, Serialize)]
pub struct JsonTotals {
    pub duration_ms: i64,
    pub entry_count: usize,
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData) -> Result<String> {
    let local_start = data.period_start.with_timezone(&Local);
    let local_end = data.period_end.with_timezone(&Local);

    // period_end is the first moment of the next period; the JSON end date is inclusive.
    let end_date = (local_end.date_naive() - chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let report = JsonReport {
        generated_at: data.generated_at.to_rfc3339(),
        timezone: data.timezone.clone(),
        period: JsonPeriod {
            start: local_start.date_naive().format("%Y-%m-%d").to_string(),
            end: end_date,
            period_type: data.period_type,
        },
        by_project: data
            .by_project
            .iter()
            .map(|p| JsonProjectEntry {
                project: p.name.clone(),
                duration_ms: p.duration_ms,
                entry_count: p.entry_count,
            })
            .collect(),
        unassigned: JsonTotals {
            duration_ms: data.unassigned_ms,
            entry_count: data.unassigned_count,
        },
        totals: JsonTotals {
            duration_ms: data.total_ms(),
            entry_count: data.entry_count(),
        },
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run<W: Write>(writer: &mut W, db: &Database, args: &ReportArgs) -> Result<()> {
    let generated_at = Utc::now();
    let today = generated_at.with_timezone(&Local).date_naive();
    let data = generate_report_data(db, args.period(), today, generated_at)?;

    if args.json {
        writeln!(writer, "{}", format_report_json(&data)?)?;
    } else {
        write_report(writer, &data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use dwell_core::{TimeEntry, WindowInfo};
    use insta::assert_snapshot;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn local_dates(bounds: (DateTime<Utc>, DateTime<Utc>)) -> (NaiveDate, NaiveDate) {
        (
            bounds.0.with_timezone(&Local).date_naive(),
            bounds.1.with_timezone(&Local).date_naive(),
        )
    }

    // ========== Period Date Calculation Tests ==========

    #[test]
    fn week_runs_monday_to_monday() {
        // Mar 5, 2025 is a Wednesday
        let wednesday = date(2025, 3, 5);
        assert_eq!(
            local_dates(get_period_boundaries(Period::Week, wednesday)),
            (date(2025, 3, 3), date(2025, 3, 10))
        );
        assert_eq!(
            local_dates(get_period_boundaries(Period::Week, date(2025, 3, 3))),
            (date(2025, 3, 3), date(2025, 3, 10))
        );
        assert_eq!(
            local_dates(get_period_boundaries(Period::Week, date(2025, 3, 9))),
            (date(2025, 3, 3), date(2025, 3, 10))
        );
    }

    #[test]
    fn last_week_and_days() {
        let wednesday = date(2025, 3, 5);
        assert_eq!(
            local_dates(get_period_boundaries(Period::LastWeek, wednesday)),
            (date(2025, 2, 24), date(2025, 3, 3))
        );
        assert_eq!(
            local_dates(get_period_boundaries(Period::Day, wednesday)),
            (date(2025, 3, 5), date(2025, 3, 6))
        );
        assert_eq!(
            local_dates(get_period_boundaries(Period::LastDay, date(2025, 3, 1))),
            (date(2025, 2, 28), date(2025, 3, 1))
        );
    }

    #[test]
    fn period_flag_selection() {
        let args = |week, last_week, day, last_day| ReportArgs {
            week,
            last_week,
            day,
            last_day,
            json: false,
        };
        assert_eq!(args(false, false, false, false).period(), Period::Week);
        assert_eq!(args(true, false, false, false).period(), Period::Week);
        assert_eq!(args(false, true, false, false).period(), Period::LastWeek);
        assert_eq!(args(false, false, true, false).period(), Period::Day);
        assert_eq!(args(false, false, false, true).period(), Period::LastDay);
    }

    // ========== Progress Bar Tests ==========

    #[test]
    fn progress_bar_scales_to_max() {
        assert_eq!(progress_bar(100, 100), "██████████");
        assert_eq!(progress_bar(50, 100), "█████░░░░░");
        assert_eq!(progress_bar(20, 100), "██░░░░░░░░");
    }

    #[test]
    fn progress_bar_minimum_and_zero() {
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(0, 100), "░░░░░░░░░░");
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
    }

    // ========== Report Generation Tests ==========

    /// A week with two projects and one unassigned entry, offsets in minutes
    /// from the local Monday midnight.
    fn seeded_week() -> (Database, DateTime<Utc>) {
        let db = Database::open_in_memory().unwrap();
        let acme = db.add_project("Acme").unwrap();
        let internal = db.add_project("Internal").unwrap();
        let (monday, _) = get_period_boundaries(Period::Week, date(2025, 3, 5));

        let add = |title: &str, from: i64, to: i64, project: Option<ProjectId>| {
            let mut entry = TimeEntry::open(
                WindowInfo::new(title, "app"),
                monday + Duration::minutes(from),
            );
            entry.end_time = monday + Duration::minutes(to);
            entry.project_id = project;
            db.add_entry(&entry).unwrap();
        };
        add("main.rs", 540, 600, Some(acme.id));
        add("lib.rs", 600, 635, Some(acme.id));
        add("standup", 635, 655, Some(internal.id));
        add("Inbox", 655, 660, None);
        // Last week, excluded.
        add("old", -600, -540, Some(acme.id));
        (db, monday)
    }

    fn report(db: &Database) -> ReportData {
        let generated_at = Utc.with_ymd_and_hms(2025, 3, 5, 16, 0, 0).unwrap();
        let mut data = generate_report_data(db, Period::Week, date(2025, 3, 5), generated_at).unwrap();
        data.timezone = "Europe/Berlin".to_string();
        data
    }

    fn render(data: &ReportData) -> String {
        let mut output = Vec::new();
        write_report(&mut output, data).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn totals_per_project_sorted_by_time() {
        let (db, _) = seeded_week();
        let data = report(&db);
        assert_eq!(
            data.by_project,
            vec![
                ProjectTotal {
                    name: "Acme".to_string(),
                    duration_ms: 95 * 60_000,
                    entry_count: 2,
                },
                ProjectTotal {
                    name: "Internal".to_string(),
                    duration_ms: 20 * 60_000,
                    entry_count: 1,
                },
            ]
        );
        assert_eq!(data.unassigned_ms, 5 * 60_000);
        assert_eq!(data.unassigned_count, 1);
    }

    #[test]
    fn entry_running_past_period_end_is_clipped() {
        let db = Database::open_in_memory().unwrap();
        let (_, sunday_end) = get_period_boundaries(Period::Week, date(2025, 3, 5));
        let mut entry = TimeEntry::open(
            WindowInfo::new("late night", "app"),
            sunday_end - Duration::minutes(10),
        );
        entry.end_time = sunday_end + Duration::minutes(50);
        db.add_entry(&entry).unwrap();

        let data = report(&db);
        assert_eq!(data.unassigned_ms, 10 * 60_000);
    }

    #[test]
    fn human_report() {
        let (db, _) = seeded_week();
        assert_snapshot!(render(&report(&db)), @r"
        TIME REPORT: Week of Mar 3, 2025

        BY PROJECT
        ──────────
        Acme                      1h 35m  ██████████
        Internal                     20m  ██░░░░░░░░

        (unassigned)                  5m  █░░░░░░░░░
        Tip: Run 'dwell entries' and 'dwell assign <entry> <project>' to categorize

        SUMMARY
        ───────
        Total tracked:  2h 0m
        Assigned:       1h 55m (96%)
        Entries:        4
        Timezone:       Europe/Berlin
        ");
    }

    #[test]
    fn empty_period_report() {
        let db = Database::open_in_memory().unwrap();
        assert_snapshot!(render(&report(&db)), @r"
        TIME REPORT: Week of Mar 3, 2025

        No time recorded this week.

        Hint: Run 'dwell status' to check tracking health.
        ");
    }

    #[test]
    fn short_day_hides_percentages() {
        let db = Database::open_in_memory().unwrap();
        let (start, _) = get_period_boundaries(Period::Day, date(2025, 3, 5));
        let mut entry = TimeEntry::open(WindowInfo::new("Inbox", "mail"), start + Duration::hours(9));
        entry.end_time = entry.start_time + Duration::minutes(12);
        db.add_entry(&entry).unwrap();

        let generated_at = Utc.with_ymd_and_hms(2025, 3, 5, 16, 0, 0).unwrap();
        let mut data = generate_report_data(&db, Period::Day, date(2025, 3, 5), generated_at).unwrap();
        data.timezone = "UTC".to_string();
        assert_snapshot!(render(&data), @r"
        TIME REPORT: Wednesday, Mar 5, 2025

        BY PROJECT
        ──────────
        (no assigned entries)

        (unassigned)                 12m  ██████████
        Tip: Run 'dwell entries' and 'dwell assign <entry> <project>' to categorize

        SUMMARY
        ───────
        Total tracked:  12m
        Assigned:       0s
        Entries:        1
        Timezone:       UTC
        ");
    }

    #[test]
    fn json_report() {
        let (db, _) = seeded_week();
        assert_snapshot!(format_report_json(&report(&db)).unwrap(), @r#"
        {
          "generated_at": "2025-03-05T16:00:00+00:00",
          "timezone": "Europe/Berlin",
          "period": {
            "start": "2025-03-03",
            "end": "2025-03-09",
            "type": "week"
          },
          "by_project": [
            {
              "project": "Acme",
              "duration_ms": 5700000,
              "entry_count": 2
            },
            {
              "project": "Internal",
              "duration_ms": 1200000,
              "entry_count": 1
            }
          ],
          "unassigned": {
            "duration_ms": 300000,
            "entry_count": 1
          },
          "totals": {
            "duration_ms": 7200000,
            "entry_count": 4
          }
        }
        "#);
    }
}
