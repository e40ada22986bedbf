use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Strategy applied when a desired event is reconciled against the remote
/// calendar. Declared once per template slot, not per run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Create if absent, update descriptive fields in place if present.
    Upsert,
    /// Delete every exact-title match in the window, then create fresh.
    Replace,
}

/// A declaratively specified, not-yet-persisted activity the schedule says
/// should exist on the calendar. Times are civil wall-clock values paired
/// with an explicit zone; the service's default zone is never assumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredEvent {
    pub title: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub time_zone: Tz,
    pub notes: String,
    pub mode: ReconcileMode,
    /// Which template slot/day produced this event. Used for generation and
    /// reporting only; never sent to the calendar service.
    pub source_key: String,
}

impl DesiredEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "event.title")?;
        validate_non_empty(&self.source_key, "event.source_key")?;
        if self.end <= self.start {
            return Err(format!(
                "event '{}' on {}: end must be after start",
                self.title, self.date
            ));
        }
        if self.start.date() != self.date {
            return Err(format!(
                "event '{}': start {} does not fall on {}",
                self.title, self.start, self.date
            ));
        }
        self.resolved_window()?;
        Ok(())
    }

    /// Resolves the civil window to zone-aware instants. Ambiguous local
    /// times (DST fall-back) resolve to the earlier instant; local times
    /// that do not exist (spring-forward) are rejected.
    pub fn resolved_window(&self) -> Result<(DateTime<Tz>, DateTime<Tz>), String> {
        Ok((
            resolve_local(self.start, self.time_zone)?,
            resolve_local(self.end, self.time_zone)?,
        ))
    }

    pub fn title_matches(&self, candidate: &str) -> bool {
        self.title.trim().eq_ignore_ascii_case(candidate.trim())
    }
}

fn resolve_local(naive: NaiveDateTime, time_zone: Tz) -> Result<DateTime<Tz>, String> {
    use chrono::offset::LocalResult;
    match time_zone.from_local_datetime(&naive) {
        LocalResult::Single(instant) => Ok(instant),
        LocalResult::Ambiguous(earlier, _) => Ok(earlier),
        LocalResult::None => Err(format!("{naive} does not exist in {time_zone}")),
    }
}

/// Whole-plan validation, applied before any remote call. A plan with two
/// same-title events in overlapping windows has an ambiguous match target,
/// so the run is unsound and must not partially execute.
pub fn validate_plan(events: &[DesiredEvent]) -> Result<(), String> {
    for event in events {
        event.validate()?;
    }
    for (index, event) in events.iter().enumerate() {
        for other in &events[index + 1..] {
            if event.title_matches(&other.title)
                && event.start < other.end
                && other.start < event.end
            {
                return Err(format!(
                    "events '{}' at {} and {} overlap with the same title",
                    event.title, event.start, other.start
                ));
            }
        }
    }
    Ok(())
}

/// The service's persisted representation of an event. The id is owned by
/// the calendar service; the engine only threads it through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Replaced,
    Skipped,
    Failed,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Replaced => "replaced",
            Action::Skipped => "skipped",
            Action::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportEntry {
    pub source_key: String,
    pub title: String,
    pub date: NaiveDate,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of one reconciliation pass: one entry per desired event, in the
/// order the plan was processed. Built fresh per run, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.action == action)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Action::Failed) > 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
