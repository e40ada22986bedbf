use crate::domain::models::{validate_plan, DesiredEvent, ReconcileMode};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse weekday partition the templates are keyed by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WeekdayClass {
    Weekday,
    Saturday,
    Sunday,
}

impl WeekdayClass {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat => WeekdayClass::Saturday,
            Weekday::Sun => WeekdayClass::Sunday,
            _ => WeekdayClass::Weekday,
        }
    }
}

fn default_mode() -> ReconcileMode {
    ReconcileMode::Upsert
}

/// One time-boxed activity within a day, as written in a schedule file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotTemplate {
    pub title: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_mode")]
    pub mode: ReconcileMode,
}

impl SlotTemplate {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("slot.title must not be empty".to_string());
        }
        let start = parse_hhmm(&self.start)
            .ok_or_else(|| format!("slot '{}': start must be HH:MM", self.title))?;
        let end = parse_hhmm(&self.end)
            .ok_or_else(|| format!("slot '{}': end must be HH:MM", self.title))?;
        if end <= start {
            return Err(format!("slot '{}': end must be after start", self.title));
        }
        Ok(())
    }
}

/// How an override picks its day. Business-day indices are 1-based, counted
/// from the start of the requested range, skipping Saturdays and Sundays —
/// no holiday calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OverrideKey {
    Date(NaiveDate),
    BusinessDay(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayOverride {
    pub key: OverrideKey,
    /// When true the override replaces the day's template expansion;
    /// otherwise its slots are appended.
    #[serde(default)]
    pub replace: bool,
    pub slots: Vec<SlotTemplate>,
}

impl DayOverride {
    pub fn validate(&self) -> Result<(), String> {
        if let OverrideKey::BusinessDay(index) = self.key {
            if index == 0 {
                return Err("override.business_day is 1-based".to_string());
            }
        }
        for slot in &self.slots {
            slot.validate()?;
        }
        Ok(())
    }

    fn resolved_date(&self, business_days: &[NaiveDate]) -> Option<NaiveDate> {
        match self.key {
            OverrideKey::Date(date) => Some(date),
            OverrideKey::BusinessDay(index) => {
                business_days.get(index as usize - 1).copied()
            }
        }
    }
}

/// A named, self-contained declarative schedule: per-weekday-class slot
/// templates plus per-day overrides, all in one civil time zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSet {
    pub name: String,
    pub time_zone: Tz,
    #[serde(default)]
    pub templates: HashMap<WeekdayClass, Vec<SlotTemplate>>,
    #[serde(default)]
    pub overrides: Vec<DayOverride>,
}

impl ScheduleSet {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("schedule.name must not be empty".to_string());
        }
        for slots in self.templates.values() {
            for slot in slots {
                slot.validate()?;
            }
        }
        for day_override in &self.overrides {
            day_override.validate()?;
        }
        Ok(())
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if end < start {
            return Err(format!("date range {start}..{end} is inverted"));
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |date| *date <= self.end)
    }

    /// The weekdays of the range in order: the domain of business-day
    /// indexed overrides. Monotonic and gapless across weekends.
    pub fn business_days(&self) -> Vec<NaiveDate> {
        self.days()
            .filter(|date| WeekdayClass::of(*date) == WeekdayClass::Weekday)
            .collect()
    }
}

/// Expands a schedule set over a date range into a flat plan, sorted by
/// `(date, start)`. Pure: identical inputs always yield identical output.
/// Dates with neither a template for their weekday class nor an override
/// contribute nothing. The aggregate plan is validated before it is
/// returned, so no caller reaches the calendar service with an unsound plan.
pub fn expand(range: &DateRange, set: &ScheduleSet) -> Result<Vec<DesiredEvent>, String> {
    set.validate()?;
    let business_days = range.business_days();
    let mut plan = Vec::new();

    for date in range.days() {
        let class = WeekdayClass::of(date);
        let mut day_slots: Vec<(String, SlotTemplate)> = set
            .templates
            .get(&class)
            .into_iter()
            .flatten()
            .map(|slot| (format!("{}:{class:?}", set.name).to_lowercase(), slot.clone()))
            .collect();

        for (index, day_override) in set.overrides.iter().enumerate() {
            if day_override.resolved_date(&business_days) != Some(date) {
                continue;
            }
            if day_override.replace {
                day_slots.clear();
            }
            let origin = format!("{}:override{index}", set.name.to_lowercase());
            day_slots.extend(
                day_override
                    .slots
                    .iter()
                    .map(|slot| (origin.clone(), slot.clone())),
            );
        }

        for (origin, slot) in day_slots {
            let start_time = parse_hhmm(&slot.start)
                .ok_or_else(|| format!("slot '{}': start must be HH:MM", slot.title))?;
            let end_time = parse_hhmm(&slot.end)
                .ok_or_else(|| format!("slot '{}': end must be HH:MM", slot.title))?;
            plan.push(DesiredEvent {
                title: slot.title.clone(),
                date,
                start: date.and_time(start_time),
                end: date.and_time(end_time),
                time_zone: set.time_zone,
                notes: slot.notes,
                mode: slot.mode,
                source_key: format!("{origin}@{date}T{}", slot.start),
            });
        }
    }

    plan.sort_by(|a, b| (a.date, a.start, &a.title).cmp(&(b.date, b.start, &b.title)));
    validate_plan(&plan)?;
    Ok(plan)
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}
