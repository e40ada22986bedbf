use crate::domain::models::ReconcileMode;
use crate::domain::schedule::{ScheduleSet, SlotTemplate, WeekdayClass};
use crate::infrastructure::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_CONFIG_FILE: &str = "app.json";
pub const SCHEDULES_FILE: &str = "schedules.json";
const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u32,
    pub calendar_id: String,
    pub request_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: CONFIG_SCHEMA_VERSION,
            calendar_id: "primary".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulesFile {
    pub schema: u32,
    pub schedules: Vec<ScheduleSet>,
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, SyncError> {
    let path = config_dir.join(APP_CONFIG_FILE);
    let raw = fs::read_to_string(&path).map_err(|error| {
        SyncError::InvalidConfig(format!("cannot read {}: {error}", path.display()))
    })?;
    let config: AppConfig = serde_json::from_str(&raw)?;
    check_schema(config.schema, &path)?;
    if config.calendar_id.trim().is_empty() {
        return Err(SyncError::InvalidConfig(
            "calendarId must not be empty".to_string(),
        ));
    }
    if config.request_timeout_seconds == 0 {
        return Err(SyncError::InvalidConfig(
            "requestTimeoutSeconds must be positive".to_string(),
        ));
    }
    Ok(config)
}

pub fn load_schedule_set(config_dir: &Path, name: &str) -> Result<ScheduleSet, SyncError> {
    let path = config_dir.join(SCHEDULES_FILE);
    let raw = fs::read_to_string(&path).map_err(|error| {
        SyncError::InvalidConfig(format!("cannot read {}: {error}", path.display()))
    })?;
    let file: SchedulesFile = serde_json::from_str(&raw)?;
    check_schema(file.schema, &path)?;

    let available: Vec<String> = file.schedules.iter().map(|set| set.name.clone()).collect();
    let Some(set) = file.schedules.into_iter().find(|set| set.name == name) else {
        return Err(SyncError::InvalidConfig(format!(
            "no schedule set named '{name}'; available: {}",
            available.join(", ")
        )));
    };
    set.validate().map_err(SyncError::InvalidConfig)?;
    Ok(set)
}

/// Writes the default config files if they do not exist yet. Existing files
/// are never touched.
pub fn ensure_default_configs(config_dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    fs::create_dir_all(config_dir)?;
    let mut created = Vec::new();

    let app_path = config_dir.join(APP_CONFIG_FILE);
    if !app_path.exists() {
        write_pretty(&app_path, &AppConfig::default())?;
        created.push(app_path);
    }

    let schedules_path = config_dir.join(SCHEDULES_FILE);
    if !schedules_path.exists() {
        let file = SchedulesFile {
            schema: CONFIG_SCHEMA_VERSION,
            schedules: vec![default_schedule_set()],
        };
        write_pretty(&schedules_path, &file)?;
        created.push(schedules_path);
    }

    Ok(created)
}

fn check_schema(schema: u32, path: &Path) -> Result<(), SyncError> {
    if schema != CONFIG_SCHEMA_VERSION {
        return Err(SyncError::InvalidConfig(format!(
            "{} has schema {schema}, expected {CONFIG_SCHEMA_VERSION}",
            path.display()
        )));
    }
    Ok(())
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), SyncError> {
    let mut serialized = serde_json::to_string_pretty(value)?;
    serialized.push('\n');
    fs::write(path, serialized)?;
    Ok(())
}

fn slot(title: &str, start: &str, end: &str, notes: &str, mode: ReconcileMode) -> SlotTemplate {
    SlotTemplate {
        title: title.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        notes: notes.to_string(),
        mode,
    }
}

/// Seed schedule: a full working weekday, a lighter Saturday, and a single
/// Sunday block, all in London time.
pub fn default_schedule_set() -> ScheduleSet {
    use ReconcileMode::{Replace, Upsert};

    let mut templates = HashMap::new();
    templates.insert(
        WeekdayClass::Weekday,
        vec![
            slot("Morning Routine", "06:00", "07:00", "", Upsert),
            slot("Planning & Admin", "07:00", "08:00", "Review goals and inbox", Upsert),
            slot("Deep Work Block 1", "08:00", "10:00", "Primary focus project", Upsert),
            slot("Break", "10:00", "10:30", "", Upsert),
            slot("Deep Work Block 2", "10:30", "12:30", "Secondary focus project", Upsert),
            slot("Lunch Break", "12:30", "13:30", "", Upsert),
            slot("Operational Work", "13:30", "15:30", "Meetings, email, admin", Upsert),
            slot("Marketing & Outreach", "16:00", "18:00", "Content and outreach", Replace),
        ],
    );
    templates.insert(
        WeekdayClass::Saturday,
        vec![slot(
            "Big-Picture Planning",
            "09:00",
            "11:00",
            "Weekly review and planning",
            Upsert,
        )],
    );
    templates.insert(
        WeekdayClass::Sunday,
        vec![slot("Reading & Rest", "10:00", "11:00", "", Upsert)],
    );

    ScheduleSet {
        name: "daily-routine".to_string(),
        time_zone: chrono_tz::Europe::London,
        templates,
        overrides: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_config_dir(label: &str) -> PathBuf {
        let unique = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "schedsync-config-{label}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_are_written_once_and_load_back() {
        let dir = temp_config_dir("defaults");
        let created = ensure_default_configs(&dir).unwrap();
        assert_eq!(created.len(), 2);

        let config = load_app_config(&dir).unwrap();
        assert_eq!(config.calendar_id, "primary");
        assert_eq!(config.request_timeout_seconds, 30);

        let set = load_schedule_set(&dir, "daily-routine").unwrap();
        assert_eq!(set.time_zone, chrono_tz::Europe::London);
        assert_eq!(set.templates[&WeekdayClass::Weekday].len(), 8);

        // second call must not rewrite anything
        let created_again = ensure_default_configs(&dir).unwrap();
        assert!(created_again.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_set_name_lists_the_available_ones() {
        let dir = temp_config_dir("unknown-set");
        ensure_default_configs(&dir).unwrap();

        let error = load_schedule_set(&dir, "does-not-exist").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("does-not-exist"));
        assert!(message.contains("daily-routine"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let dir = temp_config_dir("schema");
        fs::write(
            dir.join(APP_CONFIG_FILE),
            r#"{"schema": 2, "calendarId": "primary", "requestTimeoutSeconds": 30}"#,
        )
        .unwrap();

        let error = load_app_config(&dir).unwrap_err();
        assert!(error.to_string().contains("schema 2"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_config_names_the_file() {
        let dir = temp_config_dir("missing");
        let error = load_app_config(&dir).unwrap_err();
        assert!(error.to_string().contains(APP_CONFIG_FILE));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn default_schedule_set_is_valid() {
        default_schedule_set().validate().unwrap();
    }
}
