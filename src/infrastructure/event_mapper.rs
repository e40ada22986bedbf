use crate::domain::models::{DesiredEvent, RemoteEvent};
use chrono::{DateTime, Utc};

/// Google-style event timestamp: either a timed `dateTime` (RFC 3339, with
/// the civil zone alongside) or a date-only `date` for all-day events.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct EventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Wire representation of a calendar event, as the service sends and
/// receives it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
}

/// Partial update sent on upsert: only descriptive fields the schedule owns.
/// Everything else on the remote event (attendees, reminders, manual edits)
/// is left untouched.
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct EventPatch {
    pub description: String,
}

/// Converts a wire event into the engine's view of it. Cancelled events,
/// all-day events, and events without an id are not reconciliation
/// candidates and map to `None`; malformed timestamps are an error the
/// caller decides how to surface.
pub fn to_remote_event(event: &GoogleCalendarEvent) -> Result<Option<RemoteEvent>, String> {
    let Some(id) = event.id.as_deref().map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let Some(title) = event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    if event
        .status
        .as_deref()
        .map(|status| status.eq_ignore_ascii_case("cancelled"))
        .unwrap_or(false)
    {
        return Ok(None);
    }

    let (Some(start_raw), Some(end_raw)) = (
        event.start.as_ref().and_then(|value| value.date_time.as_deref()),
        event.end.as_ref().and_then(|value| value.date_time.as_deref()),
    ) else {
        // date-only events occupy whole days, never a desired slot
        return Ok(None);
    };

    Ok(Some(RemoteEvent {
        id: id.to_string(),
        title: title.to_string(),
        description: event.description.clone(),
        start: parse_rfc3339_utc(start_raw, "start.dateTime")?,
        end: parse_rfc3339_utc(end_raw, "end.dateTime")?,
        etag: event.etag.clone(),
    }))
}

/// Builds the create payload for a desired event. Timestamps go out as
/// RFC 3339 instants with the civil zone named explicitly alongside, so the
/// service's default zone is never relied on.
pub fn desired_to_payload(desired: &DesiredEvent) -> Result<GoogleCalendarEvent, String> {
    let (start, end) = desired.resolved_window()?;
    let zone_name = desired.time_zone.name().to_string();
    Ok(GoogleCalendarEvent {
        id: None,
        summary: Some(desired.title.trim().to_string()),
        description: Some(desired.notes.clone()),
        status: Some("confirmed".to_string()),
        etag: None,
        start: Some(EventDateTime {
            date_time: Some(start.to_rfc3339()),
            date: None,
            time_zone: Some(zone_name.clone()),
        }),
        end: Some(EventDateTime {
            date_time: Some(end.to_rfc3339()),
            date: None,
            time_zone: Some(zone_name),
        }),
    })
}

fn parse_rfc3339_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| format!("invalid event {field_name} '{value}': {error}"))
}
