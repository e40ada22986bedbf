use crate::infrastructure::error::SyncError;
use crate::infrastructure::event_mapper::{EventPatch, GoogleCalendarEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const MAX_RESULTS_PER_PAGE: &str = "250";

/// Half-open instant window a list query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The narrow contract the reconciliation engine depends on. The service
/// owns event ids; `title_hint` is a best-effort server-side narrowing and
/// is never trusted for correctness.
#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: EventWindow,
        title_hint: Option<&str>,
    ) -> Result<Vec<GoogleCalendarEvent>, SyncError>;

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<GoogleCalendarEvent, SyncError>;

    /// Partial update of descriptive fields. Sends `If-Match` when an etag
    /// is supplied, the conditional-update extension point for overlapped
    /// runs.
    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
        etag: Option<&str>,
    ) -> Result<GoogleCalendarEvent, SyncError>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), SyncError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestCalendarClient {
    client: Client,
}

impl ReqwestCalendarClient {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SyncError::InvalidConfig(format!("http client: {error}")))?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> Result<Self, SyncError> {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), SyncError> {
        if value.trim().is_empty() {
            return Err(SyncError::InvalidConfig(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn events_endpoint(calendar_id: &str) -> Result<Url, SyncError> {
        let mut url = Url::parse(CALENDAR_API_BASE)
            .map_err(|error| SyncError::InvalidConfig(format!("invalid api base url: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SyncError::InvalidConfig("calendar api base URL cannot be a base".to_string())
            })?;
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }

    fn event_endpoint(calendar_id: &str, event_id: &str) -> Result<Url, SyncError> {
        let mut url = Self::events_endpoint(calendar_id)?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SyncError::InvalidConfig("calendar events URL cannot be a base".to_string())
            })?;
            segments.push(event_id);
        }
        Ok(url)
    }

    fn network_error(context: &str, error: reqwest::Error) -> SyncError {
        SyncError::Transient(format!("network error while {context}: {error}"))
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> SyncError {
        let message = if body.trim().is_empty() {
            format!("calendar api error: http {}", status.as_u16())
        } else {
            format!("calendar api error: http {}; body={body}", status.as_u16())
        };
        match status.as_u16() {
            404 | 410 => SyncError::NotFound(message),
            408 | 429 => SyncError::Transient(message),
            500..=599 => SyncError::Transient(message),
            _ => SyncError::Permanent(message),
        }
    }

    fn parse_body<T: serde::de::DeserializeOwned>(body: &str, context: &str) -> Result<T, SyncError> {
        serde_json::from_str(body).map_err(|error| {
            SyncError::Permanent(format!("invalid {context} payload: {error}; body={body}"))
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl CalendarService for ReqwestCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: EventWindow,
        title_hint: Option<&str>,
    ) -> Result<Vec<GoogleCalendarEvent>, SyncError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut request = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", MAX_RESULTS_PER_PAGE),
                ])
                .query(&[
                    ("timeMin", window.start.to_rfc3339()),
                    ("timeMax", window.end.to_rfc3339()),
                ]);
            if let Some(hint) = title_hint.map(str::trim).filter(|value| !value.is_empty()) {
                request = request.query(&[("q", hint)]);
            }
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request
                .send()
                .await
                .map_err(|error| Self::network_error("listing events", error))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|error| Self::network_error("reading list response", error))?;
            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }

            let mut parsed: EventsPageResponse = Self::parse_body(&body, "events list")?;
            events.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<GoogleCalendarEvent, SyncError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|error| Self::network_error("creating event", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| Self::network_error("reading create response", error))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let created: GoogleCalendarEvent = Self::parse_body(&body, "event create")?;
        if created
            .id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .is_none()
        {
            return Err(SyncError::Permanent(
                "event create response did not include id".to_string(),
            ));
        }
        Ok(created)
    }

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
        etag: Option<&str>,
    ) -> Result<GoogleCalendarEvent, SyncError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = Self::event_endpoint(calendar_id, event_id)?;
        let mut request = self
            .client
            .patch(endpoint)
            .bearer_auth(access_token)
            .json(patch);
        if let Some(etag) = etag.map(str::trim).filter(|value| !value.is_empty()) {
            request = request.header(reqwest::header::IF_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|error| Self::network_error("updating event", error))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| Self::network_error("reading update response", error))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        Self::parse_body(&body, "event update")
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), SyncError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = Self::event_endpoint(calendar_id, event_id)?;
        let response = self
            .client
            .delete(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| Self::network_error("deleting event", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| Self::network_error("reading delete response", error))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }
}
