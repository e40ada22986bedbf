use crate::application::matcher;
use crate::domain::models::{
    validate_plan, Action, DesiredEvent, ReconcileMode, ReportEntry, RunReport,
};
use crate::infrastructure::calendar_client::CalendarService;
use crate::infrastructure::error::SyncError;
use crate::infrastructure::event_mapper::{desired_to_payload, EventPatch};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bounded exponential backoff for transient service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u8) -> Duration {
        let factor = 2u64.saturating_pow(u32::from(attempt));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Drives one desired plan against the remote calendar, event by event.
/// Failures are isolated per event; only an invalid plan aborts the run.
pub struct Reconciler<C: CalendarService> {
    client: Arc<C>,
    calendar_id: String,
    retry_policy: RetryPolicy,
}

impl<C: CalendarService> Reconciler<C> {
    pub fn new(client: Arc<C>, calendar_id: &str) -> Self {
        Self {
            client,
            calendar_id: calendar_id.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn run(
        &self,
        access_token: &str,
        plan: &[DesiredEvent],
    ) -> Result<RunReport, SyncError> {
        validate_plan(plan).map_err(SyncError::InvalidPlan)?;

        let mut report = RunReport::default();
        for desired in plan {
            match self.reconcile_one(access_token, desired).await {
                Ok((action, detail)) => {
                    tracing::info!(
                        source_key = %desired.source_key,
                        title = %desired.title,
                        ?action,
                        "reconciled event"
                    );
                    report.push(ReportEntry {
                        source_key: desired.source_key.clone(),
                        title: desired.title.clone(),
                        date: desired.date,
                        action,
                        detail,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        source_key = %desired.source_key,
                        title = %desired.title,
                        %error,
                        "event reconciliation failed"
                    );
                    report.push(ReportEntry {
                        source_key: desired.source_key.clone(),
                        title: desired.title.clone(),
                        date: desired.date,
                        action: Action::Failed,
                        detail: Some(error.to_string()),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn reconcile_one(
        &self,
        access_token: &str,
        desired: &DesiredEvent,
    ) -> Result<(Action, Option<String>), SyncError> {
        match desired.mode {
            ReconcileMode::Upsert => self.upsert(access_token, desired).await,
            ReconcileMode::Replace => self.replace(access_token, desired).await,
        }
    }

    async fn upsert(
        &self,
        access_token: &str,
        desired: &DesiredEvent,
    ) -> Result<(Action, Option<String>), SyncError> {
        let outcome = self
            .with_retry(|| {
                matcher::find_match(self.client.as_ref(), access_token, &self.calendar_id, desired)
            })
            .await?;

        let mut details = Vec::new();
        if outcome.collisions > 0 {
            tracing::warn!(
                source_key = %desired.source_key,
                collisions = outcome.collisions,
                "multiple events match the same slot"
            );
            details.push(format!(
                "{} colliding events left in place",
                outcome.collisions
            ));
        }

        let Some(existing) = outcome.best else {
            self.create(access_token, desired).await?;
            return Ok((Action::Created, join_details(details)));
        };

        if existing.description.as_deref().unwrap_or("") == desired.notes {
            return Ok((Action::Skipped, join_details(details)));
        }

        let patch = EventPatch {
            description: desired.notes.clone(),
        };
        let patched = self
            .with_retry(|| {
                self.client.patch_event(
                    access_token,
                    &self.calendar_id,
                    &existing.id,
                    &patch,
                    existing.etag.as_deref(),
                )
            })
            .await;

        match patched {
            Ok(_) => Ok((Action::Updated, join_details(details))),
            Err(error) if error.is_not_found() => {
                // the event vanished between match and update
                self.create(access_token, desired).await?;
                details.push("recreated after out-of-band delete".to_string());
                Ok((Action::Created, join_details(details)))
            }
            Err(error) => Err(error),
        }
    }

    async fn replace(
        &self,
        access_token: &str,
        desired: &DesiredEvent,
    ) -> Result<(Action, Option<String>), SyncError> {
        let existing = self
            .with_retry(|| {
                matcher::find_all(self.client.as_ref(), access_token, &self.calendar_id, desired)
            })
            .await?;

        let mut removed = 0usize;
        for event in &existing {
            let deleted = self
                .with_retry(|| {
                    self.client
                        .delete_event(access_token, &self.calendar_id, &event.id)
                })
                .await;
            match deleted {
                Ok(()) => removed += 1,
                // already gone, which is what we wanted
                Err(error) if error.is_not_found() => removed += 1,
                Err(error) => return Err(error),
            }
        }

        self.create(access_token, desired).await?;
        if removed > 0 {
            Ok((
                Action::Replaced,
                Some(format!("removed {removed} prior events")),
            ))
        } else {
            Ok((Action::Created, None))
        }
    }

    async fn create(&self, access_token: &str, desired: &DesiredEvent) -> Result<(), SyncError> {
        let payload = desired_to_payload(desired).map_err(SyncError::InvalidPlan)?;
        self.with_retry(|| {
            self.client
                .create_event(access_token, &self.calendar_id, &payload)
        })
        .await?;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt: u8 = 0;
        loop {
            match operation().await {
                Err(error)
                    if error.is_transient() && attempt + 1 < self.retry_policy.max_attempts =>
                {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    tracing::debug!(%error, attempt, ?delay, "retrying transient service error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn join_details(details: Vec<String>) -> Option<String> {
    if details.is_empty() {
        None
    } else {
        Some(details.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::{expand, DateRange, ScheduleSet, SlotTemplate, WeekdayClass};
    use crate::infrastructure::calendar_client::EventWindow;
    use crate::infrastructure::event_mapper::{EventDateTime, GoogleCalendarEvent};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Programmable in-memory calendar. The store holds wire events; list
    /// applies the same window-overlap and substring-query narrowing the
    /// real service does.
    #[derive(Default)]
    struct FakeCalendarService {
        events: Mutex<Vec<GoogleCalendarEvent>>,
        next_id: AtomicUsize,
        list_calls: AtomicUsize,
        create_calls: AtomicUsize,
        patch_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        fail_create_title: Mutex<Option<String>>,
        transient_list_failures: AtomicUsize,
        drop_before_patch: std::sync::atomic::AtomicBool,
        vanish_on_delete: std::sync::atomic::AtomicBool,
    }

    impl FakeCalendarService {
        fn new() -> Self {
            Self::default()
        }

        fn seeded(events: Vec<GoogleCalendarEvent>) -> Self {
            let fake = Self::new();
            *fake.events.lock().unwrap() = events;
            fake
        }

        fn stored(&self) -> Vec<GoogleCalendarEvent> {
            self.events.lock().unwrap().clone()
        }

        fn fail_creates_for(&self, title: &str) {
            *self.fail_create_title.lock().unwrap() = Some(title.to_string());
        }

        fn fail_next_lists(&self, count: usize) {
            self.transient_list_failures.store(count, Ordering::SeqCst);
        }

        fn parse_instant(slot: &Option<EventDateTime>) -> Option<DateTime<Utc>> {
            slot.as_ref()
                .and_then(|value| value.date_time.as_deref())
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc))
        }
    }

    #[async_trait]
    impl CalendarService for FakeCalendarService {
        async fn list_events(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            window: EventWindow,
            title_hint: Option<&str>,
        ) -> Result<Vec<GoogleCalendarEvent>, SyncError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_list_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_list_failures
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(SyncError::Transient("simulated list outage".to_string()));
            }

            let events = self.events.lock().unwrap();
            let hint = title_hint.map(str::to_lowercase);
            Ok(events
                .iter()
                .filter(|event| {
                    let (Some(start), Some(end)) = (
                        Self::parse_instant(&event.start),
                        Self::parse_instant(&event.end),
                    ) else {
                        return false;
                    };
                    if start >= window.end || end <= window.start {
                        return false;
                    }
                    match &hint {
                        Some(hint) => event
                            .summary
                            .as_deref()
                            .map(|summary| summary.to_lowercase().contains(hint))
                            .unwrap_or(false),
                        None => true,
                    }
                })
                .cloned()
                .collect())
        }

        async fn create_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<GoogleCalendarEvent, SyncError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(blocked) = self.fail_create_title.lock().unwrap().as_deref() {
                if event.summary.as_deref() == Some(blocked) {
                    return Err(SyncError::Permanent(
                        "simulated create rejection".to_string(),
                    ));
                }
            }
            let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut created = event.clone();
            created.id = Some(id);
            created.etag = Some(format!("\"etag-{}\"", self.create_calls.load(Ordering::SeqCst)));
            self.events.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn patch_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
            patch: &EventPatch,
            _etag: Option<&str>,
        ) -> Result<GoogleCalendarEvent, SyncError> {
            self.patch_calls.fetch_add(1, Ordering::SeqCst);
            if self.drop_before_patch.load(Ordering::SeqCst) {
                self.events
                    .lock()
                    .unwrap()
                    .retain(|event| event.id.as_deref() != Some(event_id));
                return Err(SyncError::NotFound("simulated vanished event".to_string()));
            }
            let mut events = self.events.lock().unwrap();
            let Some(event) = events
                .iter_mut()
                .find(|event| event.id.as_deref() == Some(event_id))
            else {
                return Err(SyncError::NotFound(format!("no event {event_id}")));
            };
            event.description = Some(patch.description.clone());
            Ok(event.clone())
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), SyncError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.vanish_on_delete.load(Ordering::SeqCst) {
                return Err(SyncError::NotFound("simulated vanished event".to_string()));
            }
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|event| event.id.as_deref() != Some(event_id));
            if events.len() == before {
                return Err(SyncError::NotFound(format!("no event {event_id}")));
            }
            Ok(())
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn desired(
        title: &str,
        day: NaiveDate,
        start: (u32, u32),
        end: (u32, u32),
        notes: &str,
        mode: ReconcileMode,
    ) -> DesiredEvent {
        DesiredEvent {
            title: title.to_string(),
            date: day,
            start: day.and_hms_opt(start.0, start.1, 0).unwrap(),
            end: day.and_hms_opt(end.0, end.1, 0).unwrap(),
            time_zone: chrono_tz::Europe::London,
            notes: notes.to_string(),
            mode,
            source_key: format!(
                "test:{}@{}T{:02}:{:02}",
                title.to_lowercase().replace(' ', "-"),
                day,
                start.0,
                start.1
            ),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
        }
    }

    fn reconciler(client: Arc<FakeCalendarService>) -> Reconciler<FakeCalendarService> {
        Reconciler::new(client, "primary").with_retry_policy(fast_retry())
    }

    fn remote_event(id: &str, title: &str, description: &str, start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(id.to_string()),
            summary: Some(title.to_string()),
            description: Some(description.to_string()),
            etag: Some(format!("\"{id}\"")),
            start: Some(EventDateTime {
                date_time: Some(start.to_string()),
                date: None,
                time_zone: Some("Europe/London".to_string()),
            }),
            end: Some(EventDateTime {
                date_time: Some(end.to_string()),
                date: None,
                time_zone: Some("Europe/London".to_string()),
            }),
            ..GoogleCalendarEvent::default()
        }
    }

    #[tokio::test]
    async fn empty_calendar_gets_everything_created() {
        let fake = Arc::new(FakeCalendarService::new());
        let plan = vec![
            desired(
                "Deep Work Block 1",
                date(2025, 1, 6),
                (8, 0),
                (10, 0),
                "focus",
                ReconcileMode::Upsert,
            ),
            desired(
                "Lunch Break",
                date(2025, 1, 6),
                (12, 30),
                (13, 30),
                "",
                ReconcileMode::Upsert,
            ),
        ];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Created), 2);
        assert!(!report.has_failures());
        assert_eq!(fake.stored().len(), 2);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let fake = Arc::new(FakeCalendarService::new());
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        )];
        let engine = reconciler(fake.clone());

        engine.run("token", &plan).await.unwrap();
        let creates_after_first = fake.create_calls.load(Ordering::SeqCst);

        let report = engine.run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Skipped), 1);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), creates_after_first);
        assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.stored().len(), 1);
    }

    #[tokio::test]
    async fn upsert_rewrites_notes_in_place() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![remote_event(
            "existing",
            "Deep Work Block 1",
            "old notes",
            "2025-01-06T08:00:00+00:00",
            "2025-01-06T10:00:00+00:00",
        )]));
        let plan = vec![desired(
            "deep work block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "new notes",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Updated), 1);
        let stored = fake.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id.as_deref(), Some("existing"));
        assert_eq!(stored[0].description.as_deref(), Some("new notes"));
    }

    #[tokio::test]
    async fn unchanged_notes_mean_no_write_at_all() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![remote_event(
            "existing",
            "Deep Work Block 1",
            "same notes",
            "2025-01-06T08:00:00+00:00",
            "2025-01-06T10:00:00+00:00",
        )]));
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "same notes",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Skipped), 1);
        assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replace_clears_duplicates_and_leaves_one_event() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![
            remote_event(
                "dup-1",
                "Marketing & Outreach",
                "stale",
                "2025-01-06T16:00:00+00:00",
                "2025-01-06T18:00:00+00:00",
            ),
            remote_event(
                "dup-2",
                "marketing & outreach",
                "also stale",
                "2025-01-06T16:30:00+00:00",
                "2025-01-06T17:30:00+00:00",
            ),
        ]));
        let plan = vec![desired(
            "Marketing & Outreach",
            date(2025, 1, 6),
            (16, 0),
            (18, 0),
            "q1 push",
            ReconcileMode::Replace,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Replaced), 1);
        assert_eq!(
            report.entries[0].detail.as_deref(),
            Some("removed 2 prior events")
        );
        let stored = fake.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].description.as_deref(), Some("q1 push"));
        assert!(stored[0].id.as_deref().unwrap().starts_with("fake-"));
    }

    #[tokio::test]
    async fn replace_with_no_prior_events_reports_created() {
        let fake = Arc::new(FakeCalendarService::new());
        let plan = vec![desired(
            "Marketing & Outreach",
            date(2025, 1, 6),
            (16, 0),
            (18, 0),
            "q1 push",
            ReconcileMode::Replace,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Created), 1);
        assert_eq!(fake.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failing_event_does_not_stop_the_rest() {
        let fake = Arc::new(FakeCalendarService::new());
        fake.fail_creates_for("Planning & Admin");
        let plan = vec![
            desired(
                "Morning Routine",
                date(2025, 1, 6),
                (6, 0),
                (7, 0),
                "",
                ReconcileMode::Upsert,
            ),
            desired(
                "Planning & Admin",
                date(2025, 1, 6),
                (7, 0),
                (8, 0),
                "",
                ReconcileMode::Upsert,
            ),
            desired(
                "Deep Work Block 1",
                date(2025, 1, 6),
                (8, 0),
                (10, 0),
                "focus",
                ReconcileMode::Upsert,
            ),
        ];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert!(report.has_failures());
        assert_eq!(report.count(Action::Created), 2);
        assert_eq!(report.count(Action::Failed), 1);
        assert_eq!(report.entries[1].action, Action::Failed);
        assert!(report.entries[1]
            .detail
            .as_deref()
            .unwrap()
            .contains("simulated create rejection"));
    }

    #[tokio::test]
    async fn transient_list_error_is_retried() {
        let fake = Arc::new(FakeCalendarService::new());
        fake.fail_next_lists(1);
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Created), 1);
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_errors_beyond_the_retry_limit_fail_the_event() {
        let fake = Arc::new(FakeCalendarService::new());
        fake.fail_next_lists(5);
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Failed), 1);
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let fake = Arc::new(FakeCalendarService::new());
        fake.fail_creates_for("Deep Work Block 1");
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Failed), 1);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn vanished_event_during_patch_falls_back_to_create() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![remote_event(
            "doomed",
            "Deep Work Block 1",
            "old notes",
            "2025-01-06T08:00:00+00:00",
            "2025-01-06T10:00:00+00:00",
        )]));
        fake.drop_before_patch.store(true, Ordering::SeqCst);
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "new notes",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Created), 1);
        assert!(report.entries[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("recreated after out-of-band delete"));
        let stored = fake.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].description.as_deref(), Some("new notes"));
    }

    #[tokio::test]
    async fn vanished_event_during_replace_delete_counts_as_removed() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![remote_event(
            "ghost",
            "Marketing & Outreach",
            "stale",
            "2025-01-06T16:00:00+00:00",
            "2025-01-06T18:00:00+00:00",
        )]));
        fake.vanish_on_delete.store(true, Ordering::SeqCst);
        let plan = vec![desired(
            "Marketing & Outreach",
            date(2025, 1, 6),
            (16, 0),
            (18, 0),
            "q1 push",
            ReconcileMode::Replace,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Replaced), 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn collisions_are_surfaced_but_not_deleted() {
        let fake = Arc::new(FakeCalendarService::seeded(vec![
            remote_event(
                "a",
                "Deep Work Block 1",
                "focus",
                "2025-01-06T08:00:00+00:00",
                "2025-01-06T10:00:00+00:00",
            ),
            remote_event(
                "b",
                "Deep Work Block 1",
                "focus",
                "2025-01-06T08:30:00+00:00",
                "2025-01-06T09:30:00+00:00",
            ),
        ]));
        let plan = vec![desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        )];

        let report = reconciler(fake.clone()).run("token", &plan).await.unwrap();
        assert_eq!(report.count(Action::Skipped), 1);
        assert!(report.entries[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("1 colliding events"));
        assert_eq!(fake.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.stored().len(), 2);
    }

    #[tokio::test]
    async fn invalid_plan_aborts_before_any_service_call() {
        let fake = Arc::new(FakeCalendarService::new());
        let mut bad = desired(
            "Deep Work Block 1",
            date(2025, 1, 6),
            (8, 0),
            (10, 0),
            "focus",
            ReconcileMode::Upsert,
        );
        bad.title = "   ".to_string();

        let error = reconciler(fake.clone())
            .run("token", &[bad])
            .await
            .unwrap_err();
        assert!(matches!(error, SyncError::InvalidPlan(_)));
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn report_preserves_plan_order() {
        let fake = Arc::new(FakeCalendarService::new());
        let plan = vec![
            desired(
                "Morning Routine",
                date(2025, 1, 6),
                (6, 0),
                (7, 0),
                "",
                ReconcileMode::Upsert,
            ),
            desired(
                "Deep Work Block 1",
                date(2025, 1, 6),
                (8, 0),
                (10, 0),
                "focus",
                ReconcileMode::Upsert,
            ),
        ];

        let report = reconciler(fake).run("token", &plan).await.unwrap();
        let titles: Vec<&str> = report
            .entries
            .iter()
            .map(|entry| entry.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Morning Routine", "Deep Work Block 1"]);
    }

    fn sample_schedule_set() -> ScheduleSet {
        let mut templates = HashMap::new();
        templates.insert(
            WeekdayClass::Weekday,
            vec![
                SlotTemplate {
                    title: "Deep Work Block 1".to_string(),
                    start: "08:00".to_string(),
                    end: "10:00".to_string(),
                    notes: "focus".to_string(),
                    mode: ReconcileMode::Upsert,
                },
                SlotTemplate {
                    title: "Marketing & Outreach".to_string(),
                    start: "16:00".to_string(),
                    end: "18:00".to_string(),
                    notes: "outreach".to_string(),
                    mode: ReconcileMode::Upsert,
                },
            ],
        );
        ScheduleSet {
            name: "daily-routine".to_string(),
            time_zone: chrono_tz::Europe::London,
            templates,
            overrides: Vec::new(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn upsert_runs_converge_after_the_first(start_offset in 0i64..60, length in 1i64..10) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async {
                let from = date(2025, 1, 6) + chrono::Duration::days(start_offset);
                let to = from + chrono::Duration::days(length - 1);
                let range = DateRange::new(from, to).unwrap();
                let plan = expand(&range, &sample_schedule_set()).unwrap();

                let fake = Arc::new(FakeCalendarService::new());
                let engine = reconciler(fake.clone());

                let first = engine.run("token", &plan).await.unwrap();
                prop_assert_eq!(first.count(Action::Created), plan.len());
                let stored_after_first = fake.stored().len();

                let second = engine.run("token", &plan).await.unwrap();
                prop_assert_eq!(second.count(Action::Skipped), plan.len());
                prop_assert_eq!(fake.stored().len(), stored_after_first);
                prop_assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 0);
                Ok(())
            })?;
        }
    }
}
