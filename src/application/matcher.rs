use crate::domain::models::{DesiredEvent, RemoteEvent};
use crate::infrastructure::calendar_client::{CalendarService, EventWindow};
use crate::infrastructure::error::SyncError;
use crate::infrastructure::event_mapper::to_remote_event;
use chrono::Utc;

/// Outcome of looking for the remote counterpart of one desired event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Earliest-starting match, id as tie-break.
    pub best: Option<RemoteEvent>,
    /// How many further events also matched.
    pub collisions: usize,
}

/// All remote events inside the desired window whose title matches exactly
/// (case-insensitive, trimmed), sorted by start then id. The server-side
/// text query only narrows the candidate set; the title check here is what
/// decides membership.
pub async fn find_all<C: CalendarService>(
    client: &C,
    access_token: &str,
    calendar_id: &str,
    desired: &DesiredEvent,
) -> Result<Vec<RemoteEvent>, SyncError> {
    let (start, end) = desired
        .resolved_window()
        .map_err(SyncError::InvalidPlan)?;
    let window = EventWindow {
        start: start.with_timezone(&Utc),
        end: end.with_timezone(&Utc),
    };

    let raw = client
        .list_events(access_token, calendar_id, window, Some(&desired.title))
        .await?;

    let mut matches = Vec::new();
    for event in &raw {
        match to_remote_event(event) {
            Ok(Some(remote)) => {
                if desired.title_matches(&remote.title) {
                    matches.push(remote);
                }
            }
            Ok(None) => {}
            Err(reason) => {
                tracing::debug!(%reason, "skipping unusable event in list response");
            }
        }
    }

    matches.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    Ok(matches)
}

/// Single-match view for upserts. A collision count above zero means the
/// window holds duplicates that need operator attention.
pub async fn find_match<C: CalendarService>(
    client: &C,
    access_token: &str,
    calendar_id: &str,
    desired: &DesiredEvent,
) -> Result<MatchOutcome, SyncError> {
    let mut matches = find_all(client, access_token, calendar_id, desired).await?;
    if matches.is_empty() {
        return Ok(MatchOutcome {
            best: None,
            collisions: 0,
        });
    }
    let collisions = matches.len() - 1;
    let best = matches.remove(0);
    Ok(MatchOutcome {
        best: Some(best),
        collisions,
    })
}
