pub mod base;
pub mod ra;

use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use crate::models::{Entity, RawEvent, TicketQuote};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {url} failed: {message}")]
    Http { url: String, message: String },
}

/// Listing source for one entity's candidate events plus the per-event
/// ticket page.
pub trait EventSource: Send + Sync {
    fn fetch_events(&self, entity: &Entity) -> Result<Vec<RawEvent>, FetchError>;

    /// Fails quietly to an empty list; ticket trouble never aborts a run.
    fn fetch_tickets(&self, event_url: &str) -> Vec<TicketQuote>;
}

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_secs(2);

/// Entity-level fetch with bounded backoff. On exhaustion the caller skips
/// the entity and the run moves on.
pub fn fetch_events_with_retry(
    source: &dyn EventSource,
    entity: &Entity,
) -> Result<Vec<RawEvent>, FetchError> {
    fetch_with_backoff(source, entity, FETCH_ATTEMPTS, FETCH_BACKOFF)
}

fn fetch_with_backoff(
    source: &dyn EventSource,
    entity: &Entity,
    attempts: u32,
    first_delay: Duration,
) -> Result<Vec<RawEvent>, FetchError> {
    let mut delay = first_delay;
    for attempt in 1..=attempts {
        match source.fetch_events(entity) {
            Ok(events) => return Ok(events),
            Err(err) if attempt < attempts => {
                tracing::warn!(
                    entity = entity.name.as_str(),
                    attempt,
                    "listing fetch failed, retrying in {delay:?}: {err}"
                );
                sleep(delay);
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("backoff loop returns on the last attempt")
}
