use crate::db::{Store, StoreError};
use crate::models::{RawEvent, TicketQuote};

/// What the reconciler decided about one raw event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// First sighting of this `(event_id, event_type)`. Always notify-worthy,
    /// with or without tickets.
    New,
    /// Previously seen without tickets; tickets just appeared. Notified once.
    Resurfaced,
    /// Already fully handled in an earlier run, or still ticketless.
    Suppressed,
}

impl Classification {
    pub fn is_notify_worthy(&self) -> bool {
        match self {
            Classification::New | Classification::Resurfaced => true,
            Classification::Suppressed => false,
        }
    }
}

pub struct Outcome {
    pub classification: Classification,
    pub tickets: Vec<TicketQuote>,
}

/// Decides insert / update / suppress for one raw event against the store.
///
/// `fetch_tickets` is only invoked when the decision depends on the current
/// ticket state, i.e. when the event is unseen or was seen ticketless. A
/// record whose tickets were already available is suppressed without a fetch.
///
/// Across a key's lifetime this yields at most two notify-worthy outcomes:
/// one `New`, and one `Resurfaced` only if the key was born ticketless.
pub fn reconcile<F>(store: &Store, event: &RawEvent, fetch_tickets: F) -> Result<Outcome, StoreError>
where
    F: FnOnce() -> Vec<TicketQuote>,
{
    let record = store.lookup(&event.event_id, event.event_type)?;

    match record {
        None => {
            let tickets = fetch_tickets();
            store.insert(&event.event_id, event.event_type, !tickets.is_empty())?;
            Ok(Outcome {
                classification: Classification::New,
                tickets,
            })
        }
        Some(record) if record.tickets_available => Ok(Outcome {
            classification: Classification::Suppressed,
            tickets: Vec::new(),
        }),
        Some(_) => {
            let tickets = fetch_tickets();
            if tickets.is_empty() {
                return Ok(Outcome {
                    classification: Classification::Suppressed,
                    tickets,
                });
            }
            store.update(&event.event_id, event.event_type, true)?;
            Ok(Outcome {
                classification: Classification::Resurfaced,
                tickets,
            })
        }
    }
}
