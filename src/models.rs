use serde::{Deserialize, Serialize};

/// The three kinds of tracked entity. Listing URLs, dedup records and digest
/// blocks all branch on this; keep matches exhaustive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Venue,
    Artist,
    Promoter,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Venue => "venue",
            EntityKind::Artist => "artist",
            EntityKind::Promoter => "promoter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "venue" => Some(EntityKind::Venue),
            "artist" => Some(EntityKind::Artist),
            "promoter" => Some(EntityKind::Promoter),
            _ => None,
        }
    }
}

/// A venue, artist or promoter whose listing page is polled each run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub tag: String,
    pub kind: EntityKind,
}

/// A subscription entry: display name plus the source's tag for the entity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interest {
    pub name: String,
    pub tag: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct UserSubscription {
    pub name: String,
    pub nickname: String,
    pub email: String,
    pub locations: Vec<String>,
    pub venues: Vec<Interest>,
    pub artists: Vec<Interest>,
    pub promoters: Vec<Interest>,
}

/// One event scraped from a listing page. Fields that do not apply to the
/// originating entity kind are left empty: venue listings carry `lineup`,
/// artist listings carry `venue` and `artist`, promoter listings carry
/// `venue`, `lineup` and `promoter`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawEvent {
    pub name: String,
    pub date: String,
    pub event_id: String, // opaque, taken from the listing URL
    pub event_url: String,
    pub event_type: EntityKind,
    pub venue: String,
    pub lineup: String,
    pub artist: String,
    pub promoter: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TicketQuote {
    pub label: String,
    pub price: String,
}

/// Durable dedup record, unique by `(event_id, event_type)`.
/// `tickets_available` only ever moves `false -> true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedEventRecord {
    pub event_id: String,
    pub event_type: EntityKind,
    pub tickets_available: bool,
}
