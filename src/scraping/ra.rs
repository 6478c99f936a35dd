use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::base;
use super::{EventSource, FetchError};
use crate::config::AppConfig;
use crate::models::{Entity, EntityKind, RawEvent, TicketQuote};

static ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article.event-item").expect("event item selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("event link selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.title").expect("event title selector"));
static LINEUP_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.event-lineup").expect("lineup selector"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.bbox h1").expect("date selector"));
static VENUE_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.bbox h1.title span:nth-of-type(3) a").expect("venue link selector")
});
static TICKET_ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.onsale.but").expect("ticket item selector"));
static TICKET_TEXT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("ticket text selector"));
static TICKET_PRICE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span").expect("ticket price selector"));

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("event item has no link")]
    MissingLink,
    #[error("event link has no usable id")]
    MissingId,
    #[error("event item has no title")]
    MissingTitle,
}

/// Listing source backed by the RA website. One listing page per entity,
/// one ticket page per event.
pub struct RaSource {
    venue_url_prefix: String,
    artist_url_prefix: String,
    promoter_url_prefix: String,
    event_url_prefix: String,
}

impl RaSource {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            venue_url_prefix: config.venue_url_prefix.clone(),
            artist_url_prefix: config.artist_url_prefix.clone(),
            promoter_url_prefix: config.promoter_url_prefix.clone(),
            event_url_prefix: config.event_url_prefix.clone(),
        }
    }

    fn listing_url(&self, entity: &Entity) -> String {
        let prefix = match entity.kind {
            EntityKind::Venue => &self.venue_url_prefix,
            EntityKind::Artist => &self.artist_url_prefix,
            EntityKind::Promoter => &self.promoter_url_prefix,
        };
        format!("{}{}", prefix, entity.tag)
    }

    pub(crate) fn parse_listing(&self, html: &str, entity: &Entity) -> Vec<RawEvent> {
        let document = Html::parse_document(html);
        let mut events = Vec::new();

        for item in document.select(&ITEM_SELECTOR) {
            match self.parse_item(&item, entity) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(
                        entity = entity.name.as_str(),
                        "skipping malformed event item: {err}"
                    );
                }
            }
        }

        events
    }

    fn parse_item(&self, item: &ElementRef<'_>, entity: &Entity) -> Result<RawEvent, ParseError> {
        let href =
            base::first_attr(item, &LINK_SELECTOR, "href").ok_or(ParseError::MissingLink)?;
        let event_id = base::event_id_from_href(&href).ok_or(ParseError::MissingId)?;
        let name = base::first_text(item, &TITLE_SELECTOR).ok_or(ParseError::MissingTitle)?;

        let date = base::first_text(item, &DATE_SELECTOR).unwrap_or_default();
        let lineup = base::first_text(item, &LINEUP_SELECTOR).unwrap_or_default();
        let event_url = format!("{}{}", self.event_url_prefix, event_id);

        let event = match entity.kind {
            EntityKind::Venue => RawEvent {
                name,
                date,
                event_id,
                event_url,
                event_type: EntityKind::Venue,
                venue: entity.name.clone(),
                lineup,
                artist: String::new(),
                promoter: String::new(),
            },
            EntityKind::Artist => RawEvent {
                name,
                date,
                event_id,
                event_url,
                event_type: EntityKind::Artist,
                venue: joined_venue(item),
                lineup: String::new(),
                artist: entity.name.clone(),
                promoter: String::new(),
            },
            EntityKind::Promoter => RawEvent {
                name,
                date,
                event_id,
                event_url,
                event_type: EntityKind::Promoter,
                venue: joined_venue(item),
                lineup,
                artist: String::new(),
                promoter: entity.name.clone(),
            },
        };

        Ok(event)
    }
}

/// Artist and promoter listings carry the venue as a run of links in the
/// title heading; RA renders them comma-separated ("Berlin, Tresor").
fn joined_venue(item: &ElementRef<'_>) -> String {
    item.select(&VENUE_LINK_SELECTOR)
        .map(base::inner_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn parse_tickets(html: &str) -> Vec<TicketQuote> {
    let document = Html::parse_document(html);
    let mut quotes = Vec::new();

    for item in document.select(&TICKET_ITEM_SELECTOR) {
        let Some(text) = item.select(&TICKET_TEXT_SELECTOR).next() else {
            continue;
        };
        let label = base::own_text(&text);
        let price = base::first_text(&text, &TICKET_PRICE_SELECTOR).unwrap_or_default();
        if label.is_empty() || price.is_empty() {
            continue;
        }
        quotes.push(TicketQuote { label, price });
    }

    quotes
}

impl EventSource for RaSource {
    fn fetch_events(&self, entity: &Entity) -> Result<Vec<RawEvent>, FetchError> {
        let url = self.listing_url(entity);
        let html = base::fetch_html(&url).map_err(|err| FetchError::Http {
            url: url.clone(),
            message: format!("{err:#}"),
        })?;
        Ok(self.parse_listing(&html, entity))
    }

    fn fetch_tickets(&self, event_url: &str) -> Vec<TicketQuote> {
        match base::fetch_html(event_url) {
            Ok(html) => parse_tickets(&html),
            Err(err) => {
                tracing::warn!("unable to fetch tickets for {event_url}: {err:#}");
                Vec::new()
            }
        }
    }
}
