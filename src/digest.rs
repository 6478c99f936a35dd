use crate::models::{EntityKind, RawEvent, TicketQuote, UserSubscription};

/// Per-user notification accumulator. Created lazily on a user's first
/// matched event (the greeting comes with creation), grows one block per
/// match, and is rendered with a closing summary at dispatch time. Users
/// without a digest are never emailed.
pub struct Digest {
    user: UserSubscription,
    body: String,
    matched_events: usize,
}

impl Digest {
    pub fn new(user: UserSubscription) -> Self {
        let body = format!("Hi <b>{},</b> <br><br><br>", user.name);
        Self {
            user,
            body,
            matched_events: 0,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.user.email
    }

    pub fn matched_events(&self) -> usize {
        self.matched_events
    }

    pub fn push_event(&mut self, event: &RawEvent, tickets: &[TicketQuote]) {
        let block = match event.event_type {
            EntityKind::Venue => format!(
                "<p> New event at <b>{}</b> named <i>{}</i> with a lineup of <b>{}</b> \
                 on {} has been added here: {}<br>",
                event.venue, event.name, event.lineup, event.date, event.event_url
            ),
            EntityKind::Artist => format!(
                "<p>New event: <b>{}</b> is playing at <b>{}</b> on {} at the night \
                 called <i>{}</i>. Find it here: {}<br>",
                event.artist, event.venue, event.date, event.name, event.event_url
            ),
            EntityKind::Promoter => format!(
                "<p> New promoter <b>{}</b> event at <b>{}</b> named <i>{}</i> with a \
                 lineup of <b>{}</b> on {} has been added here: {}<br>",
                event.promoter, event.venue, event.name, event.lineup, event.date, event.event_url
            ),
        };
        self.body.push_str(&block);
        self.body.push_str(&render_tickets(tickets));
        self.matched_events += 1;
    }

    /// The full HTML body: greeting, event blocks, closing summary of the
    /// user's subscriptions.
    pub fn render(&self) -> String {
        let venues = join_names(&self.user.venues);
        let promoters = join_names(&self.user.promoters);
        let artists = join_names(&self.user.artists);
        let locations = if self.user.locations.is_empty() {
            "Worldwide".to_string()
        } else {
            self.user.locations.join(", ")
        };

        format!(
            "{}<br><br>Your venues: <br> <b>{venues}</b> <br><br> \
             Your promoters: <br> <b>{promoters}</b> <br><br> \
             Your artists: <br> <b>{artists}</b> <br><br> \
             Your new artist events locations: <br> <b>{locations}</b> <br><br> \
             If you want anything removed from or added to this list, \
             reply to this email. \u{2764}",
            self.body
        )
    }
}

fn render_tickets(tickets: &[TicketQuote]) -> String {
    let mut out = String::new();
    if !tickets.is_empty() {
        out.push_str("<b>Tickets currently on sale:</b><br>");
        for ticket in tickets {
            out.push_str(&format!("    <u>{}</u>: {}<br>", ticket.label, ticket.price));
        }
    }
    out.push_str("<br>");
    out
}

fn join_names(interests: &[crate::models::Interest]) -> String {
    interests
        .iter()
        .map(|interest| interest.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interest;

    fn subscriber() -> UserSubscription {
        UserSubscription {
            name: "Ada".to_string(),
            nickname: "ada".to_string(),
            email: "ada@example.com".to_string(),
            locations: vec!["Berlin".to_string()],
            venues: vec![Interest {
                name: "Warehouse".to_string(),
                tag: "warehouse".to_string(),
            }],
            artists: vec![Interest {
                name: "Rrose".to_string(),
                tag: "rrose".to_string(),
            }],
            promoters: Vec::new(),
        }
    }

    fn venue_event() -> RawEvent {
        RawEvent {
            name: "Opening Night".to_string(),
            date: "Fri, 12 Jun".to_string(),
            event_id: "ev001".to_string(),
            event_url: "https://www.residentadvisor.net/events/ev001".to_string(),
            event_type: EntityKind::Venue,
            venue: "Warehouse".to_string(),
            lineup: "Resident One, Resident Two".to_string(),
            artist: String::new(),
            promoter: String::new(),
        }
    }

    #[test]
    fn greeting_comes_with_the_first_block() {
        let mut digest = Digest::new(subscriber());
        digest.push_event(&venue_event(), &[]);

        let body = digest.render();
        assert!(body.starts_with("Hi <b>Ada,</b>"));
        assert!(body.contains("New event at <b>Warehouse</b>"));
        assert!(body.contains("named <i>Opening Night</i>"));
        assert_eq!(digest.matched_events(), 1);
    }

    #[test]
    fn ticket_lines_render_only_when_quotes_exist() {
        let mut digest = Digest::new(subscriber());
        digest.push_event(&venue_event(), &[]);
        assert!(!digest.render().contains("Tickets currently on sale"));

        let mut digest = Digest::new(subscriber());
        digest.push_event(
            &venue_event(),
            &[TicketQuote {
                label: "Early Bird".to_string(),
                price: "£10".to_string(),
            }],
        );
        let body = digest.render();
        assert!(body.contains("<b>Tickets currently on sale:</b><br>"));
        assert!(body.contains("<u>Early Bird</u>: £10<br>"));
    }

    #[test]
    fn summary_lists_subscriptions() {
        let digest = Digest::new(subscriber());
        let body = digest.render();
        assert!(body.contains("Your venues: <br> <b>Warehouse</b>"));
        assert!(body.contains("Your artists: <br> <b>Rrose</b>"));
        assert!(body.contains("locations: <br> <b>Berlin</b>"));
    }

    #[test]
    fn empty_locations_render_as_worldwide() {
        let mut user = subscriber();
        user.locations.clear();
        let body = Digest::new(user).render();
        assert!(body.contains("<b>Worldwide</b>"));
    }

    #[test]
    fn promoter_block_has_its_own_wording() {
        let mut event = venue_event();
        event.event_type = EntityKind::Promoter;
        event.promoter = "Ostgut".to_string();

        let mut digest = Digest::new(subscriber());
        digest.push_event(&event, &[]);
        assert!(digest
            .render()
            .contains("New promoter <b>Ostgut</b> event at <b>Warehouse</b>"));
    }
}
