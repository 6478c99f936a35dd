use crate::models::{EntityKind, RawEvent, UserSubscription};

/// The users whose subscriptions match a qualifying event. Pure; a user
/// appears at most once however many of their filters match.
pub fn matched_users<'a>(
    event: &RawEvent,
    users: &'a [UserSubscription],
) -> Vec<&'a UserSubscription> {
    users.iter().filter(|user| matches(event, user)).collect()
}

fn matches(event: &RawEvent, user: &UserSubscription) -> bool {
    match event.event_type {
        EntityKind::Venue => user.venues.iter().any(|venue| venue.name == event.venue),
        EntityKind::Artist => {
            if !user.artists.iter().any(|artist| artist.name == event.artist) {
                return false;
            }
            // no location preference means worldwide
            user.locations.is_empty()
                || user
                    .locations
                    .iter()
                    .any(|location| event.venue.contains(location.as_str()))
        }
        EntityKind::Promoter => user
            .promoters
            .iter()
            .any(|promoter| promoter.name == event.promoter),
    }
}
