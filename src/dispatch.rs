use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task;
use tokio::time::sleep;

use crate::digest::Digest;
use crate::mailer::{MailError, Mailer};

pub const SUBJECT: &str = "New events on RA";

const MAX_ATTEMPTS: u32 = 4;
const FIRST_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Sends one rendered digest per user. A failing user is logged and skipped;
/// the remaining users still get their mail. Cancellation stops new sends
/// but never unwinds anything already sent.
pub async fn dispatch_all(
    mailer: Arc<dyn Mailer>,
    digests: Vec<Digest>,
    cancel: &watch::Receiver<bool>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for digest in digests {
        if *cancel.borrow() {
            report.skipped += 1;
            continue;
        }
        if digest.matched_events() == 0 {
            continue;
        }

        tracing::info!(
            recipient = digest.recipient(),
            events = digest.matched_events(),
            "emailing digest"
        );
        match send_with_retry(Arc::clone(&mailer), &digest).await {
            Ok(()) => report.sent += 1,
            Err(err) => {
                tracing::warn!(recipient = digest.recipient(), "giving up on digest: {err}");
                report.failed += 1;
            }
        }
    }

    report
}

async fn send_with_retry(mailer: Arc<dyn Mailer>, digest: &Digest) -> Result<(), MailError> {
    let recipient = digest.recipient().to_string();
    let body = digest.render();
    let mut delay = FIRST_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        let mailer = Arc::clone(&mailer);
        let recipient_task = recipient.clone();
        let body_task = body.clone();
        let result = task::spawn_blocking(move || {
            mailer.send(&recipient_task, SUBJECT, &body_task)
        })
        .await
        .map_err(|err| MailError::Permanent(format!("mail task failed: {err}")))?;

        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    recipient = recipient.as_str(),
                    attempt,
                    "transient mail failure, retrying in {delay:?}: {err}"
                );
                sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns on the last attempt")
}
