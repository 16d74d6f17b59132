//! Newsletter dispatch: announce not-yet-sent posts to subscribed members.

use std::sync::Arc;
use tracing::{error, info};

use crate::clients::mail::Mailer;
use crate::db::Store;
use crate::services::mail_templates;

#[derive(Clone)]
pub struct NewsletterService {
    store: Store,
    mailer: Arc<dyn Mailer>,
    base_url: String,
}

impl NewsletterService {
    #[must_use]
    pub fn new(store: Store, mailer: Arc<dyn Mailer>, base_url: String) -> Self {
        Self {
            store,
            mailer,
            base_url,
        }
    }

    /// One dispatch pass. Returns the number of posts announced. A post is
    /// only flagged as sent once every recipient accepted the mail, so a
    /// partial failure retries on the next run.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let pending = self.store.newsletter_pending_posts().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let recipients = self.store.newsletter_recipients().await?;
        info!(
            "Newsletter run: {} post(s) pending, {} recipient(s)",
            pending.len(),
            recipients.len()
        );

        let mut announced = 0;
        for post in pending {
            let sends = recipients.iter().map(|user| {
                self.mailer.send(mail_templates::newsletter_email(
                    &self.base_url,
                    &user.email,
                    &post.title,
                    &post.slug,
                ))
            });

            let results = futures::future::join_all(sends).await;
            let failures = results.iter().filter(|r| r.is_err()).count();

            if failures == 0 {
                self.store.mark_post_newsletter_sent(post.id).await?;
                announced += 1;
            } else {
                error!(
                    "Newsletter for '{}': {} of {} sends failed, will retry next run",
                    post.slug,
                    failures,
                    results.len()
                );
            }
        }

        Ok(announced)
    }
}
