//! HITL controller: bridges inbound SMS to the state machine
//!
//! URLs become ranked roles, commands act on the system, and free text is
//! routed to the oldest open approval for that user. Every reply goes
//! through `send_notification`; nothing is sent inline.

use std::sync::Arc;
use tracing::{info, warn};

use super::intents::{Command, Intent, parse_intent};
use crate::clients::fetch::PageFetcher;
use crate::dispatcher::Dispatcher;
use crate::store::{Profile, RoleInput, RoleStatus};

const HELP_TEXT: &str = "Send a job posting URL to save and rank it. Commands: help, status, \
report, stop, start. A plain reply answers the oldest open approval question.";

pub struct HitlController {
    dispatcher: Arc<Dispatcher>,
    fetcher: PageFetcher,
}

impl HitlController {
    pub fn new(dispatcher: Arc<Dispatcher>, fetcher: PageFetcher) -> Self {
        Self {
            dispatcher,
            fetcher,
        }
    }

    /// Handle one verified inbound SMS. Replies are enqueued, never sent
    /// inline; store failures bubble up.
    pub async fn handle_inbound(&self, from: &str, body: &str) -> crate::dispatcher::Result<()> {
        let store = self.dispatcher.store();

        let Some(profile) = store.profile_by_phone(from)? else {
            // No profile, no reply channel; keep the message for the operator
            info!(from, "Inbound SMS from unknown number recorded");
            store.record_inbound(from, body)?;
            return Ok(());
        };

        let reply = match parse_intent(body) {
            None => HELP_TEXT.to_string(),
            Some(Intent::Url(url)) => self.ingest_posting(&profile, &url).await?,
            Some(Intent::Command(command)) => self.run_command(&profile, command).await?,
            Some(Intent::Answer(answer)) => self.route_answer(&profile, from, body, &answer).await?,
        };

        self.dispatcher.enqueue_notification(&profile, reply).await;
        Ok(())
    }

    /// Fetch, extract, and rank a posting URL
    async fn ingest_posting(
        &self,
        profile: &Profile,
        url: &str,
    ) -> crate::dispatcher::Result<String> {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(err) => {
                warn!(url, error = %err, "Posting fetch failed");
                return Ok(format!("⚠️ Could not read that posting: {err}"));
            }
        };

        let posting = match self.dispatcher.engine.extract_posting(url, &html).await {
            Ok(posting) => posting,
            Err(err) => {
                warn!(url, error = %err, "Posting extraction failed");
                return Ok(format!("⚠️ Could not understand that posting: {err}"));
            }
        };

        let store = self.dispatcher.store();
        let (role, created) = store.upsert_role(RoleInput {
            company: posting.company,
            title: posting.title,
            description: posting.description,
            posting_url: url.to_string(),
        })?;

        // Ranking is best-effort; an unscored role is still usable
        let mut score_note = String::new();
        if role.status == RoleStatus::Sourced {
            match self.dispatcher.engine.score_role(profile, &role).await {
                Ok(score) => {
                    store.set_role_rank(role.id, score.score, &score.rationale)?;
                    score_note = format!(", fit {:.2}", score.score);
                }
                Err(err) => warn!(role_id = role.id, error = %err, "Role scoring failed"),
            }
        }

        info!(role_id = role.id, created, "Posting ingested via SMS");
        Ok(format!(
            "📋 {} {} at {} (role #{}{score_note}). Apply via POST /jobs/apply/{}",
            if created { "Saved" } else { "Refreshed" },
            role.title,
            role.company,
            role.id,
            role.id
        ))
    }

    async fn run_command(
        &self,
        _profile: &Profile,
        command: Command,
    ) -> crate::dispatcher::Result<String> {
        let store = self.dispatcher.store();
        Ok(match command {
            Command::Help => HELP_TEXT.to_string(),

            Command::Status => {
                let counts = store.count_by_status()?;
                let paused = store.is_paused()?;
                if counts.is_empty() {
                    format!(
                        "No applications yet.{}",
                        if paused { " (paused)" } else { "" }
                    )
                } else {
                    let summary = counts
                        .iter()
                        .map(|(status, count)| format!("{status}: {count}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "📊 {summary}{}",
                        if paused { " (paused)" } else { "" }
                    )
                }
            }

            Command::Report => {
                let apps = store.list_applications(None, 10)?;
                if apps.is_empty() {
                    "No applications yet.".to_string()
                } else {
                    let mut lines = vec!["📈 Recent applications:".to_string()];
                    for app in apps {
                        let role = store.role(app.role_id)?;
                        let name = role
                            .map(|role| format!("{} at {}", role.title, role.company))
                            .unwrap_or_else(|| format!("role #{}", app.role_id));
                        lines.push(format!("#{} {} — {}", app.id, name, app.status));
                    }
                    lines.join("\n")
                }
            }

            Command::Stop => {
                store.set_paused(true)?;
                "⏸️ Paused. No new applications will start until you text 'start'.".to_string()
            }

            Command::Start => {
                store.set_paused(false)?;
                "▶️ Resumed. New applications will be processed.".to_string()
            }
        })
    }

    /// Free text answers the oldest open approval; with none open, it is
    /// recorded and answered with help
    async fn route_answer(
        &self,
        profile: &Profile,
        from: &str,
        raw_body: &str,
        answer: &str,
    ) -> crate::dispatcher::Result<String> {
        let store = self.dispatcher.store();

        let Some(app) = store.oldest_waiting_approval(profile.id)? else {
            store.record_inbound(from, raw_body)?;
            return Ok(format!(
                "I wasn't waiting on an answer from you. {HELP_TEXT}"
            ));
        };

        let question = app
            .approval_context
            .as_ref()
            .map(|context| context.question.clone())
            .unwrap_or_else(|| "the open question".to_string());

        match self.dispatcher.resume_application(app.id, answer).await {
            Ok(_) => {
                let role = store.role(app.role_id)?;
                let name = role
                    .map(|role| format!("{} at {}", role.title, role.company))
                    .unwrap_or_else(|| format!("application #{}", app.id));
                Ok(format!("👍 Got it — answering “{question}” and resuming {name}."))
            }
            Err(err) => {
                warn!(application_id = app.id, error = %err, "Approval resume failed");
                Ok(format!("⚠️ Could not resume that application: {err}"))
            }
        }
    }
}
