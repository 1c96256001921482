//! Trigger intake: turn an apply request into a published job_application
//!
//! Upserts nothing itself; the HTTP/SMS surfaces already created the profile
//! and role rows. Intake prepares documents, assembles the task payload
//! (profile + preferences + decrypted credentials), publishes it, and moves
//! the application into SUBMITTING with its task id.

use tracing::{debug, info, warn};

use super::{DispatchError, Dispatcher, Result};
use crate::clients::artifacts::DocumentKind;
use crate::messages::{
    AiInstructions, Credentials, JobApplicationTask, TaskId, TaskPayload, UserData,
    WorkArrangement,
};
use crate::store::{Application, ApplicationStatus, Event, Profile, Role, RoleStatus};
use std::collections::BTreeMap;

/// What an apply request produced
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub application_id: u64,
    pub task_id: Option<TaskId>,
    /// The active application was reused instead of creating another
    pub reused_active: bool,
}

impl Dispatcher {
    /// Start (or re-join) an application of `profile_id` against `role_id`
    pub async fn trigger_application(
        &self,
        profile_id: u64,
        role_id: u64,
    ) -> Result<TriggerOutcome> {
        if self.store.is_paused()? {
            return Err(DispatchError::Paused);
        }

        let profile = self
            .store
            .profile(profile_id)?
            .ok_or(DispatchError::ProfileNotFound(profile_id))?;
        let role = self
            .store
            .role(role_id)?
            .ok_or(DispatchError::RoleNotFound(role_id))?;

        let (app, reused) = self.store.create_or_reuse_application(profile_id, role_id)?;

        // An in-flight or suspended attempt is simply handed back
        if reused && in_flight(app.status) {
            debug!(application_id = app.id, status = %app.status, "Returning in-flight application");
            return Ok(TriggerOutcome {
                application_id: app.id,
                task_id: app.queue_task_id.clone(),
                reused_active: true,
            });
        }

        if app.attempts >= self.settings.max_attempts {
            return Err(DispatchError::BudgetExceeded(app.id));
        }

        // Document prep does slow external work; no application lock held here
        let app = self.ensure_documents(app, &profile, &role).await?;

        let lock = self.store.lock_application(app.id);
        let _guard = lock.lock().await;

        // Re-check under the lock; a concurrent trigger may have published
        let app = self
            .store
            .application(app.id)?
            .ok_or(crate::store::StoreError::NotFound {
                entity: "application",
                id: app.id,
            })
            .map_err(DispatchError::Store)?;
        if in_flight(app.status) {
            return Ok(TriggerOutcome {
                application_id: app.id,
                task_id: app.queue_task_id.clone(),
                reused_active: true,
            });
        }

        let task_id = self
            .publish_application_task(&app, &profile, &role, None)
            .await?;

        if let Err(err) = self.store.set_role_status(role.id, RoleStatus::Applying) {
            warn!(role_id = role.id, error = %err, "Role status not advanced");
        }

        info!(
            application_id = app.id,
            task_id = %task_id,
            company = %role.company,
            title = %role.title,
            "Application task published"
        );
        Ok(TriggerOutcome {
            application_id: app.id,
            task_id: Some(task_id),
            reused_active: reused,
        })
    }

    /// Approval re-entry: merge the user's reply into the custom answers and
    /// re-publish with the saved page state
    pub async fn resume_application(&self, application_id: u64, answer: &str) -> Result<TaskId> {
        let lock = self.store.lock_application(application_id);
        let _guard = lock.lock().await;

        let app = self
            .store
            .application(application_id)?
            .ok_or(crate::store::StoreError::NotFound {
                entity: "application",
                id: application_id,
            })
            .map_err(DispatchError::Store)?;
        if app.status != ApplicationStatus::WaitingApproval {
            return Err(DispatchError::Store(crate::store::StoreError::Validation(
                format!(
                    "application {application_id} is {} and has no open approval",
                    app.status
                ),
            )));
        }

        let question = app
            .approval_context
            .as_ref()
            .map(|context| context.question.clone())
            .unwrap_or_else(|| "Approval question".to_string());
        let resume_from = app
            .approval_context
            .as_ref()
            .and_then(|context| context.state_blob.clone());

        let app = self
            .store
            .merge_custom_answer(application_id, &question, answer)?;

        let profile = self
            .store
            .profile(app.profile_id)?
            .ok_or(DispatchError::ProfileNotFound(app.profile_id))?;
        let role = self
            .store
            .role(app.role_id)?
            .ok_or(DispatchError::RoleNotFound(app.role_id))?;

        let task_id = self
            .publish_application_task(&app, &profile, &role, resume_from)
            .await?;

        info!(
            application_id,
            task_id = %task_id,
            question = %question,
            "Approval reply merged, application resumed"
        );
        Ok(task_id)
    }

    /// Draft and store documents if the application does not have them yet
    async fn ensure_documents(
        &self,
        app: Application,
        profile: &Profile,
        role: &Role,
    ) -> Result<Application> {
        if app.status != ApplicationStatus::Draft
            && app.resume_url.is_some()
            && app.cover_letter_url.is_some()
        {
            return Ok(app);
        }

        let preferences = self.store.preferences(profile.id)?;
        let instructions = build_ai_instructions(&preferences);
        let docs = self
            .engine
            .draft_documents(profile, &preferences, role, instructions.as_ref())
            .await?;

        let resume_url = self
            .artifacts
            .put_document(app.id, DocumentKind::Resume, docs.resume_markdown.into_bytes())
            .await?;
        let cover_letter_url = self
            .artifacts
            .put_document(
                app.id,
                DocumentKind::CoverLetter,
                docs.cover_letter_markdown.into_bytes(),
            )
            .await?;

        let app = self.store.apply_event(
            app.id,
            &Event::DocumentsReady {
                resume_url,
                cover_letter_url,
            },
        )?;
        debug!(application_id = app.id, "Documents drafted and stored");
        Ok(app)
    }

    /// Assemble and publish one job_application task, then record the task id
    /// on the application. Caller holds the application lock.
    pub(crate) async fn publish_application_task(
        &self,
        app: &Application,
        profile: &Profile,
        role: &Role,
        resume_from: Option<String>,
    ) -> Result<TaskId> {
        let preferences = self.store.preferences(profile.id)?;
        let user_data = build_user_data(profile, &preferences, app);
        let credentials = self.credentials_for(profile.id, &role.posting_url)?;
        let instructions = build_ai_instructions(&preferences);

        let task = JobApplicationTask::builder()
            .job_id(role.id)
            .job_url(role.posting_url.clone())
            .company(role.company.clone())
            .title(role.title.clone())
            .application_id(app.id)
            .user_data(user_data)
            .maybe_credentials(credentials)
            .maybe_custom_answers(
                (!app.custom_answers.is_empty()).then(|| app.custom_answers.clone()),
            )
            .maybe_ai_instructions(instructions)
            .maybe_resume_from(resume_from)
            .build();

        let task_id = self
            .broker
            .publish(&TaskPayload::JobApplication(task), 0)
            .await?;
        self.store.apply_event(
            app.id,
            &Event::TaskPublished {
                task_id: task_id.clone(),
            },
        )?;
        self.metrics.task_published();
        Ok(task_id)
    }

    /// Decrypt the credential for the posting's hostname, if one is stored.
    /// Cleartext exists only in the returned payload.
    fn credentials_for(&self, profile_id: u64, posting_url: &str) -> Result<Option<Credentials>> {
        let Some(cipher) = &self.cipher else {
            return Ok(None);
        };
        let Some(hostname) = site_hostname(posting_url) else {
            return Ok(None);
        };
        let decrypted = self
            .store
            .decrypt_credential(profile_id, &hostname, cipher)?;
        Ok(decrypted.map(|(username, password)| Credentials { username, password }))
    }
}

fn in_flight(status: ApplicationStatus) -> bool {
    matches!(
        status,
        ApplicationStatus::Submitting
            | ApplicationStatus::WaitingApproval
            | ApplicationStatus::NeedsUserInfo
    )
}

fn site_hostname(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
}

/// Assemble the worker-facing user data from profile fields and well-known
/// preference keys
fn build_user_data(
    profile: &Profile,
    preferences: &BTreeMap<String, String>,
    app: &Application,
) -> UserData {
    let pref = |key: &str| preferences.get(key).cloned();

    UserData::builder()
        .name(profile.full_name.clone())
        .email(profile.email.clone())
        .phone(profile.phone.clone())
        .maybe_resume_url(app.resume_url.clone())
        .maybe_cover_letter_url(app.cover_letter_url.clone())
        .maybe_linkedin_url(pref("linkedin_url"))
        .maybe_github_url(pref("github_url"))
        .maybe_portfolio_url(pref("portfolio_url"))
        .maybe_website(pref("website"))
        .maybe_address(pref("address"))
        .maybe_city(pref("city"))
        .maybe_state(pref("state"))
        .maybe_zip_code(pref("zip_code"))
        .maybe_country(pref("country"))
        .maybe_current_role(pref("current_role"))
        .maybe_experience_years(
            preferences
                .get("experience_years")
                .and_then(|raw| raw.parse().ok()),
        )
        .maybe_education(pref("education"))
        .maybe_skills(pref("skills").map(|raw| split_csv(&raw)))
        .maybe_preferred_work_arrangement(
            preferences
                .get("preferred_work_arrangement")
                .and_then(|raw| parse_arrangement(raw)),
        )
        .maybe_availability(pref("availability"))
        .maybe_salary_expectation(pref("salary_expectation"))
        .summary(profile.summary.clone())
        .headline(profile.headline.clone())
        .build()
}

fn build_ai_instructions(preferences: &BTreeMap<String, String>) -> Option<AiInstructions> {
    let tone = preferences.get("ai_tone").cloned();
    let focus_areas = preferences.get("ai_focus_areas").map(|raw| split_csv(raw));
    let avoid_topics = preferences.get("ai_avoid_topics").map(|raw| split_csv(raw));

    if tone.is_none() && focus_areas.is_none() && avoid_topics.is_none() {
        return None;
    }
    Some(AiInstructions {
        tone,
        focus_areas,
        avoid_topics,
    })
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_arrangement(raw: &str) -> Option<WorkArrangement> {
    match raw.trim().to_lowercase().as_str() {
        "remote" => Some(WorkArrangement::Remote),
        "hybrid" => Some(WorkArrangement::Hybrid),
        "onsite" | "on-site" => Some(WorkArrangement::Onsite),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_site_hostname() {
        assert_eq!(
            site_hostname("https://Jobs.Example.com/acme/staff").as_deref(),
            Some("jobs.example.com")
        );
        assert_eq!(site_hostname("not a url"), None);
    }

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv("rust, tokio ,redis"), vec!["rust", "tokio", "redis"]);
        assert!(split_csv(" , ").is_empty());
    }

    #[test]
    fn test_parse_arrangement() {
        assert_eq!(parse_arrangement("Remote"), Some(WorkArrangement::Remote));
        assert_eq!(parse_arrangement("on-site"), Some(WorkArrangement::Onsite));
        assert_eq!(parse_arrangement("sometimes"), None);
    }

    #[test]
    fn test_build_user_data_pulls_preferences() {
        let profile = Profile {
            id: 1,
            full_name: "Dana Smith".to_string(),
            email: "dana@example.com".to_string(),
            phone: "+15551230000".to_string(),
            headline: "Engineer".to_string(),
            summary: "Summary".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut preferences = BTreeMap::new();
        preferences.insert("city".to_string(), "Austin".to_string());
        preferences.insert("experience_years".to_string(), "9".to_string());
        preferences.insert("skills".to_string(), "rust, redis".to_string());
        preferences.insert(
            "preferred_work_arrangement".to_string(),
            "remote".to_string(),
        );
        let app = Application {
            id: 7,
            profile_id: 1,
            role_id: 42,
            status: ApplicationStatus::ReadyToSubmit,
            attempts: 0,
            queue_task_id: None,
            resume_url: Some("memory://a/resume.md".to_string()),
            cover_letter_url: Some("memory://a/cover.md".to_string()),
            custom_answers: BTreeMap::new(),
            approval_context: None,
            screenshot_url: None,
            error_message: None,
            notes: None,
            submitted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let user = build_user_data(&profile, &preferences, &app);
        assert_eq!(user.city.as_deref(), Some("Austin"));
        assert_eq!(user.experience_years, Some(9));
        assert_eq!(user.skills.as_deref(), Some(&["rust".to_string(), "redis".to_string()][..]));
        assert_eq!(user.preferred_work_arrangement, Some(WorkArrangement::Remote));
        assert_eq!(user.resume_url.as_deref(), Some("memory://a/resume.md"));
        assert_eq!(user.headline.as_deref(), Some("Engineer"));
    }

    #[test]
    fn test_ai_instructions_only_when_present() {
        assert!(build_ai_instructions(&BTreeMap::new()).is_none());

        let mut preferences = BTreeMap::new();
        preferences.insert("ai_tone".to_string(), "direct".to_string());
        let instructions = build_ai_instructions(&preferences).unwrap();
        assert_eq!(instructions.tone.as_deref(), Some("direct"));
    }
}
