//! Task runner - drives one job_application task through the form loop
//!
//! Bounded on three axes: top-level page iterations, sub-attempts per
//! browser action, and a wall-clock ceiling enforced by the caller. The
//! runner produces a value for every suspension (approval, missing user
//! info) and an error only for failures the worker may retry.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::browser::{BrowserError, BrowserSession, PageKind, PageView};
use super::fields::{upload_wants_cover_letter, upload_wants_resume, value_for_label};
use super::questions::{QuestionAnswer, answer_question};
use crate::clients::artifacts::{ArtifactStore, DocumentKind};
use crate::messages::JobApplicationTask;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl From<BrowserError> for TaskError {
    fn from(err: BrowserError) -> Self {
        TaskError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Loop bounds for one task
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub max_steps: u32,
    pub max_attempts: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_attempts: 3,
        }
    }
}

/// How one run ended. Exactly one of these maps onto exactly one terminal
/// queue publication.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied {
        confirmation: String,
        submitted_at: chrono::DateTime<Utc>,
        screenshot_url: Option<String>,
    },
    NeedsApproval {
        question: String,
        state_blob: String,
        screenshot_url: Option<String>,
        page_title: String,
        page_url: String,
        form_fields: Vec<String>,
    },
    NeedsUserInfo {
        reason: String,
    },
}

/// Run one task to an outcome. The caller owns session teardown and the
/// wall-clock ceiling.
pub async fn run_task(
    task: &JobApplicationTask,
    session: &mut Box<dyn BrowserSession>,
    artifacts: &ArtifactStore,
    limits: RunLimits,
) -> Result<Outcome> {
    let mut page = match &task.resume_from {
        Some(blob) => {
            debug!(application_id = task.application_id, "Resuming paused run");
            session.restore(blob).await?
        }
        None => session.open(&task.job_url).await?,
    };

    let mut unknown_strikes = 0u32;

    for step in 0..limits.max_steps {
        debug!(
            application_id = task.application_id,
            step,
            kind = ?page.kind,
            url = %page.url,
            "Page analyzed"
        );

        match page.kind {
            PageKind::JobDescription => {
                page = click_apply_with_attempts(session, limits.max_attempts).await?;
            }

            PageKind::Login => match &task.credentials {
                Some(credentials) => {
                    // Cleartext lives only inside this call; no logging, no
                    // screenshots of this page
                    page = session
                        .login(&credentials.username, &credentials.password)
                        .await?;
                }
                None => {
                    info!(
                        application_id = task.application_id,
                        "Login wall with no stored credentials"
                    );
                    return Ok(Outcome::NeedsUserInfo {
                        reason: format!("{} requires a login and no credentials are stored", page.url),
                    });
                }
            },

            PageKind::ApplicationForm | PageKind::MultiStep => {
                if let Some(outcome) = fill_form(task, session, artifacts, &page).await? {
                    return Ok(outcome);
                }
                page = submit_with_attempts(session, limits.max_attempts).await?;
            }

            PageKind::Confirmation => {
                let confirmation = page
                    .confirmation_text
                    .clone()
                    .unwrap_or_else(|| "Application submitted".to_string());
                let screenshot_url =
                    capture_screenshot(session, &page, artifacts, task.application_id).await;
                info!(
                    application_id = task.application_id,
                    confirmation = %confirmation,
                    "Application confirmed"
                );
                return Ok(Outcome::Applied {
                    confirmation,
                    submitted_at: Utc::now(),
                    screenshot_url,
                });
            }

            PageKind::Unknown => {
                unknown_strikes += 1;
                if unknown_strikes >= limits.max_attempts {
                    return Err(TaskError(format!(
                        "could not classify page after {unknown_strikes} attempts: {}",
                        page.url
                    )));
                }
                page = session.analyze().await?;
            }
        }
    }

    Err(TaskError(format!(
        "page budget of {} steps exhausted without a confirmation",
        limits.max_steps
    )))
}

/// Fill standard fields, handle uploads, and work the custom questions.
/// Returns an outcome when a question needs human approval.
async fn fill_form(
    task: &JobApplicationTask,
    session: &mut Box<dyn BrowserSession>,
    artifacts: &ArtifactStore,
    page: &PageView,
) -> Result<Option<Outcome>> {
    for field in &page.fields {
        if field.is_upload {
            if upload_wants_resume(&field.label) {
                if let Some(url) = &task.user_data.resume_url {
                    session.upload_file(&field.label, url).await?;
                }
            } else if upload_wants_cover_letter(&field.label) {
                if let Some(url) = &task.user_data.cover_letter_url {
                    session.upload_file(&field.label, url).await?;
                }
            }
        } else if let Some(value) = value_for_label(&field.label, &task.user_data) {
            session.fill_field(&field.label, &value).await?;
        }
    }

    for question in &page.questions {
        match answer_question(question, task.custom_answers.as_ref(), &task.user_data) {
            QuestionAnswer::Provided(answer) => {
                session.answer_question(question, &answer).await?;
            }
            QuestionAnswer::Deterministic { answer, confidence } => {
                debug!(question = %question, confidence, "Answering from profile");
                session.answer_question(question, &answer).await?;
            }
            QuestionAnswer::NeedsApproval => {
                let state_blob = session.page_state().await?;
                let screenshot_url =
                    capture_screenshot(session, page, artifacts, task.application_id).await;
                info!(
                    application_id = task.application_id,
                    question = %question,
                    "Halting for approval"
                );
                return Ok(Some(Outcome::NeedsApproval {
                    question: question.clone(),
                    state_blob,
                    screenshot_url,
                    page_title: page.title.clone(),
                    page_url: page.url.clone(),
                    form_fields: page.fields.iter().map(|f| f.label.clone()).collect(),
                }));
            }
        }
    }

    Ok(None)
}

/// Screenshot the current page and stash it, unless a password field is
/// visible (credential hygiene) or capture fails (non-fatal)
async fn capture_screenshot(
    session: &mut Box<dyn BrowserSession>,
    page: &PageView,
    artifacts: &ArtifactStore,
    application_id: u64,
) -> Option<String> {
    if page.has_password_field {
        debug!(application_id, "Screenshot suppressed on password page");
        return None;
    }
    match session.screenshot().await {
        Ok(Some(bytes)) => artifacts
            .put_document(application_id, DocumentKind::Screenshot, bytes)
            .await
            .map_err(|err| warn!(application_id, error = %err, "Screenshot upload failed"))
            .ok(),
        Ok(None) => None,
        Err(err) => {
            warn!(application_id, error = %err, "Screenshot capture failed");
            None
        }
    }
}

/// Retry the apply click on transient errors, up to `max_attempts`
async fn click_apply_with_attempts(
    session: &mut Box<dyn BrowserSession>,
    max_attempts: u32,
) -> Result<PageView> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match session.click_apply().await {
            Ok(page) => return Ok(page),
            Err(BrowserError::Transient(msg)) if attempt < max_attempts => {
                warn!(attempt, error = %msg, "Transient error clicking apply, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Retry the submit click on transient errors, up to `max_attempts`
async fn submit_with_attempts(
    session: &mut Box<dyn BrowserSession>,
    max_attempts: u32,
) -> Result<PageView> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match session.submit_step().await {
            Ok(page) => return Ok(page),
            Err(BrowserError::Transient(msg)) if attempt < max_attempts => {
                warn!(attempt, error = %msg, "Transient error submitting, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Credentials, UserData};
    use crate::worker::browser::{Browser, FormField, RecordedAction, ScriptedBrowser};
    use std::collections::BTreeMap;

    fn task() -> JobApplicationTask {
        JobApplicationTask {
            job_id: 42,
            job_url: "https://boards.example.com/acme/staff".to_string(),
            company: "Acme".to_string(),
            title: "Staff Engineer".to_string(),
            application_id: 7,
            user_data: UserData {
                name: "Dana Smith".to_string(),
                email: "dana@example.com".to_string(),
                phone: "+15551230000".to_string(),
                resume_url: Some("memory://a/resume.md".to_string()),
                cover_letter_url: Some("memory://a/cover.md".to_string()),
                experience_years: Some(9),
                ..Default::default()
            },
            credentials: None,
            custom_answers: None,
            ai_instructions: None,
            resume_from: None,
        }
    }

    fn form_page(questions: Vec<&str>) -> PageView {
        PageView {
            kind: PageKind::ApplicationForm,
            url: "https://boards.example.com/acme/staff/apply".to_string(),
            title: "Apply - Staff Engineer".to_string(),
            fields: vec![
                FormField {
                    label: "Full Name".to_string(),
                    is_upload: false,
                },
                FormField {
                    label: "Email".to_string(),
                    is_upload: false,
                },
                FormField {
                    label: "Resume/CV".to_string(),
                    is_upload: true,
                },
            ],
            questions: questions.into_iter().map(str::to_owned).collect(),
            confirmation_text: None,
            has_password_field: false,
        }
    }

    fn confirmation_page() -> PageView {
        PageView {
            kind: PageKind::Confirmation,
            url: "https://boards.example.com/acme/staff/done".to_string(),
            title: "Thanks".to_string(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: Some("Application received, ref XYZ".to_string()),
            has_password_field: false,
        }
    }

    async fn run(browser: &ScriptedBrowser, task: &JobApplicationTask) -> Result<Outcome> {
        let mut session = browser.session().await.unwrap();
        let artifacts = ArtifactStore::in_memory();
        run_task(task, &mut session, &artifacts, RunLimits::default()).await
    }

    #[tokio::test]
    async fn test_happy_path_fills_and_confirms() {
        let browser = ScriptedBrowser::new(vec![
            PageView::blank(PageKind::JobDescription, "https://a"),
            form_page(vec![]),
            confirmation_page(),
        ]);

        let outcome = run(&browser, &task()).await.unwrap();
        match outcome {
            Outcome::Applied { confirmation, .. } => {
                assert_eq!(confirmation, "Application received, ref XYZ");
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let actions = browser.actions();
        assert!(actions.contains(&RecordedAction::ClickApply));
        assert!(actions.contains(&RecordedAction::Fill {
            label: "Full Name".to_string(),
            value: "Dana Smith".to_string(),
        }));
        assert!(actions.contains(&RecordedAction::Upload {
            label: "Resume/CV".to_string(),
            file_url: "memory://a/resume.md".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_unanswerable_question_halts_for_approval() {
        let browser = ScriptedBrowser::new(vec![form_page(vec!["Expected salary?"])]);

        let outcome = run(&browser, &task()).await.unwrap();
        match outcome {
            Outcome::NeedsApproval {
                question,
                state_blob,
                form_fields,
                ..
            } => {
                assert_eq!(question, "Expected salary?");
                assert!(state_blob.starts_with("scripted-state-"));
                assert!(form_fields.contains(&"Full Name".to_string()));
            }
            other => panic!("expected NeedsApproval, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_custom_answer_resolves_question() {
        let browser = ScriptedBrowser::new(vec![
            form_page(vec!["Expected salary?"]),
            confirmation_page(),
        ]);

        let mut t = task();
        let mut answers = BTreeMap::new();
        answers.insert("Expected salary?".to_string(), "120k".to_string());
        t.custom_answers = Some(answers);

        let outcome = run(&browser, &t).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));
        assert!(browser.actions().contains(&RecordedAction::Answer {
            question: "Expected salary?".to_string(),
            answer: "120k".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_resume_from_restores_state() {
        let browser = ScriptedBrowser::new(vec![
            form_page(vec!["Expected salary?"]),
            confirmation_page(),
        ]);

        let mut t = task();
        t.resume_from = Some("scripted-state-0".to_string());
        let mut answers = BTreeMap::new();
        answers.insert("Expected salary?".to_string(), "120k".to_string());
        t.custom_answers = Some(answers);

        run(&browser, &t).await.unwrap();
        assert!(matches!(browser.actions()[0], RecordedAction::Restore(_)));
    }

    #[tokio::test]
    async fn test_login_without_credentials_needs_user_info() {
        let login = PageView {
            kind: PageKind::Login,
            url: "https://a/login".to_string(),
            title: "Sign in".to_string(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: None,
            has_password_field: true,
        };
        let browser = ScriptedBrowser::new(vec![login]);

        let outcome = run(&browser, &task()).await.unwrap();
        assert!(matches!(outcome, Outcome::NeedsUserInfo { .. }));
    }

    #[tokio::test]
    async fn test_login_with_credentials_proceeds() {
        let login = PageView {
            kind: PageKind::Login,
            url: "https://a/login".to_string(),
            title: "Sign in".to_string(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: None,
            has_password_field: true,
        };
        let browser = ScriptedBrowser::new(vec![login, form_page(vec![]), confirmation_page()]);

        let mut t = task();
        t.credentials = Some(Credentials {
            username: "dana".to_string(),
            password: "hunter2".to_string(),
        });

        let outcome = run(&browser, &t).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));
        assert!(browser.actions().contains(&RecordedAction::Login {
            username: "dana".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_transient_submit_recovers_within_attempts() {
        let browser = ScriptedBrowser::new(vec![form_page(vec![]), confirmation_page()]);
        browser.fail_submits(2);

        let outcome = run(&browser, &task()).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));
    }

    #[tokio::test]
    async fn test_persistent_failure_is_an_error() {
        let browser = ScriptedBrowser::new(vec![form_page(vec![])]);
        browser.fail_submits(10);

        let err = run(&browser, &task()).await.unwrap_err();
        assert!(err.0.contains("timed out"), "unexpected error: {}", err.0);
    }

    #[tokio::test]
    async fn test_step_budget_is_enforced() {
        // An endless chain of multi-step pages never confirms
        let pages: Vec<PageView> = (0..20).map(|_| form_page(vec![])).collect();
        let browser = ScriptedBrowser::new(pages);

        let err = run(&browser, &task()).await.unwrap_err();
        assert!(err.0.contains("budget"), "unexpected error: {}", err.0);
    }
}
