//! Browser automation contract
//!
//! Only the orchestrator-to-browser contract lives here; the actual page
//! driving happens in an automation sidecar. [`HttpBrowser`] speaks to that
//! sidecar over HTTP, [`ScriptedBrowser`] replays a canned page sequence for
//! tests and offline development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    /// Network blips and slow pages; worth retrying
    #[error("transient browser error: {0}")]
    Transient(String),

    /// The sidecar rejected the command outright
    #[error("browser command failed: {0}")]
    CommandFailed(String),

    #[error("browser session exhausted its script")]
    ScriptExhausted,
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// What the analyzer decided the current page is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    JobDescription,
    ApplicationForm,
    Login,
    MultiStep,
    Confirmation,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub label: String,
    #[serde(default)]
    pub is_upload: bool,
}

/// One analyzed page: classification plus everything fillable on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub kind: PageKind,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confirmation_text: Option<String>,
    /// Screenshots are suppressed while this is set (credential hygiene)
    #[serde(default)]
    pub has_password_field: bool,
}

impl PageView {
    pub fn blank(kind: PageKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
            title: String::new(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: None,
            has_password_field: false,
        }
    }
}

/// One live browser conversation with a posting site
#[async_trait]
pub trait BrowserSession: Send {
    async fn open(&mut self, url: &str) -> Result<PageView>;

    /// Rehydrate a paused run from an opaque state blob
    async fn restore(&mut self, state_blob: &str) -> Result<PageView>;

    /// Re-analyze the current page without acting on it
    async fn analyze(&mut self) -> Result<PageView>;

    async fn click_apply(&mut self) -> Result<PageView>;

    async fn login(&mut self, username: &str, password: &str) -> Result<PageView>;

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<()>;

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<()>;

    async fn answer_question(&mut self, question: &str, answer: &str) -> Result<()>;

    /// Click next/submit and analyze whatever comes back
    async fn submit_step(&mut self) -> Result<PageView>;

    /// Serialize enough state to resume this page later
    async fn page_state(&mut self) -> Result<String>;

    /// PNG screenshot, or None when the page holds a password field
    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>>;

    async fn close(&mut self) -> Result<()>;
}

/// Hands out sessions; one per consumed task
#[async_trait]
pub trait Browser: Send + Sync {
    async fn session(&self) -> Result<Box<dyn BrowserSession>>;
}

// ---- HTTP sidecar implementation -------------------------------------------

#[derive(Serialize)]
struct Command<'a> {
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arg: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
}

/// Client for the browser-automation sidecar
pub struct HttpBrowser {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBrowser {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrowserError::CommandFailed(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn session(&self) -> Result<Box<dyn BrowserSession>> {
        let response = self
            .client
            .post(format!("{}/sessions", self.endpoint))
            .send()
            .await
            .map_err(transient)?;
        let created: SessionCreated = response.json().await.map_err(transient)?;
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            session_id: created.session_id,
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl HttpSession {
    async fn command<T: serde::de::DeserializeOwned>(
        &self,
        op: &'static str,
        arg: Option<&str>,
        value: Option<&str>,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!(
                "{}/sessions/{}/command",
                self.endpoint, self.session_id
            ))
            .json(&Command { op, arg, value })
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(BrowserError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(BrowserError::CommandFailed(format!(
                "HTTP {} for {op}",
                status.as_u16()
            )));
        }
        response.json().await.map_err(transient)
    }
}

fn transient(err: reqwest::Error) -> BrowserError {
    BrowserError::Transient(err.to_string())
}

#[derive(Deserialize)]
struct Ack {}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn open(&mut self, url: &str) -> Result<PageView> {
        self.command("open", Some(url), None).await
    }

    async fn restore(&mut self, state_blob: &str) -> Result<PageView> {
        self.command("restore", Some(state_blob), None).await
    }

    async fn analyze(&mut self) -> Result<PageView> {
        self.command("analyze", None, None).await
    }

    async fn click_apply(&mut self) -> Result<PageView> {
        self.command("click_apply", None, None).await
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<PageView> {
        self.command("login", Some(username), Some(password)).await
    }

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<()> {
        self.command::<Ack>("fill", Some(label), Some(value)).await?;
        Ok(())
    }

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<()> {
        self.command::<Ack>("upload", Some(label), Some(file_url))
            .await?;
        Ok(())
    }

    async fn answer_question(&mut self, question: &str, answer: &str) -> Result<()> {
        self.command::<Ack>("answer", Some(question), Some(answer))
            .await?;
        Ok(())
    }

    async fn submit_step(&mut self) -> Result<PageView> {
        self.command("submit", None, None).await
    }

    async fn page_state(&mut self) -> Result<String> {
        #[derive(Deserialize)]
        struct State {
            state: String,
        }
        let state: State = self.command("state", None, None).await?;
        Ok(state.state)
    }

    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        #[derive(Deserialize)]
        struct Shot {
            png_base64: Option<String>,
        }
        let shot: Shot = self.command("screenshot", None, None).await?;
        match shot.png_base64 {
            Some(encoded) => {
                use base64::Engine;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| BrowserError::CommandFailed(e.to_string()))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self
            .client
            .delete(format!("{}/sessions/{}", self.endpoint, self.session_id))
            .send()
            .await;
        Ok(())
    }
}

// ---- scripted implementation ------------------------------------------------

/// Everything a scripted session recorded, for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    Open(String),
    Restore(String),
    ClickApply,
    Login { username: String },
    Fill { label: String, value: String },
    Upload { label: String, file_url: String },
    Answer { question: String, answer: String },
    Submit,
    Close,
}

#[derive(Default)]
struct ScriptState {
    pages: Mutex<VecDeque<PageView>>,
    actions: Mutex<Vec<RecordedAction>>,
    failing_submits: AtomicU32,
    state_counter: AtomicU32,
}

/// Replays a canned sequence of page views; every navigation pops the next
/// page. Shared across sessions so retried tasks continue the same script.
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    state: Arc<ScriptState>,
}

impl ScriptedBrowser {
    pub fn new(pages: Vec<PageView>) -> Self {
        let browser = Self::default();
        browser.extend_script(pages);
        browser
    }

    pub fn extend_script(&self, pages: Vec<PageView>) {
        if let Ok(mut queue) = self.state.pages.lock() {
            queue.extend(pages);
        }
    }

    /// Make the next `n` submit steps fail transiently
    pub fn fail_submits(&self, n: u32) {
        self.state.failing_submits.store(n, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.state
            .actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    fn record(&self, action: RecordedAction) {
        if let Ok(mut actions) = self.state.actions.lock() {
            actions.push(action);
        }
    }

    fn next_page(&self) -> Result<PageView> {
        self.state
            .pages
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .ok_or(BrowserError::ScriptExhausted)
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn session(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn open(&mut self, url: &str) -> Result<PageView> {
        self.record(RecordedAction::Open(url.to_string()));
        self.next_page()
    }

    async fn restore(&mut self, state_blob: &str) -> Result<PageView> {
        self.record(RecordedAction::Restore(state_blob.to_string()));
        self.next_page()
    }

    async fn analyze(&mut self) -> Result<PageView> {
        self.next_page()
    }

    async fn click_apply(&mut self) -> Result<PageView> {
        self.record(RecordedAction::ClickApply);
        self.next_page()
    }

    async fn login(&mut self, username: &str, _password: &str) -> Result<PageView> {
        // The password is deliberately not recorded anywhere
        self.record(RecordedAction::Login {
            username: username.to_string(),
        });
        self.next_page()
    }

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<()> {
        self.record(RecordedAction::Fill {
            label: label.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<()> {
        self.record(RecordedAction::Upload {
            label: label.to_string(),
            file_url: file_url.to_string(),
        });
        Ok(())
    }

    async fn answer_question(&mut self, question: &str, answer: &str) -> Result<()> {
        self.record(RecordedAction::Answer {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        Ok(())
    }

    async fn submit_step(&mut self) -> Result<PageView> {
        self.record(RecordedAction::Submit);
        let failing = self.state.failing_submits.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_submits.store(failing - 1, Ordering::SeqCst);
            return Err(BrowserError::Transient("form submit timed out".to_string()));
        }
        self.next_page()
    }

    async fn page_state(&mut self) -> Result<String> {
        let n = self.state.state_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("scripted-state-{n}"))
    }

    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(vec![0x89, b'P', b'N', b'G']))
    }

    async fn close(&mut self) -> Result<()> {
        self.record(RecordedAction::Close);
        Ok(())
    }
}
