//! Opaque LLM seam: role scoring, document drafting, posting extraction
//!
//! The orchestration core never sees prompts or model output beyond these
//! structured results. [`HttpDocumentEngine`] talks to a drafting sidecar;
//! [`StaticEngine`] produces deterministic results for tests and offline
//! development.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::messages::AiInstructions;
use crate::store::{Profile, Role};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    RequestFailed(String),

    #[error("engine returned malformed output: {0}")]
    MalformedOutput(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleScore {
    pub score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftedDocuments {
    pub resume_markdown: String,
    pub cover_letter_markdown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPosting {
    pub company: String,
    pub title: String,
    pub description: String,
}

/// Structured calls the dispatcher makes against the LLM collaborator
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Score a role against a profile, in [0.0, 1.0]
    async fn score_role(&self, profile: &Profile, role: &Role) -> Result<RoleScore>;

    /// Draft tailored application documents
    async fn draft_documents(
        &self,
        profile: &Profile,
        preferences: &BTreeMap<String, String>,
        role: &Role,
        instructions: Option<&AiInstructions>,
    ) -> Result<DraftedDocuments>;

    /// Pull company/title/description out of a posting page
    async fn extract_posting(&self, url: &str, html: &str) -> Result<ScrapedPosting>;
}

/// HTTP implementation against a drafting sidecar
pub struct HttpDocumentEngine {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct EngineRequest<'a, T: Serialize> {
    model: &'a str,
    operation: &'static str,
    input: T,
}

impl HttpDocumentEngine {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }

    async fn call<I: Serialize, O: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        input: I,
    ) -> Result<O> {
        let mut request = self.client.post(&self.endpoint).json(&EngineRequest {
            model: &self.model,
            operation,
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::RequestFailed(format!(
                "HTTP {} from engine",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::MalformedOutput(e.to_string()))
    }
}

#[async_trait]
impl DocumentEngine for HttpDocumentEngine {
    async fn score_role(&self, profile: &Profile, role: &Role) -> Result<RoleScore> {
        let score: RoleScore = self
            .call(
                "score_role",
                serde_json::json!({
                    "headline": profile.headline,
                    "summary": profile.summary,
                    "company": role.company,
                    "title": role.title,
                    "description": role.description,
                }),
            )
            .await?;
        if !(0.0..=1.0).contains(&score.score) {
            return Err(EngineError::MalformedOutput(format!(
                "score out of range: {}",
                score.score
            )));
        }
        Ok(score)
    }

    async fn draft_documents(
        &self,
        profile: &Profile,
        preferences: &BTreeMap<String, String>,
        role: &Role,
        instructions: Option<&AiInstructions>,
    ) -> Result<DraftedDocuments> {
        self.call(
            "draft_documents",
            serde_json::json!({
                "profile": {
                    "full_name": profile.full_name,
                    "headline": profile.headline,
                    "summary": profile.summary,
                },
                "preferences": preferences,
                "company": role.company,
                "title": role.title,
                "description": role.description,
                "instructions": instructions,
            }),
        )
        .await
    }

    async fn extract_posting(&self, url: &str, html: &str) -> Result<ScrapedPosting> {
        self.call(
            "extract_posting",
            serde_json::json!({ "url": url, "html": html }),
        )
        .await
    }
}

/// Deterministic engine for tests and offline development
#[derive(Debug, Default, Clone)]
pub struct StaticEngine;

impl StaticEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentEngine for StaticEngine {
    async fn score_role(&self, profile: &Profile, role: &Role) -> Result<RoleScore> {
        // Crude lexical overlap between the headline and the posting text
        let description = role.description.to_lowercase();
        let words: Vec<&str> = profile
            .headline
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .collect();
        let hits = words
            .iter()
            .filter(|w| description.contains(&w.to_lowercase()))
            .count();
        let score = if words.is_empty() {
            0.5
        } else {
            (0.4 + 0.6 * hits as f64 / words.len() as f64).min(1.0)
        };
        Ok(RoleScore {
            score,
            rationale: format!("{hits} headline terms matched the posting"),
        })
    }

    async fn draft_documents(
        &self,
        profile: &Profile,
        _preferences: &BTreeMap<String, String>,
        role: &Role,
        _instructions: Option<&AiInstructions>,
    ) -> Result<DraftedDocuments> {
        Ok(DraftedDocuments {
            resume_markdown: format!(
                "# {}\n\n{}\n\n## Summary\n\n{}\n",
                profile.full_name, profile.headline, profile.summary
            ),
            cover_letter_markdown: format!(
                "Dear {} team,\n\nI am applying for the {} position.\n\n{}\n",
                role.company, role.title, profile.summary
            ),
        })
    }

    async fn extract_posting(&self, url: &str, html: &str) -> Result<ScrapedPosting> {
        let title = extract_tag(html, "title").unwrap_or_else(|| "Unknown Role".to_string());
        let company = host_of(url).unwrap_or_else(|| "Unknown Company".to_string());
        Ok(ScrapedPosting {
            company,
            title,
            description: html_to_text(html),
        })
    }
}

fn extract_tag(html: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let lower = html.to_lowercase();
    let start = lower.find(&open)? + open.len();
    let end = lower[start..].find(&close)? + start;
    let text = html[start..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed.host_str().map(|host| {
        host.trim_start_matches("www.")
            .split('.')
            .next()
            .unwrap_or(host)
            .to_string()
    })
}

fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
