//! Domain entities persisted by the application store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::messages::TaskId;

/// One user of the system; owns preferences and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub full_name: String,
    pub email: String,
    /// SMS identity; inbound messages resolve to a profile through this
    pub phone: String,
    pub headline: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or updating a profile
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileInput {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub headline: String,
    pub summary: String,
}

/// Site login for one profile. The password field holds authenticated
/// ciphertext; no query API ever returns it decrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub profile_id: u64,
    pub site_hostname: String,
    pub username: String,
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A company, deduplicated by normalized name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A job posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: u64,
    pub company: String,
    pub title: String,
    pub description: String,
    pub posting_url: String,
    pub unique_hash: String,
    pub status: RoleStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank_rationale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleInput {
    pub company: String,
    pub title: String,
    pub description: String,
    pub posting_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Sourced,
    Ranked,
    Applying,
    Applied,
    Ignored,
}

impl fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleStatus::Sourced => "sourced",
            RoleStatus::Ranked => "ranked",
            RoleStatus::Applying => "applying",
            RoleStatus::Applied => "applied",
            RoleStatus::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// Dedup hash for a posting: SHA-256 of `lower(trim(company))-lower(trim(title))`
pub fn role_unique_hash(company: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(company.trim().to_lowercase().as_bytes());
    hasher.update(b"-");
    hasher.update(title.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// One attempt of one profile against one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: u64,
    pub profile_id: u64,
    pub role_id: u64,
    pub status: ApplicationStatus,
    /// Fresh submission attempts consumed against the dispatcher budget
    #[serde(default)]
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub queue_task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resume_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover_letter_url: Option<String>,
    #[serde(default)]
    pub custom_answers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approval_context: Option<ApprovalContext>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    ReadyToSubmit,
    Submitting,
    Submitted,
    WaitingApproval,
    NeedsUserInfo,
    Error,
    Interview,
    Offer,
    Rejected,
    Closed,
}

impl ApplicationStatus {
    /// Non-terminal states; at most one application per (profile, role) may
    /// be in one of these
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Draft
                | ApplicationStatus::ReadyToSubmit
                | ApplicationStatus::Submitting
                | ApplicationStatus::WaitingApproval
                | ApplicationStatus::NeedsUserInfo
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::ReadyToSubmit => "ready_to_submit",
            ApplicationStatus::Submitting => "submitting",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::WaitingApproval => "waiting_approval",
            ApplicationStatus::NeedsUserInfo => "needs_user_info",
            ApplicationStatus::Error => "error",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a paused worker run, sufficient to resume without re-scraping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_url: Option<String>,
    /// Opaque to the dispatcher; handed back verbatim as `resume_from`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot_url: Option<String>,
    pub asked_at: DateTime<Utc>,
}

/// A rejected queue message, kept for operator inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub source: String,
    pub reason: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// An inbound SMS that matched no open approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub recorded_at: DateTime<Utc>,
}
