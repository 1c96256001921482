//! Queue message schemas for the application pipeline.
//!
//! Every broker payload is UTF-8 JSON. Consumers ignore unknown fields so
//! payloads stay forward-compatible; optional fields are omitted when absent.
//! The queue name doubles as the payload tag, so a task envelope looks like:
//!
//! ```json
//! {
//!   "id": "0192d5a8-7c3e-7b52-a1f0-3c9b8e2d4f01",
//!   "retries": 0,
//!   "priority": 0,
//!   "created_at": "2026-07-30T15:04:05Z",
//!   "type": "job_application",
//!   "payload": {
//!     "job_id": 42,
//!     "job_url": "https://boards.example.com/acme/staff-engineer",
//!     "company": "Acme",
//!     "title": "Staff Engineer",
//!     "application_id": 7,
//!     "user_data": {
//!       "name": "Dana Smith",
//!       "email": "dana@example.com",
//!       "phone": "+15551230000",
//!       "resume_url": "memory://artifacts/applications/7/resume.pdf",
//!       "skills": ["rust", "distributed systems"]
//!     },
//!     "custom_answers": { "Expected salary?": "120k" }
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque broker task identifier
pub type TaskId = String;

/// The closed set of queue names. Publishing to anything else is
/// unrepresentable; decoding an unknown name off the wire is a broker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    JobApplication,
    UpdateJobStatus,
    ApprovalRequest,
    SendNotification,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::JobApplication,
        QueueName::UpdateJobStatus,
        QueueName::ApprovalRequest,
        QueueName::SendNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::JobApplication => "job_application",
            QueueName::UpdateJobStatus => "update_job_status",
            QueueName::ApprovalRequest => "approval_request",
            QueueName::SendNotification => "send_notification",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_application" => Ok(QueueName::JobApplication),
            "update_job_status" => Ok(QueueName::UpdateJobStatus),
            "approval_request" => Ok(QueueName::ApprovalRequest),
            "send_notification" => Ok(QueueName::SendNotification),
            other => Err(format!("unknown queue name: {other}")),
        }
    }
}

/// Tagged task payload; the tag is the queue name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    JobApplication(JobApplicationTask),
    UpdateJobStatus(UpdateJobStatus),
    ApprovalRequest(ApprovalRequest),
    SendNotification(SendNotification),
}

impl TaskPayload {
    pub fn queue(&self) -> QueueName {
        match self {
            TaskPayload::JobApplication(_) => QueueName::JobApplication,
            TaskPayload::UpdateJobStatus(_) => QueueName::UpdateJobStatus,
            TaskPayload::ApprovalRequest(_) => QueueName::ApprovalRequest,
            TaskPayload::SendNotification(_) => QueueName::SendNotification,
        }
    }
}

/// One broker message: envelope plus typed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: TaskId,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Retention horizon; consumers drop tasks past this instant instead of
    /// running them with stale credentials
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl QueueTask {
    pub fn queue(&self) -> QueueName {
        self.payload.queue()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// `job_application` payload: everything the automation worker needs to fill
/// one posting, credentials included (plaintext, bounded broker retention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct JobApplicationTask {
    pub job_id: u64,
    pub job_url: String,
    pub company: String,
    pub title: String,
    pub application_id: u64,
    pub user_data: UserData,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub credentials: Option<Credentials>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub custom_answers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ai_instructions: Option<AiInstructions>,
    /// Serialized page state from a paused run; opaque to the dispatcher
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resume_from: Option<String>,
}

/// Applicant identity and answers sourced from the profile and preferences
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, bon::Builder)]
pub struct UserData {
    #[builder(into)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
    #[builder(into)]
    pub email: String,
    #[builder(into)]
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resume_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover_letter_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub portfolio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub experience_years: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub education: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preferred_work_arrangement: Option<WorkArrangement>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub availability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub salary_expectation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headline: Option<String>,
}

impl UserData {
    /// First name, from the explicit field or a split of the full name
    pub fn first(&self) -> Option<String> {
        self.first_name
            .clone()
            .or_else(|| self.name.split_whitespace().next().map(str::to_owned))
    }

    /// Last name, from the explicit field or a split of the full name
    pub fn last(&self) -> Option<String> {
        self.last_name
            .clone()
            .or_else(|| self.name.split_whitespace().last().map(str::to_owned))
            .filter(|last| Some(last.as_str()) != self.first().as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkArrangement {
    Remote,
    Hybrid,
    Onsite,
}

/// Site login material; never leaves the `job_application` queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AiInstructions {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub focus_areas: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avoid_topics: Option<Vec<String>>,
}

/// `update_job_status` payload: a worker's terminal outcome for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateJobStatus {
    pub job_id: u64,
    pub application_id: u64,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Applied,
    Failed,
    WaitingApproval,
    NeedsUserInfo,
}

/// `approval_request` payload: a question the worker could not resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub job_id: u64,
    pub application_id: u64,
    pub question: String,
    /// Serialized page state, opaque to everything but the worker
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<ApprovalPageContext>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApprovalPageContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub form_fields: Option<Vec<String>>,
}

/// `send_notification` payload: a user-facing SMS produced by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendNotification {
    pub profile_id: u64,
    pub to: String,
    pub body: String,
}

/// Worker liveness record, published every 30 s under `heartbeat:<service>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub status: HeartbeatStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub in_flight_task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Idle,
    Busy,
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> QueueTask {
        QueueTask {
            id: "t1".to_string(),
            retries: 0,
            priority: 0,
            created_at: Utc::now(),
            expires_at: None,
            payload: TaskPayload::UpdateJobStatus(UpdateJobStatus {
                job_id: 42,
                application_id: 7,
                status: WorkerStatus::Applied,
                notes: Some("ref XYZ".to_string()),
                error_message: None,
                screenshot_url: None,
                submitted_at: Some(Utc::now()),
            }),
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let task = sample_task();
        let wire = serde_json::to_string(&task).unwrap();
        let back: QueueTask = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.queue(), QueueName::UpdateJobStatus);
    }

    #[test]
    fn test_tag_matches_queue_name() {
        let wire = serde_json::to_value(&sample_task()).unwrap();
        assert_eq!(wire["type"], "update_job_status");
        assert_eq!(wire["payload"]["application_id"], 7);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let wire = json!({
            "job_id": 42,
            "application_id": 7,
            "status": "failed",
            "error_message": "form submit timed out",
            "added_in_v2": { "nested": true }
        });
        let msg: UpdateJobStatus = serde_json::from_value(wire).unwrap();
        assert_eq!(msg.status, WorkerStatus::Failed);
        assert_eq!(msg.error_message.as_deref(), Some("form submit timed out"));
    }

    #[test]
    fn test_absent_options_are_omitted() {
        let user = UserData::builder()
            .name("Dana Smith")
            .email("dana@example.com")
            .phone("+15551230000")
            .build();
        let wire = serde_json::to_value(&user).unwrap();
        assert!(wire.get("linkedin_url").is_none());
        assert!(wire.get("salary_expectation").is_none());
    }

    #[test]
    fn test_name_splitting() {
        let user = UserData::builder()
            .name("Dana Q Smith")
            .email("d@example.com")
            .phone("+1555")
            .build();
        assert_eq!(user.first().as_deref(), Some("Dana"));
        assert_eq!(user.last().as_deref(), Some("Smith"));

        let mononym = UserData::builder()
            .name("Dana")
            .email("d@example.com")
            .phone("+1555")
            .build();
        assert_eq!(mononym.first().as_deref(), Some("Dana"));
        assert_eq!(mononym.last(), None);
    }

    #[test]
    fn test_queue_name_parse() {
        assert_eq!(
            "job_application".parse::<QueueName>().unwrap(),
            QueueName::JobApplication
        );
        assert!("priority_mail".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_work_arrangement_wire_form() {
        let wire = serde_json::to_value(WorkArrangement::Remote).unwrap();
        assert_eq!(wire, "remote");
    }

    #[test]
    fn test_expiry() {
        let mut task = sample_task();
        assert!(!task.is_expired(Utc::now()));
        task.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(task.is_expired(Utc::now()));
    }
}
