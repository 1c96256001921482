//! Application state machine
//!
//! Every status change flows through [`next`]; handlers never assign a status
//! directly. The table mirrors the lifecycle:
//!
//! ```text
//! DRAFT → READY_TO_SUBMIT → SUBMITTING ──┬──→ SUBMITTED (terminal)
//!               ▲                        ├──→ WAITING_APPROVAL ── resume ──┐
//!               │                        ├──→ NEEDS_USER_INFO             │
//!               │                        └──→ ERROR                       │
//!               └──────────────────────────────────────────────────────────┘
//! SUBMITTED → INTERVIEW → OFFER → CLOSED
//! SUBMITTED → REJECTED → CLOSED
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::entities::{ApplicationStatus, ApprovalContext, RoleStatus};
use crate::messages::TaskId;

/// Something that happened to an application
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Résumé and cover letter URLs are populated
    DocumentsReady {
        resume_url: String,
        cover_letter_url: String,
    },
    /// A `job_application` task went onto the broker
    TaskPublished { task_id: TaskId },
    /// Worker reported `applied`
    WorkerApplied {
        submitted_at: DateTime<Utc>,
        notes: Option<String>,
        screenshot_url: Option<String>,
    },
    /// Worker reported terminal `failed`, or the dispatcher budget ran out
    WorkerFailed { error: String },
    /// Worker paused on a question it could not answer
    WorkerNeedsApproval { context: Option<ApprovalContext> },
    /// Worker needs profile data that does not exist yet
    WorkerNeedsUserInfo,
    /// Maintenance found the in-flight task orphaned
    WorkerLost,
    /// Operator or budgeted retry restarts a failed attempt
    RetryRequested,
    /// User-driven post-terminal progress
    Advanced { to: ApplicationStatus },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::DocumentsReady { .. } => "documents_ready",
            Event::TaskPublished { .. } => "task_published",
            Event::WorkerApplied { .. } => "worker_applied",
            Event::WorkerFailed { .. } => "worker_failed",
            Event::WorkerNeedsApproval { .. } => "worker_needs_approval",
            Event::WorkerNeedsUserInfo => "worker_needs_user_info",
            Event::WorkerLost => "worker_lost",
            Event::RetryRequested => "retry_requested",
            Event::Advanced { .. } => "advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("illegal transition: {from} cannot accept {event}")]
pub struct IllegalTransition {
    pub from: ApplicationStatus,
    pub event: &'static str,
}

/// The transition function: `(state, event) -> state`
pub fn next(from: ApplicationStatus, event: &Event) -> Result<ApplicationStatus, IllegalTransition> {
    use ApplicationStatus::*;

    let to = match (from, event) {
        (Draft, Event::DocumentsReady { .. }) => ReadyToSubmit,
        // Refreshing documents on an already-prepared application is a no-op
        // transition, not an error
        (ReadyToSubmit, Event::DocumentsReady { .. }) => ReadyToSubmit,
        (NeedsUserInfo, Event::DocumentsReady { .. }) => ReadyToSubmit,

        (ReadyToSubmit, Event::TaskPublished { .. }) => Submitting,
        // Approval resume and budgeted republish both land back in SUBMITTING
        (WaitingApproval, Event::TaskPublished { .. }) => Submitting,
        (Submitting, Event::TaskPublished { .. }) => Submitting,

        (Submitting, Event::WorkerApplied { .. }) => Submitted,
        (Submitting, Event::WorkerFailed { .. }) => Error,
        (Submitting, Event::WorkerNeedsApproval { .. }) => WaitingApproval,
        (Submitting, Event::WorkerNeedsUserInfo) => NeedsUserInfo,
        (Submitting, Event::WorkerLost) => Error,

        (Error, Event::RetryRequested) => ReadyToSubmit,
        (NeedsUserInfo, Event::RetryRequested) => ReadyToSubmit,

        (Submitted, Event::Advanced { to: Interview }) => Interview,
        (Submitted, Event::Advanced { to: Rejected }) => Rejected,
        (Interview, Event::Advanced { to: Offer }) => Offer,
        (Interview, Event::Advanced { to: Rejected }) => Rejected,
        (Offer, Event::Advanced { to: Closed }) => Closed,
        (Rejected, Event::Advanced { to: Closed }) => Closed,

        _ => {
            return Err(IllegalTransition {
                from,
                event: event.name(),
            });
        }
    };

    Ok(to)
}

/// Role status ordering for the monotonic advance check
fn role_rank(status: RoleStatus) -> u8 {
    match status {
        RoleStatus::Sourced => 0,
        RoleStatus::Ranked => 1,
        RoleStatus::Applying => 2,
        RoleStatus::Applied => 3,
        RoleStatus::Ignored => 4,
    }
}

/// Role status advances monotonically left-to-right with two permitted
/// regressions: `ranked → sourced` on re-scrape and `applying → ranked` on a
/// terminal failure.
pub fn role_transition_allowed(from: RoleStatus, to: RoleStatus) -> bool {
    use RoleStatus::*;

    if from == to {
        return true;
    }
    match (from, to) {
        (Ranked, Sourced) => true,
        (Applying, Ranked) => true,
        (Applied, Ignored) => false,
        _ => role_rank(to) > role_rank(from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationStatus::*;

    fn published() -> Event {
        Event::TaskPublished {
            task_id: "t1".to_string(),
        }
    }

    fn applied() -> Event {
        Event::WorkerApplied {
            submitted_at: Utc::now(),
            notes: None,
            screenshot_url: None,
        }
    }

    fn docs_ready() -> Event {
        Event::DocumentsReady {
            resume_url: "memory://artifacts/1/resume.pdf".to_string(),
            cover_letter_url: "memory://artifacts/1/cover_letter.pdf".to_string(),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut status = Draft;
        for event in [&docs_ready(), &published(), &applied()] {
            status = next(status, event).unwrap();
        }
        assert_eq!(status, Submitted);
    }

    #[test]
    fn test_approval_loop() {
        let status = next(Submitting, &Event::WorkerNeedsApproval { context: None }).unwrap();
        assert_eq!(status, WaitingApproval);
        let status = next(status, &published()).unwrap();
        assert_eq!(status, Submitting);
    }

    #[test]
    fn test_failure_and_retry() {
        let status = next(
            Submitting,
            &Event::WorkerFailed {
                error: "form submit timed out".to_string(),
            },
        )
        .unwrap();
        assert_eq!(status, Error);
        assert_eq!(next(status, &Event::RetryRequested).unwrap(), ReadyToSubmit);
    }

    #[test]
    fn test_worker_lost_from_submitting_only() {
        assert_eq!(next(Submitting, &Event::WorkerLost).unwrap(), Error);
        assert!(next(Submitted, &Event::WorkerLost).is_err());
        assert!(next(WaitingApproval, &Event::WorkerLost).is_err());
    }

    #[test]
    fn test_terminal_states_reject_worker_events() {
        for terminal in [Submitted, Error, Closed] {
            let err = next(terminal, &applied()).unwrap_err();
            assert_eq!(err.from, terminal);
            assert_eq!(err.event, "worker_applied");
        }
    }

    #[test]
    fn test_republish_while_submitting_is_legal() {
        assert_eq!(next(Submitting, &published()).unwrap(), Submitting);
    }

    #[test]
    fn test_post_terminal_progression() {
        let status = next(Submitted, &Event::Advanced { to: Interview }).unwrap();
        let status = next(status, &Event::Advanced { to: Offer }).unwrap();
        assert_eq!(next(status, &Event::Advanced { to: Closed }).unwrap(), Closed);

        let status = next(Submitted, &Event::Advanced { to: Rejected }).unwrap();
        assert_eq!(next(status, &Event::Advanced { to: Closed }).unwrap(), Closed);

        assert!(next(Submitted, &Event::Advanced { to: Offer }).is_err());
    }

    #[test]
    fn test_role_transitions() {
        use RoleStatus::*;
        assert!(role_transition_allowed(Sourced, Ranked));
        assert!(role_transition_allowed(Ranked, Applying));
        assert!(role_transition_allowed(Applying, Applied));
        // Forward skips are monotonic advances
        assert!(role_transition_allowed(Sourced, Applying));
        // The two permitted regressions
        assert!(role_transition_allowed(Ranked, Sourced));
        assert!(role_transition_allowed(Applying, Ranked));
        // Everything else going backwards is rejected
        assert!(!role_transition_allowed(Applied, Sourced));
        assert!(!role_transition_allowed(Applied, Ignored));
        assert!(!role_transition_allowed(Ignored, Sourced));
    }
}
