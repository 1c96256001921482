//! Custom-question policy
//!
//! For each question on a form: a user-provided answer wins, then anything
//! deterministically answerable from profile data, and everything else halts
//! the run for human approval.

use std::collections::BTreeMap;
use tracing::debug;

use crate::messages::{UserData, WorkArrangement};

#[derive(Debug, Clone, PartialEq)]
pub enum QuestionAnswer {
    /// Came from `custom_answers` (a prior approval reply)
    Provided(String),
    /// Derived from profile data
    Deterministic { answer: String, confidence: f64 },
    /// Nothing to go on; suspend and ask the user
    NeedsApproval,
}

pub fn answer_question(
    question: &str,
    custom_answers: Option<&BTreeMap<String, String>>,
    user: &UserData,
) -> QuestionAnswer {
    if let Some(answer) = custom_answers.and_then(|answers| answers.get(question)) {
        return QuestionAnswer::Provided(answer.clone());
    }

    let q = question.to_lowercase();
    let has = |needle: &str| q.contains(needle);

    let derived = if has("years of experience") || has("experience") {
        user.experience_years
            .map(|years| (years.to_string(), 0.9))
    } else if has("salary") || has("compensation") {
        user.salary_expectation
            .clone()
            .map(|salary| (salary, 0.9))
    } else if has("start date") || has("availability") || has("when can you start") {
        user.availability.clone().map(|avail| (avail, 0.85))
    } else if has("remote") || has("on-site") || has("onsite") || has("work arrangement") {
        user.preferred_work_arrangement.map(|arrangement| {
            let answer = match arrangement {
                WorkArrangement::Remote => "Remote",
                WorkArrangement::Hybrid => "Hybrid",
                WorkArrangement::Onsite => "On-site",
            };
            (answer.to_string(), 0.7)
        })
    } else if has("linkedin") {
        user.linkedin_url.clone().map(|url| (url, 0.9))
    } else if has("portfolio") || has("website") {
        user.portfolio_url
            .clone()
            .or_else(|| user.website.clone())
            .map(|url| (url, 0.85))
    } else {
        None
    };

    match derived {
        Some((answer, confidence)) => {
            debug!(question, confidence, "Answered question from profile data");
            QuestionAnswer::Deterministic { answer, confidence }
        }
        None => QuestionAnswer::NeedsApproval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserData {
        UserData {
            name: "Dana".to_string(),
            email: "d@example.com".to_string(),
            phone: "+1555".to_string(),
            experience_years: Some(9),
            salary_expectation: Some("150k".to_string()),
            availability: Some("Two weeks notice".to_string()),
            preferred_work_arrangement: Some(WorkArrangement::Remote),
            ..Default::default()
        }
    }

    #[test]
    fn test_custom_answer_wins() {
        let mut custom = BTreeMap::new();
        custom.insert("Expected salary?".to_string(), "120k".to_string());

        let answer = answer_question("Expected salary?", Some(&custom), &user());
        assert_eq!(answer, QuestionAnswer::Provided("120k".to_string()));
    }

    #[test]
    fn test_deterministic_answers() {
        let user = user();
        assert_eq!(
            answer_question("How many years of experience do you have?", None, &user),
            QuestionAnswer::Deterministic {
                answer: "9".to_string(),
                confidence: 0.9
            }
        );
        assert_eq!(
            answer_question("Expected salary?", None, &user),
            QuestionAnswer::Deterministic {
                answer: "150k".to_string(),
                confidence: 0.9
            }
        );
        assert_eq!(
            answer_question("Are you open to remote work?", None, &user),
            QuestionAnswer::Deterministic {
                answer: "Remote".to_string(),
                confidence: 0.7
            }
        );
    }

    #[test]
    fn test_unanswerable_needs_approval() {
        assert_eq!(
            answer_question("Do you require visa sponsorship?", None, &user()),
            QuestionAnswer::NeedsApproval
        );
        assert_eq!(
            answer_question("Why do you want to work here?", None, &user()),
            QuestionAnswer::NeedsApproval
        );
    }

    #[test]
    fn test_missing_profile_data_needs_approval() {
        let sparse = UserData {
            name: "Dana".to_string(),
            email: "d@example.com".to_string(),
            phone: "+1555".to_string(),
            ..Default::default()
        };
        assert_eq!(
            answer_question("Expected salary?", None, &sparse),
            QuestionAnswer::NeedsApproval
        );
    }
}
