//! Status state machine for applications.
//!
//! Only three public edges exist, all leaving `pending`. The way back to `pending` from
//! `rejected` or `withdrawn` is a resubmission handled by the service, never a direct request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationRecord, ApplicationStatus, UserId};
use super::error::QueueError;

/// Party a transition guard admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    ListingOwner,
    Applicant,
}

/// One permitted edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub actor: TransitionActor,
}

impl TransitionRule {
    /// Owner decisions stamp `reviewed_at` and `review_notes`.
    pub const fn records_review(&self) -> bool {
        matches!(self.actor, TransitionActor::ListingOwner)
    }

    const fn action(&self) -> &'static str {
        match self.to {
            ApplicationStatus::Accepted => "accept this application",
            ApplicationStatus::Rejected => "reject this application",
            ApplicationStatus::Withdrawn => "withdraw this application",
            ApplicationStatus::Pending => "reopen this application",
        }
    }
}

pub static TRANSITIONS: [TransitionRule; 3] = [
    TransitionRule {
        from: ApplicationStatus::Pending,
        to: ApplicationStatus::Accepted,
        actor: TransitionActor::ListingOwner,
    },
    TransitionRule {
        from: ApplicationStatus::Pending,
        to: ApplicationStatus::Rejected,
        actor: TransitionActor::ListingOwner,
    },
    TransitionRule {
        from: ApplicationStatus::Pending,
        to: ApplicationStatus::Withdrawn,
        actor: TransitionActor::Applicant,
    },
];

/// Rule for reaching `to`, if a public one exists.
pub fn rule_for(to: ApplicationStatus) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|rule| rule.to == to)
}

/// Requested status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: ApplicationStatus,
    #[serde(default)]
    pub review_notes: Option<String>,
}

impl TransitionRequest {
    pub fn new(status: ApplicationStatus) -> Self {
        Self {
            status,
            review_notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.review_notes = Some(notes.into());
        self
    }
}

/// Check identity first, then the source state. Nothing is written here.
pub fn authorize(
    record: &ApplicationRecord,
    owner: &UserId,
    actor: &UserId,
    to: ApplicationStatus,
) -> Result<&'static TransitionRule, QueueError> {
    let is_owner = actor == owner;
    let is_applicant = *actor == record.applicant_id;

    let Some(rule) = rule_for(to) else {
        if !is_owner && !is_applicant {
            return Err(QueueError::Unauthorized {
                actor: actor.clone(),
                action: "change this application",
            });
        }
        return Err(QueueError::InvalidStatusTransition {
            from: record.status,
            to,
        });
    };

    let permitted = match rule.actor {
        TransitionActor::ListingOwner => is_owner,
        TransitionActor::Applicant => is_applicant,
    };
    if !permitted {
        return Err(QueueError::Unauthorized {
            actor: actor.clone(),
            action: rule.action(),
        });
    }

    if record.status != rule.from {
        return Err(QueueError::InvalidStatusTransition {
            from: record.status,
            to,
        });
    }

    Ok(rule)
}

/// Apply an authorized rule to the in-memory record.
pub fn apply(
    record: &mut ApplicationRecord,
    rule: &TransitionRule,
    review_notes: Option<String>,
    now: DateTime<Utc>,
) {
    record.status = rule.to;
    if rule.records_review() {
        record.reviewed_at = Some(now);
        record.review_notes = review_notes;
    }
}
