//! Approval lifecycle events.
//!
//! The workflow emits an event when a request is filed (addressed to the
//! desired approvers) and when a grant is recorded (addressed to the
//! requestor). Delivery is best-effort and never fails the operation that
//! produced the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Approval, ApprovalRequest, Grant, Validity};

pub mod webhook;

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalEvent {
    /// "approval_requested" or "approval_granted".
    pub event_type: String,
    pub timestamp: String,
    pub approval_id: Uuid,
    pub subject_kind: String,
    pub subject_id: String,
    pub requestor: String,
    /// Who caused the event: the requestor or the approver.
    pub actor: String,
    /// Identities the event is addressed to.
    pub recipients: Vec<String>,
    pub details: serde_json::Value,
}

impl ApprovalEvent {
    pub fn approval_requested(request: &ApprovalRequest) -> Self {
        Self {
            event_type: "approval_requested".to_string(),
            timestamp: request.created_at.to_rfc3339(),
            approval_id: request.id,
            subject_kind: request.subject.kind.as_str().to_string(),
            subject_id: request.subject.id.clone(),
            requestor: request.requestor.to_string(),
            actor: request.requestor.to_string(),
            recipients: request
                .desired_approvers
                .iter()
                .map(|i| i.to_string())
                .collect(),
            details: serde_json::json!({ "reason": request.reason }),
        }
    }

    pub fn approval_granted(
        approval: &Approval,
        grant: &Grant,
        validity: Validity,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let request = &approval.request;
        Self {
            event_type: "approval_granted".to_string(),
            timestamp: grant.granted_at.to_rfc3339(),
            approval_id: request.id,
            subject_kind: request.subject.kind.as_str().to_string(),
            subject_id: request.subject.id.clone(),
            requestor: request.requestor.to_string(),
            actor: grant.approver.to_string(),
            recipients: vec![request.requestor.to_string()],
            details: serde_json::json!({
                "grant_count": approval.grants.len(),
                "validity": validity.as_str(),
                "expires_at": expires_at.map(|t| t.to_rfc3339()),
                "justification": grant.justification,
            }),
        }
    }
}

#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, event: ApprovalEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, Subject};
    use chrono::TimeZone;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            subject: Subject::scheduled_job("CronJobFoo").unwrap(),
            requestor: Identity::new("u1").unwrap(),
            reason: "investigation".into(),
            desired_approvers: [Identity::new("approver").unwrap()].into_iter().collect(),
            created_at: Utc.timestamp_opt(42, 0).unwrap(),
        }
    }

    #[test]
    fn test_requested_event_targets_desired_approvers() {
        let event = ApprovalEvent::approval_requested(&request());
        assert_eq!(event.event_type, "approval_requested");
        assert_eq!(event.subject_kind, "scheduled_job");
        assert_eq!(event.recipients, vec!["approver".to_string()]);
        assert_eq!(event.details["reason"], "investigation");
    }

    #[test]
    fn test_granted_event_targets_requestor() {
        let mut approval = Approval::new(request());
        let grant = Grant {
            approval_id: approval.id(),
            approver: Identity::new("approver").unwrap(),
            justification: Some("ok".into()),
            granted_at: Utc.timestamp_opt(84, 0).unwrap(),
        };
        approval.grants.push(grant.clone());

        let event = ApprovalEvent::approval_granted(&approval, &grant, Validity::Valid, None);
        assert_eq!(event.actor, "approver");
        assert_eq!(event.recipients, vec!["u1".to_string()]);
        assert_eq!(event.details["grant_count"], 1);
        assert_eq!(event.details["validity"], "valid");
    }
}
