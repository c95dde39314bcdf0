use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::Identity;
use super::subject::Subject;

/// An immutable request for access to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub subject: Subject,
    pub requestor: Identity,
    pub reason: String,
    /// Advisory only: who the requestor asked to review. Anyone other than
    /// the requestor may grant.
    pub desired_approvers: BTreeSet<Identity>,
    pub created_at: DateTime<Utc>,
}

/// A single approver's endorsement of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub approval_id: Uuid,
    pub approver: Identity,
    pub justification: Option<String>,
    pub granted_at: DateTime<Utc>,
}

/// A request together with every grant recorded against it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub request: ApprovalRequest,
    pub grants: Vec<Grant>,
}

impl Approval {
    pub fn new(request: ApprovalRequest) -> Self {
        Self {
            request,
            grants: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn has_grant_from(&self, approver: &Identity) -> bool {
        self.grants.iter().any(|g| &g.approver == approver)
    }

    /// Approvers in grant order.
    pub fn approvers(&self) -> Vec<&Identity> {
        self.grants.iter().map(|g| &g.approver).collect()
    }

    /// Number of distinct approvers other than the requestor.
    ///
    /// Stores already refuse duplicate and self grants; counting this way
    /// keeps validity correct even for records written by older code.
    pub fn effective_grant_count(&self) -> usize {
        self.grants
            .iter()
            .filter(|g| g.approver != self.request.requestor)
            .map(|g| &g.approver)
            .collect::<HashSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    /// Fewer grants than required.
    Pending,
    /// Threshold met and still inside the validity window.
    Valid,
    /// Threshold met but the validity window has elapsed.
    Expired,
}

impl Validity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Validity::Pending => "pending",
            Validity::Valid => "valid",
            Validity::Expired => "expired",
        }
    }
}

/// Process-wide approval rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    /// Distinct approvers (excluding the requestor) needed for access. Always >= 1.
    pub required_approvers: usize,
    /// How long access lasts, counted from the request's creation.
    pub validity_window: Duration,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            required_approvers: 1,
            validity_window: Duration::days(28),
        }
    }
}

impl ApprovalPolicy {
    pub fn new(required_approvers: usize, validity_window: Duration) -> Self {
        Self {
            required_approvers: required_approvers.max(1),
            validity_window,
        }
    }

    pub fn is_satisfied(&self, approval: &Approval) -> bool {
        approval.effective_grant_count() >= self.required_approvers
    }

    /// Defined only once the approval has collected enough grants.
    pub fn expires_at(&self, approval: &Approval) -> Option<DateTime<Utc>> {
        self.is_satisfied(approval)
            .then(|| approval.request.created_at + self.validity_window)
    }

    pub fn validity(&self, approval: &Approval, now: DateTime<Utc>) -> Validity {
        match self.expires_at(approval) {
            None => Validity::Pending,
            Some(expires_at) if now >= expires_at => Validity::Expired,
            Some(_) => Validity::Valid,
        }
    }

    pub fn missing_approvers(&self, approval: &Approval) -> usize {
        self.required_approvers
            .saturating_sub(approval.effective_grant_count())
    }
}

/// Read-only projection of an approval returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalView {
    pub id: Uuid,
    pub subject: Subject,
    pub requestor: Identity,
    pub reason: String,
    pub desired_approvers: BTreeSet<Identity>,
    pub approvers: Vec<Identity>,
    pub grant_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub validity: Validity,
    pub validity_message: Option<String>,
}

impl ApprovalView {
    pub fn build(approval: Approval, policy: &ApprovalPolicy, now: DateTime<Utc>) -> Self {
        let validity = policy.validity(&approval, now);
        let expires_at = policy.expires_at(&approval);
        let validity_message = match (validity, expires_at) {
            (Validity::Pending, _) => Some(format!(
                "Need at least {} more approver(s) for access.",
                policy.missing_approvers(&approval)
            )),
            (Validity::Expired, Some(at)) => {
                Some(format!("Approval expired at {}.", at.to_rfc3339()))
            }
            _ => None,
        };
        let approvers = approval.grants.iter().map(|g| g.approver.clone()).collect();
        let grant_count = approval.grants.len();
        let ApprovalRequest {
            id,
            subject,
            requestor,
            reason,
            desired_approvers,
            created_at,
        } = approval.request;

        Self {
            id,
            subject,
            requestor,
            reason,
            desired_approvers,
            approvers,
            grant_count,
            created_at,
            expires_at,
            validity,
            validity_message,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }
}
