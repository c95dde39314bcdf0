//! Request/grant state machine.
//!
//! A requestor files an [`ApprovalRequest`] for a subject; identities other
//! than the requestor grant it. Once the configured number of distinct
//! approvers has granted, the approval is valid until its window elapses.
//! Validity is always computed at read time; nothing is swept in the
//! background.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::AppError;
use crate::metrics;
use crate::models::{Approval, ApprovalPolicy, ApprovalRequest, Grant, Identity, Subject, Validity};
use crate::notification::{ApprovalEvent, ApprovalNotifier};
use crate::store::{ApprovalStore, ConflictKind, StoreError};

/// Longest accepted justification, in characters.
pub const MAX_REASON_LEN: usize = 1024;

pub struct ApprovalWorkflow {
    store: Arc<dyn ApprovalStore>,
    clock: Arc<dyn Clock>,
    policy: ApprovalPolicy,
    notifier: Option<Arc<dyn ApprovalNotifier>>,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn ApprovalStore>, clock: Arc<dyn Clock>, policy: ApprovalPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// File a new request. Earlier requests for the same subject are left
    /// untouched; a requestor may hold several at once.
    pub async fn request(
        &self,
        subject: Subject,
        requestor: &Identity,
        reason: &str,
        desired_approvers: BTreeSet<Identity>,
    ) -> Result<ApprovalRequest, AppError> {
        let result = self
            .request_inner(subject, requestor, reason, desired_approvers)
            .await;
        if let Err(ref e) = result {
            metrics::record_failure("request", e);
        }
        result
    }

    async fn request_inner(
        &self,
        subject: Subject,
        requestor: &Identity,
        reason: &str,
        mut desired_approvers: BTreeSet<Identity>,
    ) -> Result<ApprovalRequest, AppError> {
        subject.validate()?;
        let reason = validate_reason(reason)?;
        if desired_approvers.remove(requestor) {
            tracing::debug!(requestor = %requestor, "dropped requestor from desired approvers");
        }

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            subject,
            requestor: requestor.clone(),
            reason,
            desired_approvers,
            created_at: self.now(),
        };

        self.store.put(&request).await.map_err(|e| match e {
            StoreError::Conflict(_) => AppError::Conflict(format!(
                "a request for {} by {} already exists at {}",
                request.subject,
                request.requestor,
                request.created_at.to_rfc3339()
            )),
            other => AppError::Store(other),
        })?;

        tracing::info!(
            approval_id = %request.id,
            subject = %request.subject,
            requestor = %request.requestor,
            "approval requested"
        );
        metrics::record_request(request.subject.kind);
        self.emit(ApprovalEvent::approval_requested(&request)).await;

        Ok(request)
    }

    /// Record `approver`'s grant on the most recent request `requestor`
    /// filed for `subject`.
    pub async fn grant(
        &self,
        subject: &Subject,
        requestor: &Identity,
        approver: &Identity,
        justification: Option<&str>,
    ) -> Result<Grant, AppError> {
        let result = self
            .grant_inner(subject, requestor, approver, justification)
            .await;
        if let Err(ref e) = result {
            metrics::record_failure("grant", e);
        }
        result
    }

    async fn grant_inner(
        &self,
        subject: &Subject,
        requestor: &Identity,
        approver: &Identity,
        justification: Option<&str>,
    ) -> Result<Grant, AppError> {
        subject.validate()?;
        if approver == requestor {
            tracing::warn!(subject = %subject, requestor = %requestor, "self-approval attempt denied");
            return Err(AppError::SelfApprovalDenied(approver.to_string()));
        }

        let mut approval = self
            .store
            .latest_for(subject, requestor)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no approval request by {} for {}", requestor, subject))
            })?;

        if approval.has_grant_from(approver) {
            return Err(AppError::DuplicateGrant(approver.to_string()));
        }

        let grant = Grant {
            approval_id: approval.id(),
            approver: approver.clone(),
            justification: justification
                .map(str::trim)
                .filter(|j| !j.is_empty())
                .map(String::from),
            granted_at: self.now(),
        };

        self.store
            .append_grant(&grant)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(ConflictKind::DuplicateApprover) => {
                    AppError::DuplicateGrant(approver.to_string())
                }
                StoreError::Conflict(ConflictKind::SelfApproval) => {
                    AppError::SelfApprovalDenied(approver.to_string())
                }
                StoreError::Conflict(ConflictKind::DuplicateRequest) => {
                    AppError::Conflict(format!("approval {} changed concurrently", grant.approval_id))
                }
                StoreError::NotFound(id) => AppError::NotFound(format!("approval {}", id)),
                other => AppError::Store(other),
            })?;

        approval.grants.push(grant.clone());
        let validity = self.policy.validity(&approval, grant.granted_at);
        tracing::info!(
            approval_id = %grant.approval_id,
            subject = %subject,
            requestor = %requestor,
            approver = %approver,
            validity = validity.as_str(),
            "approval granted"
        );
        metrics::record_grant(subject.kind);
        self.emit(ApprovalEvent::approval_granted(
            &approval,
            &grant,
            validity,
            self.policy.expires_at(&approval),
        ))
        .await;

        Ok(grant)
    }

    /// Validity of `approval` as of now.
    pub fn current_validity(&self, approval: &Approval) -> Validity {
        self.policy.validity(approval, self.clock.now())
    }

    /// Current time at the microsecond precision the stores keep.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn emit(&self, event: ApprovalEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event).await;
        }
    }
}

fn validate_reason(reason: &str) -> Result<String, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidArgument("reason must not be empty".into()));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(AppError::InvalidArgument(format!(
            "reason is longer than {} characters",
            MAX_REASON_LEN
        )));
    }
    Ok(reason.to_string())
}
