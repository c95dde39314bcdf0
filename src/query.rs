use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::{ApprovalPolicy, ApprovalView, Identity, SubjectKind};
use crate::store::{ApprovalStore, Page};

/// Read side of the workflow: a caller's own approvals, projected into
/// [`ApprovalView`]s with validity evaluated against the clock.
pub struct ApprovalQueryService {
    store: Arc<dyn ApprovalStore>,
    clock: Arc<dyn Clock>,
    policy: ApprovalPolicy,
}

impl ApprovalQueryService {
    pub fn new(store: Arc<dyn ApprovalStore>, clock: Arc<dyn Clock>, policy: ApprovalPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Newest first. Every view in one page is evaluated at the same instant.
    pub async fn list_approvals(
        &self,
        caller: &Identity,
        kind: SubjectKind,
        page: Page,
    ) -> Result<Vec<ApprovalView>, AppError> {
        let approvals = self.store.scan_by_requestor(caller, kind, page).await?;
        let now = self.clock.now();
        tracing::debug!(
            requestor = %caller,
            kind = kind.as_str(),
            count = approvals.len(),
            "listed approvals"
        );
        Ok(approvals
            .into_iter()
            .map(|a| ApprovalView::build(a, &self.policy, now))
            .collect())
    }

    /// A single approval. Someone else's approval reads as missing.
    pub async fn get_approval(&self, caller: &Identity, approval_id: Uuid) -> Result<ApprovalView, AppError> {
        let not_found = || AppError::NotFound(format!("approval {}", approval_id));
        let approval = self.store.get(approval_id).await?.ok_or_else(not_found)?;
        if &approval.request.requestor != caller {
            return Err(not_found());
        }
        Ok(ApprovalView::build(approval, &self.policy, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Grant, Subject, Validity};
    use crate::store::memory::MemoryStore;
    use crate::workflow::ApprovalWorkflow;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    struct Fixture {
        workflow: ApprovalWorkflow,
        query: ApprovalQueryService,
        store: MemoryStore,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = ManualClock::at_secs(100);
        let policy = ApprovalPolicy::new(1, Duration::seconds(500));
        Fixture {
            workflow: ApprovalWorkflow::new(Arc::new(store.clone()), Arc::new(clock.clone()), policy),
            query: ApprovalQueryService::new(Arc::new(store.clone()), Arc::new(clock.clone()), policy),
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_caller_and_kind() {
        let f = fixture();
        f.workflow
            .request(Subject::endpoint("c1").unwrap(), &id("u1"), "r", BTreeSet::new())
            .await
            .unwrap();
        f.workflow
            .request(Subject::job("H:1").unwrap(), &id("u1"), "r", BTreeSet::new())
            .await
            .unwrap();
        f.workflow
            .request(Subject::endpoint("c2").unwrap(), &id("u2"), "r", BTreeSet::new())
            .await
            .unwrap();

        let mine = f
            .query
            .list_approvals(&id("u1"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].subject.id, "c1");

        let none = f
            .query
            .list_approvals(&id("u3"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paged() {
        let f = fixture();
        for (secs, subject) in [(100, "c1"), (110, "c2"), (120, "c3")] {
            f.clock.set_secs(secs);
            f.workflow
                .request(Subject::endpoint(subject).unwrap(), &id("u1"), "r", BTreeSet::new())
                .await
                .unwrap();
        }
        let all = f
            .query
            .list_approvals(&id("u1"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|v| v.subject.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c2", "c1"]);

        let page = f
            .query
            .list_approvals(&id("u1"), SubjectKind::Endpoint, Page::new(1, Some(1)))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].subject.id, "c2");
    }

    #[tokio::test]
    async fn test_views_reflect_grants_and_time() {
        let f = fixture();
        let subject = Subject::endpoint("c1").unwrap();
        let request = f
            .workflow
            .request(subject.clone(), &id("u1"), "r", BTreeSet::new())
            .await
            .unwrap();

        let view = f.query.get_approval(&id("u1"), request.id).await.unwrap();
        assert_eq!(view.validity, Validity::Pending);
        assert_eq!(
            view.validity_message.as_deref(),
            Some("Need at least 1 more approver(s) for access.")
        );

        f.workflow.grant(&subject, &id("u1"), &id("a1"), None).await.unwrap();
        let view = f.query.get_approval(&id("u1"), request.id).await.unwrap();
        assert!(view.is_valid());
        assert_eq!(view.approvers, vec![id("a1")]);
        assert_eq!(view.expires_at.unwrap().timestamp(), 600);

        f.clock.set_secs(600);
        let view = f.query.get_approval(&id("u1"), request.id).await.unwrap();
        assert_eq!(view.validity, Validity::Expired);
    }

    #[tokio::test]
    async fn test_get_hides_other_requestors_approvals() {
        let f = fixture();
        let request = f
            .workflow
            .request(Subject::endpoint("c1").unwrap(), &id("u1"), "r", BTreeSet::new())
            .await
            .unwrap();
        let err = f.query.get_approval(&id("u2"), request.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = f.query.get_approval(&id("u1"), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_grants_written_directly_to_store_are_visible() {
        let f = fixture();
        let request = f
            .workflow
            .request(Subject::endpoint("c1").unwrap(), &id("u1"), "r", BTreeSet::new())
            .await
            .unwrap();
        f.store
            .append_grant(&Grant {
                approval_id: request.id,
                approver: id("a9"),
                justification: None,
                granted_at: f.clock.now(),
            })
            .await
            .unwrap();
        let views = f
            .query
            .list_approvals(&id("u1"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        assert!(views[0].is_valid());
    }
}
