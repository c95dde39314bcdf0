use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ApprovalStore, ConflictKind, Page, SettingsStore, StoreError};
use crate::models::{
    Approval, ApprovalRequest, Grant, Identity, Subject, SubjectKind, UserSettings,
};

type RequestKey = (Subject, Identity, DateTime<Utc>);

#[derive(Default)]
struct Approvals {
    by_id: HashMap<Uuid, Approval>,
    keys: HashSet<RequestKey>,
}

/// Process-local store.
///
/// All approvals sit behind one lock: writers are serialized, so the
/// duplicate-approver check and the append are a single step, and a scan
/// holds the read lock for the whole pass so it sees one snapshot.
/// Settings are independent per identity and live in a `DashMap`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    approvals: Arc<RwLock<Approvals>>,
    settings: Arc<DashMap<Identity, UserSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored approvals, all requestors and kinds.
    pub async fn len(&self) -> usize {
        self.approvals.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn request_key(request: &ApprovalRequest) -> RequestKey {
    (
        request.subject.clone(),
        request.requestor.clone(),
        request.created_at,
    )
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn put(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        let key = request_key(request);
        if approvals.by_id.contains_key(&request.id) || approvals.keys.contains(&key) {
            return Err(StoreError::Conflict(ConflictKind::DuplicateRequest));
        }
        approvals.keys.insert(key);
        approvals
            .by_id
            .insert(request.id, Approval::new(request.clone()));
        Ok(())
    }

    async fn append_grant(&self, grant: &Grant) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        let approval = approvals
            .by_id
            .get_mut(&grant.approval_id)
            .ok_or(StoreError::NotFound(grant.approval_id))?;

        if approval.request.requestor == grant.approver {
            return Err(StoreError::Conflict(ConflictKind::SelfApproval));
        }
        if approval.has_grant_from(&grant.approver) {
            return Err(StoreError::Conflict(ConflictKind::DuplicateApprover));
        }
        approval.grants.push(grant.clone());
        Ok(())
    }

    async fn get(&self, approval_id: Uuid) -> Result<Option<Approval>, StoreError> {
        Ok(self.approvals.read().await.by_id.get(&approval_id).cloned())
    }

    async fn latest_for(
        &self,
        subject: &Subject,
        requestor: &Identity,
    ) -> Result<Option<Approval>, StoreError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .by_id
            .values()
            .filter(|a| &a.request.subject == subject && &a.request.requestor == requestor)
            .max_by(|a, b| {
                a.request
                    .created_at
                    .cmp(&b.request.created_at)
                    .then_with(|| a.request.id.cmp(&b.request.id))
            })
            .cloned())
    }

    async fn scan_by_requestor(
        &self,
        requestor: &Identity,
        kind: SubjectKind,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError> {
        let approvals = self.approvals.read().await;
        let mut matching: Vec<&Approval> = approvals
            .by_id
            .values()
            .filter(|a| &a.request.requestor == requestor && a.request.subject.kind == kind)
            .collect();
        matching.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then_with(|| b.request.id.cmp(&a.request.id))
        });
        Ok(page.apply(matching.into_iter().cloned()))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self, identity: &Identity) -> Result<Option<UserSettings>, StoreError> {
        Ok(self.settings.get(identity).map(|entry| *entry.value()))
    }

    async fn put_settings(
        &self,
        identity: &Identity,
        settings: &UserSettings,
    ) -> Result<(), StoreError> {
        self.settings.insert(identity.clone(), *settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocsLocation, UiMode};
    use chrono::TimeZone;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn request(subject: Subject, requestor: &str, created: i64) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            subject,
            requestor: id(requestor),
            reason: "investigation".into(),
            desired_approvers: Default::default(),
            created_at: Utc.timestamp_opt(created, 0).unwrap(),
        }
    }

    fn grant(approval_id: Uuid, approver: &str) -> Grant {
        Grant {
            approval_id,
            approver: id(approver),
            justification: None,
            granted_at: Utc.timestamp_opt(100, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        let req = request(Subject::endpoint("c1").unwrap(), "u1", 42);
        store.put(&req).await.unwrap();

        let approval = store.get(req.id).await.unwrap().unwrap();
        assert_eq!(approval.request, req);
        assert!(approval.grants.is_empty());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_rejects_duplicate_key() {
        let store = MemoryStore::new();
        let req = request(Subject::endpoint("c1").unwrap(), "u1", 42);
        store.put(&req).await.unwrap();

        let mut same_key = req.clone();
        same_key.id = Uuid::new_v4();
        let err = store.put(&same_key).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictKind::DuplicateRequest)));

        let err = store.put(&req).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictKind::DuplicateRequest)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_grant_invariants() {
        let store = MemoryStore::new();
        let req = request(Subject::endpoint("c1").unwrap(), "u1", 42);
        store.put(&req).await.unwrap();

        store.append_grant(&grant(req.id, "approver")).await.unwrap();

        let dup = store.append_grant(&grant(req.id, "approver")).await.unwrap_err();
        assert!(matches!(dup, StoreError::Conflict(ConflictKind::DuplicateApprover)));

        let own = store.append_grant(&grant(req.id, "u1")).await.unwrap_err();
        assert!(matches!(own, StoreError::Conflict(ConflictKind::SelfApproval)));

        let missing = store.append_grant(&grant(Uuid::new_v4(), "approver")).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));

        let approval = store.get(req.id).await.unwrap().unwrap();
        assert_eq!(approval.grants.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_for_picks_most_recent() {
        let store = MemoryStore::new();
        let subject = Subject::job("H:ABCD1234").unwrap();
        let old = request(subject.clone(), "u1", 42);
        let new = request(subject.clone(), "u1", 44);
        let other_user = request(subject.clone(), "u2", 50);
        for r in [&old, &new, &other_user] {
            store.put(r).await.unwrap();
        }

        let latest = store.latest_for(&subject, &id("u1")).await.unwrap().unwrap();
        assert_eq!(latest.id(), new.id);
        assert!(store
            .latest_for(&Subject::job("H:OTHER").unwrap(), &id("u1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scan_orders_filters_and_pages() {
        let store = MemoryStore::new();
        let r42 = request(Subject::endpoint("c1").unwrap(), "u1", 42);
        let r44 = request(Subject::endpoint("c2").unwrap(), "u1", 44);
        let r45 = request(Subject::endpoint("c3").unwrap(), "u1", 45);
        let hunt = request(Subject::job("H:1").unwrap(), "u1", 46);
        let foreign = request(Subject::endpoint("c1").unwrap(), "u2", 47);
        for r in [&r42, &r44, &r45, &hunt, &foreign] {
            store.put(r).await.unwrap();
        }

        let all = store
            .scan_by_requestor(&id("u1"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        let ids: Vec<Uuid> = all.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec![r45.id, r44.id, r42.id]);

        let page = store
            .scan_by_requestor(&id("u1"), SubjectKind::Endpoint, Page::new(1, Some(1)))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id(), r44.id);

        let none = store
            .scan_by_requestor(&id("nobody"), SubjectKind::Endpoint, Page::all())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_settings_replace_whole_record() {
        let store = MemoryStore::new();
        let foo = id("foo");
        assert!(store.get_settings(&foo).await.unwrap().is_none());

        let first = UserSettings {
            mode: UiMode::Advanced,
            canary_mode: true,
            docs_location: DocsLocation::Remote,
        };
        store.put_settings(&foo, &first).await.unwrap();
        store.put_settings(&foo, &UserSettings::default()).await.unwrap();
        assert_eq!(
            store.get_settings(&foo).await.unwrap(),
            Some(UserSettings::default())
        );
    }
}
