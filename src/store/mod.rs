//! Persistence contracts for approvals and user settings.
//!
//! Two backends implement them: [`memory::MemoryStore`] (process-local,
//! used when no database is configured and in tests) and
//! [`postgres::PgStore`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Approval, ApprovalRequest, Grant, Identity, Subject, SubjectKind, UserSettings};

pub mod memory;
pub mod postgres;

/// Which uniqueness rule a write would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A request with the same id or (subject, requestor, created_at) key exists.
    DuplicateRequest,
    /// The approver already granted this approval.
    DuplicateApprover,
    /// The approver is the requestor.
    SelfApproval,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("approval {0} not found")]
    NotFound(Uuid),

    #[error("write conflict: {0:?}")]
    Conflict(ConflictKind),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Offset/count window applied after ordering. `count: None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: usize,
    pub count: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, count: Option<usize>) -> Self {
        Self { offset, count }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Apply the window to an already-ordered iterator.
    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let items = items.skip(self.offset);
        match self.count {
            Some(count) => items.take(count).collect(),
            None => items.collect(),
        }
    }
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert a new request. Requests are never overwritten.
    async fn put(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    /// Compare-and-append a grant, keyed by (approval_id, approver).
    async fn append_grant(&self, grant: &Grant) -> Result<(), StoreError>;

    async fn get(&self, approval_id: Uuid) -> Result<Option<Approval>, StoreError>;

    /// The most recently created request for this subject by this requestor.
    async fn latest_for(
        &self,
        subject: &Subject,
        requestor: &Identity,
    ) -> Result<Option<Approval>, StoreError>;

    /// A requestor's approvals of one kind, newest first, from a single
    /// consistent snapshot. Each item carries every grant committed before
    /// the snapshot was taken.
    async fn scan_by_requestor(
        &self,
        requestor: &Identity,
        kind: SubjectKind,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self, identity: &Identity) -> Result<Option<UserSettings>, StoreError>;

    /// Replace the whole record for `identity`.
    async fn put_settings(
        &self,
        identity: &Identity,
        settings: &UserSettings,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_apply() {
        let items = || 0..10;
        assert_eq!(Page::all().apply(items()).len(), 10);
        assert_eq!(Page::new(2, Some(3)).apply(items()), vec![2, 3, 4]);
        assert_eq!(Page::new(8, Some(5)).apply(items()), vec![8, 9]);
        assert!(Page::new(20, None).apply(items()).is_empty());
        assert!(Page::new(0, Some(0)).apply(items()).is_empty());
    }
}
