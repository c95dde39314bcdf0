//! `Gatekeeper`: the operations exposed to transports.
//!
//! Takes raw strings (path segments, CLI arguments), parses them into the
//! typed model and forwards to the workflow, query and settings services.
//! Usable directly as a library without any transport.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::AppError;
use crate::models::{
    ApprovalPolicy, ApprovalRequest, ApprovalView, Grant, Identity, Subject, SubjectKind,
    UserSettings,
};
use crate::notification::ApprovalNotifier;
use crate::query::ApprovalQueryService;
use crate::rbac::Caller;
use crate::settings::UserSettingsService;
use crate::store::memory::MemoryStore;
use crate::store::{ApprovalStore, Page, SettingsStore};
use crate::workflow::ApprovalWorkflow;

pub struct Gatekeeper {
    workflow: ApprovalWorkflow,
    query: ApprovalQueryService,
    settings: UserSettingsService,
    admins: HashSet<Identity>,
}

impl Gatekeeper {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        policy: ApprovalPolicy,
        admins: HashSet<Identity>,
    ) -> Self {
        Self {
            workflow: ApprovalWorkflow::new(approvals.clone(), clock.clone(), policy),
            query: ApprovalQueryService::new(approvals, clock, policy),
            settings: UserSettingsService::new(settings),
            admins,
        }
    }

    /// Both stores backed by one fresh [`MemoryStore`].
    pub fn in_memory(clock: Arc<dyn Clock>, policy: ApprovalPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, clock, policy, HashSet::new())
    }

    /// In-memory instance on the wall clock with the default policy.
    pub fn ephemeral() -> Self {
        Self::in_memory(Arc::new(SystemClock), ApprovalPolicy::default())
    }

    pub fn with_notifier(self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self {
            workflow: self.workflow.with_notifier(notifier),
            ..self
        }
    }

    pub fn with_admins(mut self, admins: HashSet<Identity>) -> Self {
        self.admins = admins;
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        self.workflow.policy()
    }

    pub fn workflow(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    /// Resolve an identity string into a caller with its configured role.
    pub fn caller(&self, identity: &str) -> Result<Caller, AppError> {
        Ok(Caller::resolve(Identity::new(identity)?, &self.admins))
    }

    pub async fn request_approval<I, S>(
        &self,
        kind: &str,
        subject_id: &str,
        requestor: &str,
        reason: &str,
        desired_approvers: I,
    ) -> Result<ApprovalRequest, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let subject = Subject::new(kind.parse()?, subject_id)?;
        let requestor = Identity::new(requestor)?;
        let desired = desired_approvers
            .into_iter()
            .map(|name| Identity::new(name.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        self.workflow.request(subject, &requestor, reason, desired).await
    }

    pub async fn grant_approval(
        &self,
        kind: &str,
        subject_id: &str,
        requestor: &str,
        approver: &str,
        justification: Option<&str>,
    ) -> Result<Grant, AppError> {
        let subject = Subject::new(kind.parse()?, subject_id)?;
        let requestor = Identity::new(requestor)?;
        let approver = Identity::new(approver)?;
        self.workflow
            .grant(&subject, &requestor, &approver, justification)
            .await
    }

    pub async fn list_approvals(
        &self,
        caller: &str,
        kind: &str,
        offset: usize,
        count: Option<usize>,
    ) -> Result<Vec<ApprovalView>, AppError> {
        let caller = Identity::new(caller)?;
        let kind: SubjectKind = kind.parse()?;
        self.query
            .list_approvals(&caller, kind, Page::new(offset, count))
            .await
    }

    pub async fn get_approval(&self, caller: &str, approval_id: Uuid) -> Result<ApprovalView, AppError> {
        let caller = Identity::new(caller)?;
        self.query.get_approval(&caller, approval_id).await
    }

    pub async fn get_settings(&self, identity: &str) -> Result<UserSettings, AppError> {
        self.settings.get(&Identity::new(identity)?).await
    }

    /// `caller` writes `target`'s settings; allowed for self, or any
    /// target when `caller` is a configured admin.
    pub async fn set_settings(
        &self,
        caller: &str,
        target: &str,
        settings: UserSettings,
    ) -> Result<(), AppError> {
        let caller = self.caller(caller)?;
        let target = Identity::new(target)?;
        self.settings.set(&caller, &target, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{UiMode, Validity};

    fn gatekeeper() -> Gatekeeper {
        Gatekeeper::in_memory(Arc::new(ManualClock::at_secs(42)), ApprovalPolicy::default())
    }

    #[tokio::test]
    async fn test_raw_inputs_are_validated() {
        let gk = gatekeeper();
        let err = gk
            .request_approval("planet", "c1", "u1", "r", Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = gk
            .request_approval("client", "bad id", "u1", "r", Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = gk
            .request_approval("client", "c1", "u1", "r", ["not valid"])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        assert!(gk.list_approvals("", "client", 0, None).await.is_err());
    }

    #[tokio::test]
    async fn test_request_grant_list() {
        let gk = gatekeeper();
        gk.request_approval("client", "c1", "u1", "investigation", ["approver"])
            .await
            .unwrap();
        gk.grant_approval("endpoint", "c1", "u1", "approver", None)
            .await
            .unwrap();
        let views = gk.list_approvals("u1", "client", 0, None).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].validity, Validity::Valid);
        assert_eq!(views[0].grant_count, 1);
    }

    #[tokio::test]
    async fn test_settings_admin_resolution() {
        let admins = [Identity::new("root").unwrap()].into_iter().collect();
        let gk = gatekeeper().with_admins(admins);
        let settings = UserSettings {
            mode: UiMode::Advanced,
            ..UserSettings::default()
        };

        assert!(gk.caller("root").unwrap().is_admin());
        assert!(gk.set_settings("root", "foo", settings).await.is_ok());
        assert_eq!(gk.get_settings("foo").await.unwrap(), settings);

        let err = gk.set_settings("bar", "foo", UserSettings::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
