use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ApprovalStore, ConflictKind, Page, SettingsStore, StoreError};
use crate::models::{
    Approval, ApprovalRequest, DocsLocation, Grant, Identity, Subject, SubjectKind, UiMode,
    UserSettings,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn grants_for(&self, ids: &[Uuid]) -> Result<Vec<GrantRow>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = sqlx::query_as::<_, GrantRow>(
            "SELECT approval_id, approver, justification, granted_at FROM approval_grants
             WHERE approval_id = ANY($1) ORDER BY granted_at ASC, approver ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_one(&self, row: Option<RequestRow>) -> Result<Option<Approval>, StoreError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let grants = self.grants_for(&[row.id]).await?;
        Ok(assemble(vec![row], grants)?.pop())
    }
}

// -- Row types --

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    subject_kind: String,
    subject_id: String,
    requestor: String,
    reason: String,
    desired_approvers: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    approval_id: Uuid,
    approver: String,
    justification: Option<String>,
    granted_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    mode: String,
    canary_mode: bool,
    docs_location: String,
}

const REQUEST_COLUMNS: &str =
    "id, subject_kind, subject_id, requestor, reason, desired_approvers, created_at";

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", what, e))
}

impl TryFrom<RequestRow> for ApprovalRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let kind: SubjectKind = row
            .subject_kind
            .parse()
            .map_err(|e| corrupt("subject_kind", e))?;
        let subject = Subject::new(kind, row.subject_id).map_err(|e| corrupt("subject_id", e))?;
        let requestor = Identity::new(row.requestor).map_err(|e| corrupt("requestor", e))?;
        let desired_approvers = row
            .desired_approvers
            .0
            .into_iter()
            .map(Identity::new)
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| corrupt("desired_approvers", e))?;

        Ok(ApprovalRequest {
            id: row.id,
            subject,
            requestor,
            reason: row.reason,
            desired_approvers,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<GrantRow> for Grant {
    type Error = StoreError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        Ok(Grant {
            approval_id: row.approval_id,
            approver: Identity::new(row.approver).map_err(|e| corrupt("approver", e))?,
            justification: row.justification,
            granted_at: row.granted_at,
        })
    }
}

/// Join request rows (in the order given) with their grant rows.
fn assemble(requests: Vec<RequestRow>, grants: Vec<GrantRow>) -> Result<Vec<Approval>, StoreError> {
    let mut by_approval: HashMap<Uuid, Vec<Grant>> = HashMap::new();
    for row in grants {
        let grant = Grant::try_from(row)?;
        by_approval.entry(grant.approval_id).or_default().push(grant);
    }

    requests
        .into_iter()
        .map(|row| {
            let request = ApprovalRequest::try_from(row)?;
            let grants = by_approval.remove(&request.id).unwrap_or_default();
            Ok(Approval { request, grants })
        })
        .collect()
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn put(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let desired: Vec<&str> = request.desired_approvers.iter().map(|i| i.as_str()).collect();
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO approval_requests (id, subject_kind, subject_id, requestor, reason, desired_approvers, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT DO NOTHING
               RETURNING id"#,
        )
        .bind(request.id)
        .bind(request.subject.kind.as_str())
        .bind(&request.subject.id)
        .bind(request.requestor.as_str())
        .bind(&request.reason)
        .bind(Json(desired))
        .bind(request.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("approval request insert failed: {:?}", e);
            e
        })?;

        match inserted {
            Some(_) => Ok(()),
            None => Err(StoreError::Conflict(ConflictKind::DuplicateRequest)),
        }
    }

    async fn append_grant(&self, grant: &Grant) -> Result<(), StoreError> {
        // The insert only happens if the request exists and the approver is
        // not its requestor; the (approval_id, approver) primary key makes
        // concurrent duplicates lose.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO approval_grants (approval_id, approver, justification, granted_at)
               SELECT id, $2, $3, $4 FROM approval_requests
               WHERE id = $1 AND requestor <> $2
               ON CONFLICT (approval_id, approver) DO NOTHING
               RETURNING approval_id"#,
        )
        .bind(grant.approval_id)
        .bind(grant.approver.as_str())
        .bind(&grant.justification)
        .bind(grant.granted_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(());
        }

        let requestor = sqlx::query_scalar::<_, String>(
            "SELECT requestor FROM approval_requests WHERE id = $1",
        )
        .bind(grant.approval_id)
        .fetch_optional(&self.pool)
        .await?;

        match requestor {
            None => Err(StoreError::NotFound(grant.approval_id)),
            Some(r) if r == grant.approver.as_str() => {
                Err(StoreError::Conflict(ConflictKind::SelfApproval))
            }
            Some(_) => Err(StoreError::Conflict(ConflictKind::DuplicateApprover)),
        }
    }

    async fn get(&self, approval_id: Uuid) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await?;
        self.load_one(row).await
    }

    async fn latest_for(
        &self,
        subject: &Subject,
        requestor: &Identity,
    ) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests
             WHERE subject_kind = $1 AND subject_id = $2 AND requestor = $3
             ORDER BY created_at DESC, id DESC LIMIT 1",
            REQUEST_COLUMNS
        ))
        .bind(subject.kind.as_str())
        .bind(&subject.id)
        .bind(requestor.as_str())
        .fetch_optional(&self.pool)
        .await?;
        self.load_one(row).await
    }

    async fn scan_by_requestor(
        &self,
        requestor: &Identity,
        kind: SubjectKind,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError> {
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);
        let limit = page.count.map(|c| i64::try_from(c).unwrap_or(i64::MAX));

        // Both reads share one snapshot so no grant can appear between them.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let requests = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests
             WHERE requestor = $1 AND subject_kind = $2
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4",
            REQUEST_COLUMNS
        ))
        .bind(requestor.as_str())
        .bind(kind.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = requests.iter().map(|r| r.id).collect();
        let grants = if ids.is_empty() {
            vec![]
        } else {
            sqlx::query_as::<_, GrantRow>(
                "SELECT approval_id, approver, justification, granted_at FROM approval_grants
                 WHERE approval_id = ANY($1) ORDER BY granted_at ASC, approver ASC",
            )
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?
        };
        tx.commit().await?;

        assemble(requests, grants)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_settings(&self, identity: &Identity) -> Result<Option<UserSettings>, StoreError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT mode, canary_mode, docs_location FROM user_settings WHERE identity = $1",
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<UserSettings, StoreError> {
            Ok(UserSettings {
                mode: r.mode.parse::<UiMode>().map_err(|e| corrupt("mode", e))?,
                canary_mode: r.canary_mode,
                docs_location: r
                    .docs_location
                    .parse::<DocsLocation>()
                    .map_err(|e| corrupt("docs_location", e))?,
            })
        })
        .transpose()
    }

    async fn put_settings(
        &self,
        identity: &Identity,
        settings: &UserSettings,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO user_settings (identity, mode, canary_mode, docs_location, updated_at)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (identity) DO UPDATE SET
                   mode = EXCLUDED.mode,
                   canary_mode = EXCLUDED.canary_mode,
                   docs_location = EXCLUDED.docs_location,
                   updated_at = NOW()"#,
        )
        .bind(identity.as_str())
        .bind(settings.mode.as_str())
        .bind(settings.canary_mode)
        .bind(settings.docs_location.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request_row(id: Uuid, created: i64) -> RequestRow {
        RequestRow {
            id,
            subject_kind: "endpoint".into(),
            subject_id: "C.1000000000000000".into(),
            requestor: "u1".into(),
            reason: "investigation".into(),
            desired_approvers: Json(vec!["approver".into()]),
            created_at: Utc.timestamp_opt(created, 0).unwrap(),
        }
    }

    fn grant_row(id: Uuid, approver: &str) -> GrantRow {
        GrantRow {
            approval_id: id,
            approver: approver.into(),
            justification: None,
            granted_at: Utc.timestamp_opt(84, 0).unwrap(),
        }
    }

    #[test]
    fn test_assemble_keeps_request_order_and_attaches_grants() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let approvals = assemble(
            vec![request_row(b, 45), request_row(a, 44)],
            vec![grant_row(b, "approver")],
        )
        .unwrap();

        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].id(), b);
        assert_eq!(approvals[0].grants.len(), 1);
        assert_eq!(approvals[1].id(), a);
        assert!(approvals[1].grants.is_empty());
        assert_eq!(approvals[0].request.subject.kind, SubjectKind::Endpoint);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        let mut row = request_row(Uuid::new_v4(), 42);
        row.subject_kind = "flow".into();
        let err = ApprovalRequest::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        let err = Grant::try_from(grant_row(Uuid::new_v4(), "bad name")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
