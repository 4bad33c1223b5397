//! Session storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use uuid::Uuid;
use warden_auth::AuthResult;
use warden_auth::storage::SessionStorage;
use warden_auth::types::{RevocationReason, Session, SessionStatus};

use crate::{PgPool, StorageError, StorageResult, map_insert_error};

type SessionRow = (
    Uuid,
    String,
    String,
    Option<String>,
    serde_json::Value,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
    OffsetDateTime,
    String,
    Uuid,
    Option<OffsetDateTime>,
    Option<String>,
);

const SELECT_COLUMNS: &str = "session_id, subject_id, tenant_id, organization_id, roles, \
     device_fingerprint, created_at, last_seen_at, expires_at, status, \
     current_refresh_family, revoked_at, revocation_reason";

fn session_from_row(row: SessionRow) -> StorageResult<Session> {
    let status: SessionStatus = row.9.parse().map_err(StorageError::corrupt_row)?;
    let roles: Vec<String> = serde_json::from_value(row.4)?;
    Ok(Session {
        session_id: row.0,
        subject_id: row.1,
        tenant_id: row.2,
        organization_id: row.3,
        roles,
        device_fingerprint: row.5,
        created_at: row.6,
        last_seen_at: row.7,
        expires_at: row.8,
        status,
        current_refresh_family: row.10,
        revoked_at: row.11,
        revocation_reason: row.12,
    })
}

/// [`SessionStorage`] backed by the `warden_session` table.
#[derive(Debug, Clone)]
pub struct PostgresSessionStorage {
    pool: Arc<PgPool>,
}

impl PostgresSessionStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn insert(&self, session: &Session) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO warden_session (
                session_id, subject_id, tenant_id, organization_id, roles,
                device_fingerprint, created_at, last_seen_at, expires_at, status,
                current_refresh_family, revoked_at, revocation_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.session_id)
        .bind(&session.subject_id)
        .bind(&session.tenant_id)
        .bind(session.organization_id.as_deref())
        .bind(serde_json::to_value(&session.roles)?)
        .bind(session.device_fingerprint.as_deref())
        .bind(session.created_at)
        .bind(session.last_seen_at)
        .bind(session.expires_at)
        .bind(session.status.as_str())
        .bind(session.current_refresh_family)
        .bind(session.revoked_at)
        .bind(session.revocation_reason.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_insert_error(e, "session"))?;
        Ok(())
    }

    async fn select_by_id(&self, session_id: Uuid) -> StorageResult<Option<Session>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM warden_session WHERE session_id = $1");
        let row: Option<SessionRow> = query_as(&sql)
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(session_from_row).transpose()
    }

    async fn select_by_subject(&self, subject_id: &str) -> StorageResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM warden_session WHERE subject_id = $1 ORDER BY created_at"
        );
        let rows: Vec<SessionRow> = query_as(&sql)
            .bind(subject_id)
            .fetch_all(&*self.pool)
            .await?;
        rows.into_iter().map(session_from_row).collect()
    }

    async fn update_last_seen(&self, session_id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        query(
            r#"
            UPDATE warden_session
            SET last_seen_at = GREATEST(last_seen_at, $2)
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn mark_revoked(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> StorageResult<bool> {
        let rows_affected = query(
            r#"
            UPDATE warden_session
            SET status = 'revoked', revoked_at = $2, revocation_reason = $3
            WHERE session_id = $1 AND status <> 'revoked'
            "#,
        )
        .bind(session_id)
        .bind(at)
        .bind(reason.as_str())
        .execute(&*self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn mark_subject_revoked(
        &self,
        subject_id: &str,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = query_scalar(
            r#"
            UPDATE warden_session
            SET status = 'revoked', revoked_at = $2, revocation_reason = $3
            WHERE subject_id = $1 AND status <> 'revoked'
            RETURNING session_id
            "#,
        )
        .bind(subject_id)
        .bind(at)
        .bind(reason.as_str())
        .fetch_all(&*self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM warden_session WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn create(&self, session: &Session) -> AuthResult<()> {
        Ok(self.insert(session).await?)
    }

    async fn find_by_id(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        Ok(self.select_by_id(session_id).await?)
    }

    async fn touch(&self, session_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        Ok(self.update_last_seen(session_id, at).await?)
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<bool> {
        Ok(self.mark_revoked(session_id, reason, at).await?)
    }

    async fn revoke_by_subject(
        &self,
        subject_id: &str,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<Uuid>> {
        Ok(self.mark_subject_revoked(subject_id, reason, at).await?)
    }

    async fn list_by_subject(&self, subject_id: &str) -> AuthResult<Vec<Session>> {
        Ok(self.select_by_subject(subject_id).await?)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(self.delete_expired(now).await?)
    }
}
