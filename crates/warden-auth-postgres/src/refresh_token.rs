//! Refresh token lineage storage for PostgreSQL.
//!
//! # Security Considerations
//!
//! - Only SHA-256 digests are stored in `jti`
//! - Consumption is a conditional `UPDATE` on `(status, version)`; the
//!   successor insert shares its transaction, so a failed insert leaves the
//!   parent valid

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;
use warden_auth::AuthResult;
use warden_auth::storage::{ConsumeOutcome, RefreshTokenStorage};
use warden_auth::types::{RefreshTokenRecord, RefreshTokenStatus};

use crate::{PgPool, StorageError, StorageResult, map_insert_error};

type RefreshTokenRow = (
    String,
    Uuid,
    Uuid,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
    String,
    i64,
);

const SELECT_COLUMNS: &str =
    "jti, session_id, family_id, parent_jti, issued_at, expires_at, consumed_at, status, version";

const INSERT_SQL: &str = r#"
    INSERT INTO warden_refresh_token (
        jti, session_id, family_id, parent_jti, issued_at, expires_at,
        consumed_at, status, version
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

fn record_from_row(row: RefreshTokenRow) -> StorageResult<RefreshTokenRecord> {
    let status: RefreshTokenStatus = row.7.parse().map_err(StorageError::corrupt_row)?;
    Ok(RefreshTokenRecord {
        jti: row.0,
        session_id: row.1,
        family_id: row.2,
        parent_jti: row.3,
        issued_at: row.4,
        expires_at: row.5,
        consumed_at: row.6,
        status,
        version: row.8,
    })
}

/// [`RefreshTokenStorage`] backed by the `warden_refresh_token` table.
#[derive(Debug, Clone)]
pub struct PostgresRefreshTokenStorage {
    pool: Arc<PgPool>,
}

impl PostgresRefreshTokenStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> StorageResult<()> {
        query(INSERT_SQL)
            .bind(&record.jti)
            .bind(record.session_id)
            .bind(record.family_id)
            .bind(record.parent_jti.as_deref())
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(record.consumed_at)
            .bind(record.status.as_str())
            .bind(record.version)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_insert_error(e, "refresh token record"))?;
        Ok(())
    }

    async fn select_by_jti(&self, jti: &str) -> StorageResult<Option<RefreshTokenRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM warden_refresh_token WHERE jti = $1");
        let row: Option<RefreshTokenRow> = query_as(&sql)
            .bind(jti)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(record_from_row).transpose()
    }

    async fn consume(
        &self,
        jti: &str,
        expected_version: i64,
        consumed_at: OffsetDateTime,
        successor: &RefreshTokenRecord,
    ) -> StorageResult<ConsumeOutcome> {
        let mut tx = self.pool.begin().await?;

        let rows_affected = query(
            r#"
            UPDATE warden_refresh_token
            SET status = 'consumed', consumed_at = $3, version = version + 1
            WHERE jti = $1 AND version = $2 AND status = 'valid'
            "#,
        )
        .bind(jti)
        .bind(expected_version)
        .bind(consumed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            debug!(version = expected_version, "Refresh token consume lost");
            return Ok(ConsumeOutcome::Conflict);
        }

        query(INSERT_SQL)
            .bind(&successor.jti)
            .bind(successor.session_id)
            .bind(successor.family_id)
            .bind(successor.parent_jti.as_deref())
            .bind(successor.issued_at)
            .bind(successor.expires_at)
            .bind(successor.consumed_at)
            .bind(successor.status.as_str())
            .bind(successor.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, "successor refresh token record"))?;

        tx.commit().await?;
        Ok(ConsumeOutcome::Consumed)
    }

    async fn mark_family_revoked(&self, session_id: Uuid) -> StorageResult<u64> {
        let valid: i64 = query_scalar(
            r#"
            WITH prior AS (
                SELECT jti, status FROM warden_refresh_token
                WHERE session_id = $1 AND status <> 'revoked'
                FOR UPDATE
            ),
            revoked AS (
                UPDATE warden_refresh_token t
                SET status = 'revoked', version = t.version + 1
                FROM prior
                WHERE t.jti = prior.jti
                RETURNING prior.status AS prior_status
            )
            SELECT COUNT(*) FROM revoked WHERE prior_status = 'valid'
            "#,
        )
        .bind(session_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(u64::try_from(valid).unwrap_or_default())
    }

    async fn select_by_session(&self, session_id: Uuid) -> StorageResult<Vec<RefreshTokenRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM warden_refresh_token \
             WHERE session_id = $1 ORDER BY issued_at, version DESC"
        );
        let rows: Vec<RefreshTokenRow> = query_as(&sql)
            .bind(session_id)
            .fetch_all(&*self.pool)
            .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM warden_refresh_token WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenStorage for PostgresRefreshTokenStorage {
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        Ok(self.insert(record).await?)
    }

    async fn find_by_jti(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        Ok(self.select_by_jti(jti).await?)
    }

    async fn compare_and_consume(
        &self,
        jti: &str,
        expected_version: i64,
        consumed_at: OffsetDateTime,
        successor: &RefreshTokenRecord,
    ) -> AuthResult<ConsumeOutcome> {
        Ok(self
            .consume(jti, expected_version, consumed_at, successor)
            .await?)
    }

    async fn revoke_family(&self, session_id: Uuid) -> AuthResult<u64> {
        Ok(self.mark_family_revoked(session_id).await?)
    }

    async fn list_by_session(&self, session_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>> {
        Ok(self.select_by_session(session_id).await?)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(self.delete_expired(now).await?)
    }
}
