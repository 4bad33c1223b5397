//! Revocation entry storage for PostgreSQL.
//!
//! The feed version is the current value of `warden_revocation_seq`. Every
//! insert or replacement draws a new sequence value, so the version never
//! goes backwards, even after expired rows are deleted.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use warden_auth::AuthResult;
use warden_auth::storage::RevocationStorage;
use warden_auth::types::{RevocationEntry, RevocationFeed, RevocationReason, RevocationTarget};

use crate::{PgPool, StorageError, StorageResult};

type RevocationRow = (String, String, String, OffsetDateTime, OffsetDateTime);

fn entry_from_row(row: RevocationRow) -> StorageResult<RevocationEntry> {
    let target = RevocationTarget::from_parts(&row.0, &row.1).map_err(StorageError::corrupt_row)?;
    let reason: RevocationReason = row.2.parse().map_err(StorageError::corrupt_row)?;
    Ok(RevocationEntry {
        target,
        reason,
        revoked_at: row.3,
        expires_at: row.4,
    })
}

/// Session entries keep the first revocation; subject entries are replaced
/// by a later one.
fn insert_sql(target: &RevocationTarget) -> &'static str {
    match target {
        RevocationTarget::Session(_) => {
            r#"
            INSERT INTO warden_revocation (target_kind, target_id, reason, revoked_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (target_kind, target_id) DO NOTHING
            "#
        }
        RevocationTarget::Subject(_) => {
            r#"
            INSERT INTO warden_revocation (target_kind, target_id, reason, revoked_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (target_kind, target_id) DO UPDATE
            SET reason = EXCLUDED.reason,
                revoked_at = EXCLUDED.revoked_at,
                expires_at = EXCLUDED.expires_at,
                seq = nextval('warden_revocation_seq')
            WHERE warden_revocation.revoked_at < EXCLUDED.revoked_at
            "#
        }
    }
}

/// [`RevocationStorage`] backed by the `warden_revocation` table.
#[derive(Debug, Clone)]
pub struct PostgresRevocationStorage {
    pool: Arc<PgPool>,
}

impl PostgresRevocationStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn upsert(&self, entry: &RevocationEntry) -> StorageResult<bool> {
        let rows_affected = query(insert_sql(&entry.target))
            .bind(entry.target.kind())
            .bind(entry.target.id())
            .bind(entry.reason.as_str())
            .bind(entry.revoked_at)
            .bind(entry.expires_at)
            .execute(&*self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn select(&self, target: &RevocationTarget) -> StorageResult<Option<RevocationEntry>> {
        let row: Option<RevocationRow> = query_as(
            r#"
            SELECT target_kind, target_id, reason, revoked_at, expires_at
            FROM warden_revocation
            WHERE target_kind = $1 AND target_id = $2
            "#,
        )
        .bind(target.kind())
        .bind(target.id())
        .fetch_optional(&*self.pool)
        .await?;
        row.map(entry_from_row).transpose()
    }

    async fn current_version(&self) -> StorageResult<u64> {
        let (last_value, is_called): (i64, bool) =
            query_as("SELECT last_value, is_called FROM warden_revocation_seq")
                .fetch_one(&*self.pool)
                .await?;
        Ok(if is_called {
            u64::try_from(last_value).unwrap_or_default()
        } else {
            0
        })
    }

    async fn snapshot(&self, now: OffsetDateTime) -> StorageResult<RevocationFeed> {
        // The version is read first so it never claims entries the listing
        // below is missing.
        let version = self.current_version().await?;

        let rows: Vec<RevocationRow> = query_as(
            r#"
            SELECT target_kind, target_id, reason, revoked_at, expires_at
            FROM warden_revocation
            WHERE expires_at > $1
            ORDER BY revoked_at, seq
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await?;

        Ok(RevocationFeed {
            version,
            generated_at: Some(now),
            entries: rows
                .into_iter()
                .map(entry_from_row)
                .collect::<StorageResult<_>>()?,
        })
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM warden_revocation WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevocationStorage for PostgresRevocationStorage {
    async fn record(&self, entry: &RevocationEntry) -> AuthResult<bool> {
        Ok(self.upsert(entry).await?)
    }

    async fn find(&self, target: &RevocationTarget) -> AuthResult<Option<RevocationEntry>> {
        Ok(self.select(target).await?)
    }

    async fn feed(&self, now: OffsetDateTime) -> AuthResult<RevocationFeed> {
        Ok(self.snapshot(now).await?)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(self.delete_expired(now).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_row_conversion() {
        let now = OffsetDateTime::now_utc();
        let session_id = Uuid::new_v4();
        let row: RevocationRow = (
            "session".to_string(),
            session_id.to_string(),
            "logout".to_string(),
            now,
            now,
        );

        let entry = entry_from_row(row).unwrap();
        assert_eq!(entry.target, RevocationTarget::Session(session_id));
        assert_eq!(entry.reason, RevocationReason::Logout);
    }

    #[test]
    fn test_bad_target_is_corrupt_row() {
        let now = OffsetDateTime::now_utc();
        let row: RevocationRow = (
            "session".to_string(),
            "not-a-uuid".to_string(),
            "logout".to_string(),
            now,
            now,
        );
        assert!(matches!(
            entry_from_row(row).unwrap_err(),
            StorageError::CorruptRow(_)
        ));
    }

    #[test]
    fn test_only_subject_entries_are_replaced() {
        let session = insert_sql(&RevocationTarget::Session(Uuid::new_v4()));
        let subject = insert_sql(&RevocationTarget::Subject("user-1".into()));
        assert!(session.contains("DO NOTHING"));
        assert!(subject.contains("DO UPDATE"));
        assert!(subject.contains("warden_revocation.revoked_at < EXCLUDED.revoked_at"));
    }
}
