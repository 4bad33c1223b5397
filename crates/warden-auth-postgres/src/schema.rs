//! Table definitions.
//!
//! Statements are executed one at a time; prepared statements cannot carry
//! more than one command.

use sqlx_core::query::query;
use tracing::debug;

use crate::{PgPool, StorageResult};

pub const SESSION_TABLE: &str = "warden_session";
pub const REFRESH_TOKEN_TABLE: &str = "warden_refresh_token";
pub const REVOCATION_TABLE: &str = "warden_revocation";
pub const REVOCATION_SEQUENCE: &str = "warden_revocation_seq";

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS warden_session (
        session_id UUID PRIMARY KEY,
        subject_id TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        organization_id TEXT,
        roles JSONB NOT NULL DEFAULT '[]'::jsonb,
        device_fingerprint TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        last_seen_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        current_refresh_family UUID NOT NULL,
        revoked_at TIMESTAMPTZ,
        revocation_reason TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_warden_session_subject ON warden_session (subject_id)",
    "CREATE INDEX IF NOT EXISTS idx_warden_session_expires ON warden_session (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS warden_refresh_token (
        jti TEXT PRIMARY KEY,
        session_id UUID NOT NULL,
        family_id UUID NOT NULL,
        parent_jti TEXT,
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        consumed_at TIMESTAMPTZ,
        status TEXT NOT NULL,
        version BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_warden_refresh_token_session ON warden_refresh_token (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_warden_refresh_token_expires ON warden_refresh_token (expires_at)",
    "CREATE SEQUENCE IF NOT EXISTS warden_revocation_seq",
    r#"
    CREATE TABLE IF NOT EXISTS warden_revocation (
        target_kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        reason TEXT NOT NULL,
        revoked_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        seq BIGINT NOT NULL DEFAULT nextval('warden_revocation_seq'),
        PRIMARY KEY (target_kind, target_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_warden_revocation_expires ON warden_revocation (expires_at)",
];

/// Creates every table, index and sequence the backend needs.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> StorageResult<()> {
    for statement in STATEMENTS {
        query(*statement).execute(pool).await?;
    }
    debug!(
        tables = ?[SESSION_TABLE, REFRESH_TOKEN_TABLE, REVOCATION_TABLE],
        "Auth storage schema ensured"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_single_commands() {
        for statement in STATEMENTS {
            assert!(!statement.trim().trim_end_matches(';').contains(';'));
        }
    }

    #[test]
    fn test_every_table_is_created() {
        for table in [SESSION_TABLE, REFRESH_TOKEN_TABLE, REVOCATION_TABLE] {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(STATEMENTS.iter().any(|s| s.contains(&ddl)), "{table}");
        }
        assert!(STATEMENTS.iter().any(|s| s.contains(REVOCATION_SEQUENCE)));
    }
}
