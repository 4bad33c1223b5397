//! End-to-end flows across issuer, rotation, verification and revocation,
//! driven by a manual clock against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use warden_auth::audit::{AuditEventType, MemoryAuditSink};
use warden_auth::prelude::*;

const MINUTE: Duration = Duration::from_secs(60);

struct Harness {
    clock: Arc<ManualClock>,
    audit: Arc<MemoryAuditSink>,
    authority: Authority,
}

fn harness() -> Harness {
    let mut config = AuthConfig::default();
    config.issuer = "https://auth.warden.test".to_string();
    config.audience = "https://api.warden.test".to_string();
    config.signing.propagation_delay = Some(MINUTE * 10);
    config.edge.revocation_refresh_interval = Duration::from_secs(30);
    config.edge.feed_cache_ttl = Duration::ZERO;

    let clock = Arc::new(ManualClock::starting_now());
    let audit = Arc::new(MemoryAuditSink::new());
    let authority = Authority::builder(config)
        .clock(clock.clone())
        .audit_sink(audit.clone())
        .build()
        .expect("authority builds");

    Harness {
        clock,
        audit,
        authority,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

// =============================================================================
// Claims
// =============================================================================

#[tokio::test]
async fn test_claims_unchanged_until_expiry() {
    let h = harness();
    let principal = Principal::new("u1", "tenant-a")
        .with_organization("org-1")
        .with_roles(["editor", "reader"]);
    let minted = h.authority.issuer.mint(&principal).await.unwrap();

    let first = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap();
    assert_eq!(first.claims.sub, "u1");
    assert_eq!(first.claims.tid, "tenant-a");
    assert_eq!(first.claims.oid.as_deref(), Some("org-1"));
    assert_eq!(first.claims.roles, vec!["editor", "reader"]);
    assert_eq!(first.claims.sid, minted.session.session_id);

    for minutes in [1, 7, 14] {
        h.clock.set(minted.session.created_at + MINUTE * minutes);
        let later = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap();
        assert_eq!(later.claims, first.claims);
    }

    h.clock.set(minted.session.created_at + MINUTE * 16);
    let err = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ExpiredToken));
    assert_eq!(err.recovery(), RecoveryAction::Refresh);
}

// =============================================================================
// Refresh rotation and replay
// =============================================================================

#[tokio::test]
async fn test_replayed_refresh_revokes_whole_session() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    let session_id = minted.session.session_id;

    // A′ -> B′
    let b = h.authority.rotation.rotate(&minted.tokens.refresh_token).await.unwrap();
    assert!(h.authority.verifier.verify(&b.access_token).await.is_ok());

    // Replay A′
    let err = h.authority.rotation.rotate(&minted.tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ReuseDetected));

    assert!(h.authority.store.is_revoked(session_id).await.unwrap());
    for record in h.authority.store.refresh_chain(session_id).await.unwrap() {
        assert_eq!(record.status.as_str(), "revoked");
    }

    let err = h.authority.verifier.verify(&b.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    let err = h.authority.rotation.rotate(&b.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ReuseDetected));

    settle().await;
    let alerts = h.audit.events_of(AuditEventType::RefreshReused);
    assert!(!alerts.is_empty());
    assert_eq!(alerts[0].session_id, session_id);
    assert_eq!(alerts[0].subject_id, "u1");
}

#[tokio::test]
async fn test_fifteen_minute_scenario() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    assert_eq!(minted.tokens.expires_in, 15 * 60);

    h.clock.advance(MINUTE * 20);
    let err = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::ExpiredToken));

    let pair = h.authority.rotation.rotate(&minted.tokens.refresh_token).await.unwrap();
    let verified = h.authority.verifier.verify(&pair.access_token).await.unwrap();
    assert_eq!(verified.claims.sub, "u1");
    assert_eq!(verified.claims.sid, minted.session.session_id);
}

// =============================================================================
// Key rotation
// =============================================================================

#[tokio::test]
async fn test_key_rotation_round_trip() {
    let h = harness();
    let keys = &h.authority.keys;
    let old_kid = keys.active_kid();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

    let next = keys.rotate().await.unwrap();
    assert!(keys.verification_set().contains(&next.kid));

    // Just before the overlap ends the old key still signs and verifies.
    h.clock.advance(MINUTE * 10 - Duration::from_secs(1));
    assert!(keys.promote_due().await.unwrap().is_none());
    assert!(h.authority.verifier.verify(&minted.tokens.access_token).await.is_ok());

    h.clock.advance(Duration::from_secs(1));
    keys.promote_due().await.unwrap();
    assert_eq!(keys.active_kid(), next.kid);
    assert!(h.authority.verifier.verify(&minted.tokens.access_token).await.is_ok());

    // New tokens are signed by the promoted key.
    let fresh = h.authority.issuer.mint(&Principal::new("u2", "t1")).await.unwrap();
    assert!(h.authority.verifier.verify(&fresh.tokens.access_token).await.is_ok());

    // Retired key is purged once its tokens can no longer be valid.
    h.clock.advance(MINUTE * 16);
    assert_eq!(keys.purge_expired().await, vec![old_kid.clone()]);
    assert!(!keys.verification_set().contains(&old_kid));

    let err = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::UnknownKey { .. }));
}

#[tokio::test]
async fn test_compromised_key_is_rejected_immediately() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    let compromised = h.authority.keys.active_kid();

    let replacement = h.authority.keys.emergency_revoke(&compromised).await.unwrap();
    assert_ne!(replacement.kid, compromised);

    let err = h.authority.verifier.verify(&minted.tokens.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::UnknownKey { .. }));

    // The session survives; a refresh yields a token signed by the new key.
    let pair = h.authority.rotation.rotate(&minted.tokens.refresh_token).await.unwrap();
    assert!(h.authority.verifier.verify(&pair.access_token).await.is_ok());
}

// =============================================================================
// Revocation
// =============================================================================

#[tokio::test]
async fn test_revocation_visibility() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    let token = &minted.tokens.access_token;

    assert!(h.authority.verifier.verify(token).await.is_ok());
    assert!(h.authority.edge_verifier.verify(token).await.is_ok());

    h.authority
        .revocations
        .revoke(minted.session.session_id, RevocationReason::Logout)
        .await
        .unwrap();

    // Authoritative: immediate.
    let err = h.authority.verifier.verify(token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));

    // Edge: not instant, but within the refresh interval.
    assert!(h.authority.edge_verifier.verify(token).await.is_ok());
    h.clock.advance(Duration::from_secs(29));
    assert!(h.authority.edge_verifier.verify(token).await.is_ok());
    h.clock.advance(Duration::from_secs(1));
    let err = h.authority.edge_verifier.verify(token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    let session_id = minted.session.session_id;

    assert!(h.authority.revocations.revoke(session_id, RevocationReason::Admin).await.unwrap());
    let feed_after_first = h.authority.revocations.feed().await.unwrap();
    let session_after_first = h.authority.store.get(session_id).await.unwrap().unwrap();

    h.clock.advance(MINUTE);
    assert!(!h.authority.revocations.revoke(session_id, RevocationReason::Admin).await.unwrap());
    let feed_after_second = h.authority.revocations.feed().await.unwrap();
    let session_after_second = h.authority.store.get(session_id).await.unwrap().unwrap();

    assert_eq!(feed_after_first.entries, feed_after_second.entries);
    assert_eq!(session_after_first.revoked_at, session_after_second.revoked_at);

    settle().await;
    assert_eq!(h.audit.events_of(AuditEventType::SessionRevoked).len(), 1);
}

#[tokio::test]
async fn test_sign_out_everywhere() {
    let h = harness();
    let phone = h.authority.issuer.mint(&Principal::new("u1", "t1").with_device("phone")).await.unwrap();
    let laptop = h.authority.issuer.mint(&Principal::new("u1", "t1").with_device("laptop")).await.unwrap();
    let other = h.authority.issuer.mint(&Principal::new("u2", "t1")).await.unwrap();

    let revoked = h.authority.revocations.revoke_all("u1").await.unwrap();
    assert_eq!(revoked.len(), 2);

    for token in [&phone.tokens.access_token, &laptop.tokens.access_token] {
        assert!(matches!(
            h.authority.verifier.verify(token).await.unwrap_err(),
            AuthError::Revoked
        ));
        assert!(matches!(
            h.authority.edge_verifier.verify(token).await.unwrap_err(),
            AuthError::Revoked
        ));
    }
    assert!(h.authority.verifier.verify(&other.tokens.access_token).await.is_ok());

    // A new sign-in after the revocation is unaffected.
    h.clock.advance(Duration::from_secs(1));
    let again = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    assert!(h.authority.edge_verifier.verify(&again.tokens.access_token).await.is_ok());
}

#[tokio::test]
async fn test_verification_response_wire_form() {
    let h = harness();
    let minted = h.authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

    let ok = h.authority.verifier.check(&minted.tokens.access_token).await;
    let json = serde_json::to_value(&ok).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["claims"]["sub"], "u1");

    h.clock.advance(MINUTE * 20);
    let expired = h.authority.verifier.check(&minted.tokens.access_token).await;
    let json = serde_json::to_value(&expired).unwrap();
    assert_eq!(json["valid"], false);
    assert_eq!(json["errorKind"], "expired_token");
}
