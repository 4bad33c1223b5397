//! Concurrent rotation of a single refresh token.

use std::sync::Arc;

use tokio::task::JoinSet;
use warden_auth::prelude::*;

const CONTENDERS: usize = 24;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_exactly_one_winner() {
    let authority = Arc::new(Authority::builder(AuthConfig::default()).build().unwrap());
    let minted = authority.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
    let refresh_token = Arc::new(minted.tokens.refresh_token.clone());

    let barrier = Arc::new(tokio::sync::Barrier::new(CONTENDERS));
    let mut tasks = JoinSet::new();
    for _ in 0..CONTENDERS {
        let authority = authority.clone();
        let refresh_token = refresh_token.clone();
        let barrier = barrier.clone();
        tasks.spawn(async move {
            barrier.wait().await;
            authority.rotation.rotate(&refresh_token).await
        });
    }

    let mut winners = 0;
    let mut reuse = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(AuthError::ReuseDetected) => reuse += 1,
            Err(other) => panic!("unexpected rotation outcome: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(reuse, CONTENDERS - 1);

    // The losers' replay detection revoked the whole session.
    assert!(authority.store.is_revoked(minted.session.session_id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_sessions_rotate_concurrently() {
    let authority = Arc::new(Authority::builder(AuthConfig::default()).build().unwrap());

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let authority = authority.clone();
        tasks.spawn(async move {
            let minted = authority
                .issuer
                .mint(&Principal::new(format!("user-{i}"), "t1"))
                .await?;
            let mut refresh = minted.tokens.refresh_token;
            for _ in 0..3 {
                refresh = authority.rotation.rotate(&refresh).await?.refresh_token;
            }
            Ok::<_, AuthError>(minted.session.session_id)
        });
    }

    while let Some(result) = tasks.join_next().await {
        let session_id = result.unwrap().unwrap();
        assert!(!authority.store.is_revoked(session_id).await.unwrap());
        assert_eq!(authority.store.refresh_chain(session_id).await.unwrap().len(), 4);
    }
}
