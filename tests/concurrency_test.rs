mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use futures::future::join_all;
use starberry_idp::{GrantError, GrantStore, IdpError, InMemoryGrantStore, RefreshToken};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_code_exchange_has_one_winner() {
    init_tracing();
    let server = Arc::new(server(clock()));
    let code = authorize_code(&server, &app1_query("profile")).await;

    let attempts = (0..16).map(|_| {
        let server = server.clone();
        let form = app1_exchange_form(&code);
        tokio::spawn(async move { server.handle_token(&form, None).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.body.error, "invalid_grant");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consume_reports_already_consumed() {
    let clock = clock();
    let store = Arc::new(InMemoryGrantStore::new(clock.clone()));
    let grant = profile_grant(&clock);
    let code = store.issue_code(grant).await.unwrap();

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let code = code.clone();
        tokio::spawn(async move { store.consume_code(&code).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == GrantError::AlreadyConsumed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_rotation_has_one_winner() {
    let clock = clock();
    let store = Arc::new(InMemoryGrantStore::new(clock.clone()));
    let token = store
        .issue_refresh_token(api_chain(&clock, Duration::days(1)))
        .await
        .unwrap();

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let value = token.token.clone();
        tokio::spawn(async move { store.rotate_refresh_token(&value, "app1", None).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    // Exactly one rotation succeeds; the losers replayed a rotated-out token
    // and revoked the chain, so the winner's successor is dead too.
    let winners: Vec<&RefreshToken> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            IdpError::Grant(GrantError::Revoked) | IdpError::Grant(GrantError::NotFound)
        ));
    }
    let successor = winners[0].token.clone();
    assert!(store.rotate_refresh_token(&successor, "app1", None).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_racing_revocation_leaves_no_live_token() {
    let clock = clock();
    let store = Arc::new(InMemoryGrantStore::new(clock.clone()));

    for _ in 0..64 {
        let token = store
            .issue_refresh_token(api_chain(&clock, Duration::days(1)))
            .await
            .unwrap();
        let rotate = {
            let store = store.clone();
            let value = token.token.clone();
            tokio::spawn(async move { store.rotate_refresh_token(&value, "app1", None).await })
        };
        let revoke = {
            let store = store.clone();
            let chain_id = token.chain_id.clone();
            tokio::spawn(async move { store.revoke_chain(&chain_id).await })
        };
        let rotated = rotate.await.unwrap();
        revoke.await.unwrap().unwrap();

        // Once the chain is revoked nothing issued into it may survive
        if let Ok(successor) = rotated {
            assert!(store.find_refresh_token(&successor.token).await.is_none());
        }
    }
    assert_eq!(store.refresh_token_count(), 0);
}
