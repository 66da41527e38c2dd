mod common;

use common::*;
use starberry_idp::{AccessTokenClaims, AuthorizationOutcome, IdTokenClaims};

#[tokio::test]
async fn test_authorization_code_exchanged_exactly_once() {
    init_tracing();
    let clock = clock();
    let server = server(clock.clone());

    let outcome = server.handle_authorize(&app1_query("profile"), "alice").await;
    let redirect = outcome.redirect().expect("redirect expected");
    assert!(redirect.location().starts_with("https://app/cb?code="));
    assert_eq!(redirect.get("state"), Some("xyz"));
    let code = outcome.code().unwrap().to_string();

    let tokens = server.handle_token(&app1_exchange_form(&code), None).await.unwrap();
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 3600);
    assert_eq!(tokens.scope.as_deref(), Some("profile"));
    assert!(tokens.refresh_token.is_some());
    // No openid, no id token
    assert!(tokens.id_token.is_none());

    let header = jsonwebtoken::decode_header(&tokens.access_token).unwrap();
    assert_eq!(header.kid.as_deref(), Some("k1"));

    // Replay
    let err = server.handle_token(&app1_exchange_form(&code), None).await.unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.body.error, "invalid_grant");
}

#[tokio::test]
async fn test_access_token_claims() {
    let clock = clock();
    let server = server(clock.clone());
    let code = authorize_code(&server, &app1_query("profile api")).await;
    let tokens = server.handle_token(&app1_exchange_form(&code), None).await.unwrap();

    let claims: AccessTokenClaims = server
        .issuer()
        .verify_access_token(&tokens.access_token, "https://id.test/resources")
        .await
        .unwrap();
    assert_eq!(claims.iss, "https://id.test");
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.client_id, "app1");
    assert_eq!(claims.scope, "profile api");
    assert_eq!(claims.exp - claims.iat, 3600);
    assert!(!claims.jti.is_empty());
}

#[tokio::test]
async fn test_openid_scope_yields_id_token_with_nonce() {
    let clock = clock();
    let server = server(clock.clone());
    let query = format!("{}&nonce=n-0S6_WzA2Mj", app1_query("openid email"));
    let code = authorize_code(&server, &query).await;
    let tokens = server.handle_token(&app1_exchange_form(&code), None).await.unwrap();

    let id_token = tokens.id_token.expect("id token expected");
    let claims: IdTokenClaims = server.issuer().verify_id_token(&id_token, "app1").await.unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.aud, "app1");
    assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
    assert_eq!(claims.claims.get("email").and_then(|v| v.as_str()), Some("alice@example.com"));
    assert_eq!(claims.claims.get("email_verified").and_then(|v| v.as_bool()), Some(true));
    // Not released under the granted scopes
    assert!(claims.claims.get("name").is_none());
    assert!(claims.claims.get("phone_number").is_none());
}

#[tokio::test]
async fn test_unregistered_redirect_is_not_followed() {
    let server = server(clock());
    let query = format!(
        "client_id=app1&redirect_uri=https%3A%2F%2Fevil%2Fcb&response_type=code&scope=profile\
         &state=xyz&code_challenge={}&code_challenge_method=S256",
        challenge()
    );
    match server.handle_authorize(&query, "alice").await {
        AuthorizationOutcome::Error(resp) => {
            assert_eq!(resp.status, 400);
            assert_eq!(resp.body.error, "invalid_request");
        }
        AuthorizationOutcome::Redirect(r) => panic!("must not redirect, got {}", r.location()),
    }
}

#[tokio::test]
async fn test_unknown_client_is_a_direct_error() {
    let server = server(clock());
    let query = NO_PKCE_QUERY.replace("client_id=app1", "client_id=nobody");
    let outcome = server.handle_authorize(&query, "alice").await;
    assert!(matches!(outcome, AuthorizationOutcome::Error(_)));
}

#[tokio::test]
async fn test_invalid_scope_redirects_with_error_and_state() {
    let server = server(clock());
    let outcome = server.handle_authorize(&app1_query("profile admin"), "alice").await;
    let redirect = outcome.redirect().expect("validated redirect should be used");
    assert_eq!(redirect.redirect_uri, "https://app/cb");
    assert_eq!(redirect.get("error"), Some("invalid_scope"));
    assert_eq!(redirect.get("state"), Some("xyz"));
    assert!(redirect.get("code").is_none());
    assert!(outcome.code().is_none());
}

#[tokio::test]
async fn test_missing_pkce_is_rejected_when_required() {
    let server = server(clock());
    let outcome = server.handle_authorize(NO_PKCE_QUERY, "alice").await;
    assert_eq!(outcome.redirect().unwrap().get("error"), Some("invalid_request"));
}

#[tokio::test]
async fn test_unsupported_response_type() {
    let server = server(clock());
    let query = app1_query("profile").replace("response_type=code", "response_type=token");
    let outcome = server.handle_authorize(&query, "alice").await;
    assert_eq!(outcome.redirect().unwrap().get("error"), Some("unsupported_response_type"));
}

#[tokio::test]
async fn test_wrong_pkce_verifier_is_invalid_grant() {
    let server = server(clock());
    let code = authorize_code(&server, &app1_query("profile")).await;
    let form = app1_exchange_form(&code).replace(VERIFIER, &"A".repeat(48));
    let err = server.handle_token(&form, None).await.unwrap_err();
    assert_eq!(err.body.error, "invalid_grant");
}

#[tokio::test]
async fn test_redirect_uri_must_match_authorization_request() {
    let server = server(clock());
    let code = authorize_code(&server, &app1_query("profile")).await;
    let form = app1_exchange_form(&code).replace("app%2Fcb", "app%2Fother");
    let err = server.handle_token(&form, None).await.unwrap_err();
    assert_eq!(err.body.error, "invalid_grant");
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let clock = clock();
    let server = server(clock.clone());
    let code = authorize_code(&server, &app1_query("profile")).await;
    clock.advance(chrono::Duration::seconds(301));
    let err = server.handle_token(&app1_exchange_form(&code), None).await.unwrap_err();
    assert_eq!(err.body.error, "invalid_grant");
}

#[tokio::test]
async fn test_public_client_with_single_redirect_and_basic_auth() {
    let server = server(clock());
    // spa has two redirects, so it must name one
    let query = format!(
        "client_id=spa&response_type=code&scope=openid+profile\
         &code_challenge={}&code_challenge_method=S256",
        challenge()
    );
    let outcome = server.handle_authorize(&query, "alice").await;
    assert!(matches!(outcome, AuthorizationOutcome::Error(_)));

    let query = format!("{}&redirect_uri=https%3A%2F%2Fspa%2Fsilent", query);
    let code = authorize_code(&server, &query).await;
    let form = format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fspa%2Fsilent\
         &client_id=spa&code_verifier={}",
        code, VERIFIER
    );
    let tokens = server.handle_token(&form, None).await.unwrap();
    assert!(tokens.id_token.is_some());
    // spa is not allowed refresh tokens
    assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn test_client_secret_basic() {
    use base64::Engine;
    let server = server(clock());
    let code = authorize_code(&server, &app1_query("profile")).await;
    let form = format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp%2Fcb\
         &code_verifier={}",
        code, VERIFIER
    );
    let header = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("app1:{}", APP_SECRET))
    );
    let tokens = server.handle_token(&form, Some(&header)).await.unwrap();
    assert!(!tokens.access_token.is_empty());
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let server = server(clock());
    let form = format!(
        "grant_type=client_credentials&client_id=svc&client_secret={}",
        SERVICE_SECRET
    );
    let tokens = server.handle_token(&form, None).await.unwrap();
    assert_eq!(tokens.scope.as_deref(), Some("api.read api.write"));
    assert!(tokens.refresh_token.is_none());
    assert!(tokens.id_token.is_none());

    let claims = server
        .issuer()
        .verify_access_token(&tokens.access_token, "https://id.test/resources")
        .await
        .unwrap();
    assert_eq!(claims.sub, "svc");

    let narrowed = format!("{}&scope=api.read", form);
    let tokens = server.handle_token(&narrowed, None).await.unwrap();
    assert_eq!(tokens.scope.as_deref(), Some("api.read"));

    let too_wide = format!("{}&scope=api.admin", form);
    let err = server.handle_token(&too_wide, None).await.unwrap_err();
    assert_eq!(err.body.error, "invalid_scope");
}

#[tokio::test]
async fn test_grant_type_not_allowed_for_client() {
    let server = server(clock());
    let form = format!("grant_type=client_credentials&client_id=app1&client_secret={}", APP_SECRET);
    let err = server.handle_token(&form, None).await.unwrap_err();
    assert_eq!(err.body.error, "unauthorized_client");
}

const NO_PKCE_QUERY: &str =
    "client_id=app1&redirect_uri=https%3A%2F%2Fapp%2Fcb&response_type=code&scope=profile&state=s1";

fn plain_query(method: Option<&str>) -> String {
    let mut query = format!("{}&code_challenge={}", NO_PKCE_QUERY, VERIFIER);
    if let Some(method) = method {
        query.push_str(&format!("&code_challenge_method={}", method));
    }
    query
}

fn exchange_form(code: &str, verifier: Option<&str>) -> String {
    let mut form = format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp%2Fcb\
         &client_id=app1&client_secret={}",
        code, APP_SECRET
    );
    if let Some(verifier) = verifier {
        form.push_str(&format!("&code_verifier={}", verifier));
    }
    form
}

#[tokio::test]
async fn test_code_flow_without_pkce_when_not_required() {
    let mut config = config();
    config.require_pkce = false;
    let server = server_with(config, clock());

    let code = authorize_code(&server, NO_PKCE_QUERY).await;
    let tokens = server.handle_token(&exchange_form(&code, None), None).await.unwrap();
    assert_eq!(tokens.scope.as_deref(), Some("profile"));
}

#[tokio::test]
async fn test_verifier_for_grant_without_challenge_is_invalid_grant() {
    let mut config = config();
    config.require_pkce = false;
    let server = server_with(config, clock());

    let code = authorize_code(&server, NO_PKCE_QUERY).await;
    let err = server.handle_token(&exchange_form(&code, Some(VERIFIER)), None).await.unwrap_err();
    assert_eq!(err.body.error, "invalid_grant");
}

#[tokio::test]
async fn test_omitted_challenge_method_means_plain_and_is_refused() {
    let server = server(clock());
    let outcome = server.handle_authorize(&plain_query(None), "alice").await;
    let redirect = outcome.redirect().expect("validated redirect should be used");
    assert_eq!(redirect.get("error"), Some("invalid_request"));
    assert_eq!(redirect.get("state"), Some("s1"));

    let outcome = server.handle_authorize(&plain_query(Some("plain")), "alice").await;
    assert_eq!(outcome.redirect().unwrap().get("error"), Some("invalid_request"));
}

#[tokio::test]
async fn test_plain_pkce_exchange_when_allowed() {
    let mut config = config();
    config.allow_plain_pkce = true;
    let server = server_with(config, clock());

    for method in [None, Some("plain")] {
        let code = authorize_code(&server, &plain_query(method)).await;

        // The stored challenge is the verifier itself, not its hash
        let hashed = exchange_form(&code, Some(&challenge()));
        let err = server.handle_token(&hashed, None).await.unwrap_err();
        assert_eq!(err.body.error, "invalid_grant");

        let code = authorize_code(&server, &plain_query(method)).await;
        let form = exchange_form(&code, Some(VERIFIER));
        let tokens = server.handle_token(&form, None).await.unwrap();
        assert!(tokens.refresh_token.is_some());
    }
}
