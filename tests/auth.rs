mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cf::auth::{TokenRefresher, UaaAuthenticator};
use cf::error::AuthError;
use cf::store::{ConfigStore, GrantType};

use common::{logged_in_config, token_body, FRESH, STALE};

fn authenticator(config: &Arc<ConfigStore>) -> Arc<UaaAuthenticator> {
    Arc::new(UaaAuthenticator::new(config.clone(), reqwest::Client::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_share_one_exchange() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("fresh-token", "refresh-2"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&config);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.refresh(STALE).await })
        })
        .collect();

    for handle in handles {
        let pair = handle.await.unwrap().unwrap();
        assert_eq!(pair.access_token, FRESH);
        assert_eq!(pair.refresh_token, "refresh-2");
    }

    // A straggler still holding the stale token gets the stored pair.
    let late = auth.refresh(STALE).await.unwrap();
    assert_eq!(late.access_token, FRESH);

    assert_eq!(config.access_token(), FRESH);
    assert_eq!(config.refresh_token(), "refresh-2");
}

#[tokio::test]
async fn rejected_refresh_token_leaves_tokens_untouched() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Invalid refresh token (expired): eyJhbGciOi"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = authenticator(&config).refresh(STALE).await.unwrap_err();

    assert!(matches!(err, AuthError::InvalidRefreshToken(_)));
    assert!(err.requires_login());
    assert_eq!(config.access_token(), STALE);
    assert_eq!(config.refresh_token(), "refresh-1");
}

#[tokio::test]
async fn failure_is_shared_and_the_next_refresh_tries_again() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("uaa down"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-token", "refresh-2")))
        .mount(&server)
        .await;

    let auth = authenticator(&config);

    let err = auth.refresh(STALE).await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 500, .. }));

    let pair = auth.refresh(STALE).await.unwrap();
    assert_eq!(pair.access_token, FRESH);
}

#[tokio::test]
async fn password_login_stores_tokens() {
    let server = MockServer::start().await;
    let config = Arc::new(ConfigStore::in_memory());
    config.update(|d| {
        d.endpoints.target = server.uri();
        d.endpoints.authorization_endpoint = server.uri();
    });

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        // "cf" client with an empty secret
        .and(header("authorization", "Basic Y2Y6"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=admin"))
        .and(body_string_contains("password=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-token", "refresh-2")))
        .expect(1)
        .mount(&server)
        .await;

    let pair = authenticator(&config).authenticate("admin", "s3cret").await.unwrap();

    assert_eq!(pair.access_token, FRESH);
    let credentials = config.credentials();
    assert_eq!(credentials.access_token, FRESH);
    assert_eq!(credentials.refresh_token, "refresh-2");
    assert_eq!(credentials.grant_type, GrantType::Password);
    assert!(config.is_logged_in());
}

#[tokio::test]
async fn bad_password_is_invalid_credentials() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());
    config.update(|d| d.credentials = Default::default());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": "unauthorized", "error_description": "Bad credentials"})),
        )
        .mount(&server)
        .await;

    let err = authenticator(&config).authenticate("admin", "wrong").await.unwrap_err();

    assert_eq!(err, AuthError::InvalidCredentials("Bad credentials".into()));
    assert!(!config.is_logged_in());
}

#[tokio::test]
async fn client_credentials_are_stored_and_reused_for_refresh() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "client-token",
            "token_type": "bearer",
            "expires_in": 43199
        })))
        .expect(2)
        .mount(&server)
        .await;

    let auth = authenticator(&config);
    auth.authenticate_client("my-client", "my-secret").await.unwrap();

    let credentials = config.credentials();
    assert_eq!(credentials.access_token, "bearer client-token");
    assert_eq!(credentials.client_id, "my-client");
    assert_eq!(credentials.client_secret, "my-secret");
    assert_eq!(credentials.grant_type, GrantType::ClientCredentials);

    let pair = auth.refresh("bearer client-token").await.unwrap();
    assert_eq!(pair.access_token, "bearer client-token");
}

#[tokio::test]
async fn missing_refresh_token_in_response_keeps_the_old_one() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;

    authenticator(&config).refresh(STALE).await.unwrap();

    assert_eq!(config.access_token(), FRESH);
    assert_eq!(config.refresh_token(), "refresh-1");
}

#[tokio::test]
async fn errors_masked_as_success_are_rejected() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "upstream_error",
            "error_description": "LDAP unavailable"
        })))
        .mount(&server)
        .await;

    let err = authenticator(&config).refresh(STALE).await.unwrap_err();

    assert_eq!(
        err,
        AuthError::Rejected {
            status: 200,
            code: "upstream_error".into(),
            description: "LDAP unavailable".into(),
        }
    );
    assert_eq!(config.access_token(), STALE);
}

#[tokio::test]
async fn nothing_to_refresh_with_is_not_logged_in() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());
    config.set_tokens(STALE, "");

    let err = authenticator(&config).refresh(STALE).await.unwrap_err();

    assert_eq!(err, AuthError::NotLoggedIn);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn no_token_endpoint_is_reported() {
    let config = Arc::new(ConfigStore::in_memory());
    config.set_tokens(STALE, "refresh-1");

    let err = authenticator(&config).refresh(STALE).await.unwrap_err();
    assert_eq!(err, AuthError::NoTokenEndpoint);
}

#[tokio::test]
async fn unreachable_uaa_is_a_network_error() {
    let config = logged_in_config("http://127.0.0.1:1");

    let err = authenticator(&config).refresh(STALE).await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
}

async fn mount_slow_refresh(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("fresh-token", "refresh-2"))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn logout_during_refresh_is_not_undone() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());
    mount_slow_refresh(&server).await;

    let auth = authenticator(&config);
    let logout = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        config.clear_session();
    };
    let (result, ()) = tokio::join!(auth.refresh(STALE), logout);

    assert_eq!(result.unwrap_err(), AuthError::NotLoggedIn);
    assert!(!config.is_logged_in());
    assert_eq!(config.refresh_token(), "");
}

#[tokio::test]
async fn retarget_during_refresh_keeps_the_new_target_clean() {
    let server = MockServer::start().await;
    let config = logged_in_config(&server.uri());
    mount_slow_refresh(&server).await;

    let auth = authenticator(&config);
    let retarget = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        config.update(|d| d.endpoints.target = "https://api.other.example.com".into());
    };
    let (result, ()) = tokio::join!(auth.refresh(STALE), retarget);

    assert_eq!(result.unwrap_err(), AuthError::NotLoggedIn);
    assert_eq!(config.api_endpoint(), "https://api.other.example.com");
    assert_eq!(config.access_token(), "");
    assert_eq!(config.refresh_token(), "");
}
