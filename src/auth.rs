//! OAuth token exchange against UAA.
//!
//! [`UaaAuthenticator`] logs in (password or client-credentials grant) and
//! refreshes expired access tokens. Refreshes are single-flight: callers that
//! show up with the same stale token while an exchange is running wait on
//! that exchange instead of starting their own, and a caller whose stale
//! token has already been replaced gets the stored pair without touching the
//! network.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{is_certificate_error, AuthError};
use crate::gateway::host_of;
use crate::redact::sanitize;
use crate::store::{ConfigStore, Credentials, GrantType};

/// Access token (with its type prefix) and the refresh token that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Replaces a rejected access token. This is the gateway's only dependency on
/// the auth server, so tests can swap in their own.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// `stale_access_token` is the exact `Authorization` value the server
    /// rejected. Implementations persist the new pair before returning it.
    async fn refresh(&self, stale_access_token: &str) -> Result<TokenPair, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct UaaErrorBody {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
enum Grant {
    Password { username: String, password: String },
    RefreshToken(String),
    ClientCredentials,
}

impl Grant {
    fn name(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::RefreshToken(_) => "refresh_token",
            Grant::ClientCredentials => "client_credentials",
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        match self {
            Grant::Password { username, password } => vec![
                ("grant_type", "password"),
                ("username", username.as_str()),
                ("password", password.as_str()),
                ("scope", ""),
            ],
            Grant::RefreshToken(token) => vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", token.as_str()),
                ("scope", ""),
            ],
            Grant::ClientCredentials => vec![("grant_type", "client_credentials")],
        }
    }
}

/// Map a failed token response onto the auth taxonomy.
fn classify_failure(grant: &Grant, status: u16, body: &[u8]) -> AuthError {
    let parsed: UaaErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let code = parsed.error.as_ref().map(error_text).unwrap_or_default();
    let description = parsed
        .error_description
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

    match (grant, status, code.as_str()) {
        (_, _, "invalid_client") => AuthError::InvalidCredentials(description),
        (Grant::RefreshToken(_), 400 | 401, "invalid_token" | "invalid_grant") | (Grant::RefreshToken(_), 401, _) => {
            AuthError::InvalidRefreshToken(description)
        }
        (Grant::Password { .. } | Grant::ClientCredentials, 401, _) => AuthError::InvalidCredentials(description),
        _ => AuthError::Rejected {
            status,
            code,
            description,
        },
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(inner) => inner
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

/// Talks to `{token_endpoint}/oauth/token`. Cheap to clone.
#[derive(Clone)]
struct TokenClient {
    http: reqwest::Client,
    config: Arc<ConfigStore>,
}

impl TokenClient {
    async fn exchange(&self, grant: &Grant, client_id: &str, client_secret: &str) -> Result<TokenPair, AuthError> {
        let endpoint = self.config.token_endpoint();
        if endpoint.is_empty() {
            return Err(AuthError::NoTokenEndpoint);
        }
        let url = format!("{}/oauth/token", endpoint);
        let transport = |e: reqwest::Error| {
            if is_certificate_error(&e) {
                AuthError::InvalidSslCert(host_of(&url))
            } else {
                AuthError::Network(e.to_string())
            }
        };

        debug!(grant = grant.name(), %url, "requesting token");

        let resp = self
            .http
            .post(&url)
            .basic_auth(client_id, Some(client_secret))
            .header(ACCEPT, "application/json")
            .form(&grant.form())
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(transport)?;
        trace!(status, body = %sanitize(&String::from_utf8_lossy(&body)), "RESPONSE");

        if !(200..300).contains(&status) {
            return Err(classify_failure(grant, status, &body));
        }

        let value: Value = serde_json::from_slice(&body).map_err(|e| AuthError::Decode(e.to_string()))?;

        // UAA occasionally wraps upstream failures in a 200.
        if let Some(error) = value.get("error") {
            let description = error
                .get("error_description")
                .or_else(|| value.get("error_description"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(AuthError::Rejected {
                status,
                code: error_text(error),
                description,
            });
        }

        let token: TokenResponse = serde_json::from_value(value).map_err(|e| AuthError::Decode(e.to_string()))?;

        Ok(TokenPair {
            access_token: format!("{} {}", token.token_type.to_lowercase(), token.access_token),
            refresh_token: token.refresh_token.unwrap_or_default(),
        })
    }

    /// Run the grant matching how the user logged in and store the result.
    ///
    /// The result is only stored if the session it was started for is still
    /// current; after a logout or an endpoint change the caller gets
    /// `NotLoggedIn` and the store is left alone.
    async fn refresh_grant(self, credentials: Credentials) -> Result<TokenPair, AuthError> {
        let target = self.config.read(|d| d.endpoints.target.clone());
        let grant = match credentials.grant_type {
            GrantType::ClientCredentials => Grant::ClientCredentials,
            GrantType::Password if credentials.refresh_token.is_empty() => return Err(AuthError::NotLoggedIn),
            GrantType::Password => Grant::RefreshToken(credentials.refresh_token.clone()),
        };

        info!(grant = grant.name(), "refreshing access token");

        let mut pair = match self
            .exchange(&grant, &credentials.client_id, &credentials.client_secret)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return Err(e);
            }
        };

        if pair.refresh_token.is_empty() {
            pair.refresh_token = credentials.refresh_token;
        }

        let stored = self.config.replace_tokens(
            &target,
            &credentials.access_token,
            &pair.access_token,
            &pair.refresh_token,
        );
        if !stored {
            warn!("session changed during token refresh, discarding new tokens");
            return Err(AuthError::NotLoggedIn);
        }

        Ok(pair)
    }
}

type RefreshOutcome = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

struct InFlight {
    stale: String,
    outcome: RefreshOutcome,
}

/// Logs in against UAA and keeps the stored tokens fresh.
pub struct UaaAuthenticator {
    client: TokenClient,
    in_flight: Mutex<Option<InFlight>>,
}

impl UaaAuthenticator {
    pub fn new(config: Arc<ConfigStore>, http: reqwest::Client) -> Self {
        Self {
            client: TokenClient { http, config },
            in_flight: Mutex::new(None),
        }
    }

    /// Password grant with the configured OAuth client.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let credentials = self.client.config.credentials();
        let grant = Grant::Password {
            username: username.to_string(),
            password: password.to_string(),
        };

        let pair = self
            .client
            .exchange(&grant, &credentials.client_id, &credentials.client_secret)
            .await?;

        self.client.config.update(|d| {
            d.credentials.access_token = pair.access_token.clone();
            d.credentials.refresh_token = pair.refresh_token.clone();
            d.credentials.grant_type = GrantType::Password;
        });
        info!("authenticated with password grant");

        Ok(pair)
    }

    /// Client-credentials grant. The client id/secret are stored so later
    /// refreshes can repeat the grant.
    pub async fn authenticate_client(&self, client_id: &str, client_secret: &str) -> Result<TokenPair, AuthError> {
        let pair = self
            .client
            .exchange(&Grant::ClientCredentials, client_id, client_secret)
            .await?;

        self.client.config.update(|d| {
            d.credentials.access_token = pair.access_token.clone();
            d.credentials.refresh_token = pair.refresh_token.clone();
            d.credentials.client_id = client_id.to_string();
            d.credentials.client_secret = client_secret.to_string();
            d.credentials.grant_type = GrantType::ClientCredentials;
        });
        info!(client_id, "authenticated with client credentials");

        Ok(pair)
    }
}

#[async_trait]
impl TokenRefresher for UaaAuthenticator {
    async fn refresh(&self, stale_access_token: &str) -> Result<TokenPair, AuthError> {
        let outcome = {
            let mut in_flight = self.in_flight.lock();
            let current = self.client.config.credentials();

            if !current.access_token.is_empty() && current.access_token != stale_access_token {
                debug!("access token already replaced, skipping refresh");
                return Ok(TokenPair {
                    access_token: current.access_token,
                    refresh_token: current.refresh_token,
                });
            }

            match in_flight.as_ref() {
                Some(running) if running.stale == stale_access_token => {
                    debug!("joining in-flight token refresh");
                    running.outcome.clone()
                }
                _ => {
                    let outcome = self.client.clone().refresh_grant(current).boxed().shared();
                    *in_flight = Some(InFlight {
                        stale: stale_access_token.to_string(),
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        let result = outcome.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|running| running.outcome.ptr_eq(&outcome)) {
            *in_flight = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_refresh_token_is_fatal() {
        let body = br#"{"error": "invalid_token", "error_description": "Invalid refresh token (expired): eyJhbG"}"#;
        let err = classify_failure(&Grant::RefreshToken("r".into()), 401, body);

        assert_eq!(
            err,
            AuthError::InvalidRefreshToken("Invalid refresh token (expired): eyJhbG".into())
        );
        assert!(err.requires_login());
    }

    #[test]
    fn invalid_grant_on_refresh_is_invalid_refresh_token() {
        let body = br#"{"error": "invalid_grant", "error_description": "revoked"}"#;
        let err = classify_failure(&Grant::RefreshToken("r".into()), 400, body);
        assert!(matches!(err, AuthError::InvalidRefreshToken(_)));
    }

    #[test]
    fn bad_password_is_invalid_credentials() {
        let grant = Grant::Password {
            username: "u".into(),
            password: "p".into(),
        };
        let err = classify_failure(&grant, 401, br#"{"error": "unauthorized", "error_description": "Bad credentials"}"#);
        assert_eq!(err, AuthError::InvalidCredentials("Bad credentials".into()));
    }

    #[test]
    fn bad_client_is_invalid_credentials_for_any_grant() {
        let err = classify_failure(&Grant::RefreshToken("r".into()), 401, br#"{"error": "invalid_client"}"#);
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
    }

    #[test]
    fn server_failures_are_rejections_with_raw_body() {
        let err = classify_failure(&Grant::ClientCredentials, 503, b"upstream down");
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 503,
                code: String::new(),
                description: "upstream down".into(),
            }
        );
    }

    #[test]
    fn nested_error_objects_are_flattened() {
        let nested = serde_json::json!({"error": "rest_client_error", "error_description": "I/O error"});
        assert_eq!(error_text(&nested), "rest_client_error");
        assert_eq!(error_text(&Value::from("invalid_token")), "invalid_token");
    }

    #[test]
    fn grant_forms_match_uaa_contract() {
        assert_eq!(
            Grant::RefreshToken("tok".into()).form(),
            vec![("grant_type", "refresh_token"), ("refresh_token", "tok"), ("scope", "")]
        );
        assert_eq!(Grant::ClientCredentials.form(), vec![("grant_type", "client_credentials")]);
    }
}
