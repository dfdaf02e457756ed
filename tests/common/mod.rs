#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cf::auth::{TokenPair, TokenRefresher};
use cf::config::Settings;
use cf::error::AuthError;
use cf::gateway::{build_http_client, ApiFlavor, Gateway};
use cf::store::ConfigStore;

pub const STALE: &str = "bearer stale-token";
pub const FRESH: &str = "bearer fresh-token";

pub fn settings() -> Settings {
    Settings {
        polling_throttle: Duration::from_millis(10),
        ..Settings::default()
    }
}

/// In-memory config targeting `uri` for both CC and UAA, logged in with the stale token.
pub fn logged_in_config(uri: &str) -> Arc<ConfigStore> {
    let config = Arc::new(ConfigStore::in_memory());
    config.update(|d| {
        d.endpoints.target = uri.to_string();
        d.endpoints.authorization_endpoint = uri.to_string();
    });
    config.set_tokens(STALE, "refresh-1");
    config
}

/// Cloud Controller gateway on the CLI's own HTTP client (manual redirects included).
pub fn cc_gateway(config: Arc<ConfigStore>) -> Gateway {
    let settings = settings();
    let http = build_http_client(&settings, false).unwrap();
    Gateway::with_client(ApiFlavor::CloudController, config, http, &settings)
}

/// UAA token endpoint body.
pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "token_type": "bearer",
        "refresh_token": refresh,
        "expires_in": 599,
        "scope": "cloud_controller.read",
        "jti": "28edda5c"
    })
}

pub fn invalid_token_body() -> Value {
    json!({
        "code": 1000,
        "description": "Invalid Auth Token",
        "error_code": "CF-InvalidAuthToken"
    })
}

/// Refresher that counts calls and swaps in [`FRESH`] (or fails).
pub struct CountingRefresher {
    config: Arc<ConfigStore>,
    calls: AtomicUsize,
    failure: Option<AuthError>,
}

impl CountingRefresher {
    pub fn new(config: Arc<ConfigStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            calls: AtomicUsize::new(0),
            failure: None,
        })
    }

    pub fn failing(config: Arc<ConfigStore>, failure: AuthError) -> Arc<Self> {
        Arc::new(Self {
            config,
            calls: AtomicUsize::new(0),
            failure: Some(failure),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _stale_access_token: &str) -> Result<TokenPair, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.config.set_tokens(FRESH, "refresh-2");
        Ok(TokenPair {
            access_token: FRESH.to_string(),
            refresh_token: "refresh-2".to_string(),
        })
    }
}
