//! Thread-safe config store: credentials, endpoints and the targeted org/space.
//!
//! A single `RwLock` guards all state. Every write goes through
//! [`ConfigStore::update`], which applies the mutation, enforces the
//! "new endpoint means new session" rule and then persists. Persistence
//! failures are reported to the error handler given at construction; the
//! in-memory change stays in place.
//!
//! Mutators passed to `update` must not call back into the store. The lock
//! is not reentrant and doing so deadlocks.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::persist::{MemoryPersistor, Persistor};

/// Version tag written to, and required from, the config file.
pub const CONFIG_VERSION: u32 = 3;

pub const DEFAULT_UAA_CLIENT: &str = "cf";
pub const DEFAULT_UAA_CLIENT_SECRET: &str = "";
pub const DEFAULT_SSH_OAUTH_CLIENT: &str = "ssh-proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GrantType {
    /// Older config files store an empty string for user logins.
    #[default]
    #[serde(rename = "password", alias = "")]
    Password,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Includes the token type, e.g. `bearer eyJ…`.
    #[serde(rename = "AccessToken")]
    pub access_token: String,
    #[serde(rename = "RefreshToken")]
    pub refresh_token: String,
    #[serde(rename = "UAAOAuthClient")]
    pub client_id: String,
    #[serde(rename = "UAAOAuthClientSecret")]
    pub client_secret: String,
    #[serde(rename = "UAAGrantType")]
    pub grant_type: GrantType,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            client_id: DEFAULT_UAA_CLIENT.to_string(),
            client_secret: DEFAULT_UAA_CLIENT_SECRET.to_string(),
            grant_type: GrantType::Password,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSet {
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "APIVersion")]
    pub api_version: String,
    #[serde(rename = "AuthorizationEndpoint")]
    pub authorization_endpoint: String,
    #[serde(rename = "UaaEndpoint")]
    pub uaa_endpoint: String,
    #[serde(rename = "DopplerEndPoint")]
    pub doppler_endpoint: String,
    #[serde(rename = "RoutingAPIEndpoint")]
    pub routing_api_endpoint: String,
    #[serde(rename = "LogCacheEndPoint")]
    pub log_cache_endpoint: String,
    #[serde(rename = "SSHOAuthClient")]
    pub ssh_oauth_client: String,
    #[serde(rename = "MinCLIVersion")]
    pub min_cli_version: String,
    #[serde(rename = "MinRecommendedCLIVersion")]
    pub min_recommended_cli_version: String,
}

impl Default for EndpointSet {
    fn default() -> Self {
        Self {
            target: String::new(),
            api_version: String::new(),
            authorization_endpoint: String::new(),
            uaa_endpoint: String::new(),
            doppler_endpoint: String::new(),
            routing_api_endpoint: String::new(),
            log_cache_endpoint: String::new(),
            ssh_oauth_client: DEFAULT_SSH_OAUTH_CLIENT.to_string(),
            min_cli_version: String::new(),
            min_recommended_cli_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationFields {
    #[serde(rename = "GUID", default)]
    pub guid: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceFields {
    #[serde(rename = "GUID", default)]
    pub guid: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "AllowSSH", default)]
    pub allow_ssh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    #[serde(rename = "OrganizationFields")]
    pub organization: OrganizationFields,
    #[serde(rename = "SpaceFields")]
    pub space: SpaceFields,
}

/// Everything persisted in `.cf/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigData {
    #[serde(rename = "ConfigVersion")]
    pub version: u32,
    #[serde(flatten)]
    pub endpoints: EndpointSet,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(flatten)]
    pub session: SessionContext,
    #[serde(rename = "SSLDisabled")]
    pub ssl_disabled: bool,
    /// Minutes to wait for async jobs; 0 waits forever.
    #[serde(rename = "AsyncTimeout")]
    pub async_timeout: u32,
    #[serde(rename = "Trace")]
    pub trace: String,
    /// Keys written by other tools (plugin repos, locale, colour), kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            endpoints: EndpointSet::default(),
            credentials: Credentials::default(),
            session: SessionContext::default(),
            ssl_disabled: false,
            async_timeout: 0,
            trace: String::new(),
            extra: Map::new(),
        }
    }
}

impl ConfigData {
    /// Decode a persisted config. `Ok(None)` means the version tag is missing
    /// or different, and the file must be replaced rather than merged.
    pub fn from_json(json: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        let version = value.get("ConfigVersion").and_then(Value::as_u64);
        if version != Some(u64::from(CONFIG_VERSION)) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Drop both tokens and the targeted org/space. Client settings stay.
    pub fn clear_session(&mut self) {
        self.credentials.access_token.clear();
        self.credentials.refresh_token.clear();
        self.session = SessionContext::default();
    }
}

type ErrorHandler = Box<dyn Fn(ConfigError) + Send + Sync>;

pub struct ConfigStore {
    data: RwLock<ConfigData>,
    persistor: Box<dyn Persistor>,
    on_error: ErrorHandler,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Read the persisted config once and build a store around it.
    ///
    /// Load problems never fail construction: an unreadable or corrupt file
    /// is reported to `on_error` and defaults are used. A file written with a
    /// different `ConfigVersion` is discarded and overwritten with defaults.
    pub fn load<P, F>(persistor: P, on_error: F) -> Self
    where
        P: Persistor + 'static,
        F: Fn(ConfigError) + Send + Sync + 'static,
    {
        let mut stale = false;
        let data = match persistor.load() {
            Ok(Some(json)) => match ConfigData::from_json(&json) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    debug!(expected = CONFIG_VERSION, "config version mismatch, using defaults");
                    stale = true;
                    ConfigData::default()
                }
                Err(e) => {
                    on_error(ConfigError::Parse(e));
                    ConfigData::default()
                }
            },
            Ok(None) => ConfigData::default(),
            Err(e) => {
                on_error(e);
                ConfigData::default()
            }
        };

        let store = Self {
            data: RwLock::new(data),
            persistor: Box::new(persistor),
            on_error: Box::new(on_error),
        };
        if stale {
            store.update(|_| {});
        }
        store
    }

    /// Store with no durable backing.
    pub fn in_memory() -> Self {
        Self::load(MemoryPersistor::new(), |_| {})
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> ConfigData {
        self.data.read().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&ConfigData) -> T) -> T {
        f(&self.data.read())
    }

    /// Apply `mutator` under the write lock, then persist.
    ///
    /// If the mutation changes the API endpoint, tokens and the targeted
    /// org/space are cleared in the same write.
    pub fn update(&self, mutator: impl FnOnce(&mut ConfigData)) {
        let saved = {
            let mut data = self.data.write();
            let target = data.endpoints.target.clone();

            mutator(&mut data);

            if data.endpoints.target != target {
                debug!(from = %target, to = %data.endpoints.target, "API endpoint changed, clearing session");
                data.clear_session();
            }
            self.persist(&data)
        };

        if let Err(e) = saved {
            warn!(error = %e, "failed to persist config");
            (self.on_error)(e);
        }
    }

    fn persist(&self, data: &ConfigData) -> Result<(), ConfigError> {
        let json = data.to_json().map_err(ConfigError::Serialize)?;
        self.persistor.save(&json)
    }

    pub fn clear_session(&self) {
        self.update(ConfigData::clear_session);
    }

    // ============ Getters ============

    /// Target API endpoint without a trailing slash.
    pub fn api_endpoint(&self) -> String {
        self.read(|d| d.endpoints.target.trim_end_matches('/').to_string())
    }

    pub fn has_api_endpoint(&self) -> bool {
        self.read(|d| !d.endpoints.target.is_empty())
    }

    /// Base URL of the OAuth token server.
    pub fn token_endpoint(&self) -> String {
        self.read(|d| {
            let endpoint = if d.endpoints.uaa_endpoint.is_empty() {
                &d.endpoints.authorization_endpoint
            } else {
                &d.endpoints.uaa_endpoint
            };
            endpoint.trim_end_matches('/').to_string()
        })
    }

    pub fn access_token(&self) -> String {
        self.read(|d| d.credentials.access_token.clone())
    }

    pub fn refresh_token(&self) -> String {
        self.read(|d| d.credentials.refresh_token.clone())
    }

    pub fn credentials(&self) -> Credentials {
        self.read(|d| d.credentials.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.read(|d| !d.credentials.access_token.is_empty())
    }

    pub fn organization(&self) -> OrganizationFields {
        self.read(|d| d.session.organization.clone())
    }

    pub fn has_organization(&self) -> bool {
        self.read(|d| !d.session.organization.guid.is_empty() && !d.session.organization.name.is_empty())
    }

    pub fn space(&self) -> SpaceFields {
        self.read(|d| d.session.space.clone())
    }

    pub fn has_space(&self) -> bool {
        self.read(|d| !d.session.space.guid.is_empty() && !d.session.space.name.is_empty())
    }

    pub fn is_ssl_disabled(&self) -> bool {
        self.read(|d| d.ssl_disabled)
    }

    pub fn async_timeout(&self) -> u32 {
        self.read(|d| d.async_timeout)
    }

    // ============ Setters ============

    /// Replace both tokens in one write.
    pub fn set_tokens(&self, access_token: &str, refresh_token: &str) {
        self.update(|d| {
            d.credentials.access_token = access_token.to_string();
            d.credentials.refresh_token = refresh_token.to_string();
        });
    }

    /// Replace both tokens only while the API endpoint is still `target` and
    /// the stored access token is still `expected`. Returns whether the write
    /// happened; a logout or retarget in the meantime wins.
    pub fn replace_tokens(&self, target: &str, expected: &str, access_token: &str, refresh_token: &str) -> bool {
        let mut replaced = false;
        self.update(|d| {
            if d.endpoints.target == target && d.credentials.access_token == expected {
                d.credentials.access_token = access_token.to_string();
                d.credentials.refresh_token = refresh_token.to_string();
                replaced = true;
            }
        });
        replaced
    }

    pub fn set_endpoints(&self, endpoints: EndpointSet) {
        self.update(|d| d.endpoints = endpoints);
    }

    /// Target an org. Any previously targeted space belonged to the old org.
    pub fn set_organization(&self, organization: OrganizationFields) {
        self.update(|d| {
            d.session.organization = organization;
            d.session.space = SpaceFields::default();
        });
    }

    pub fn set_space(&self, space: SpaceFields) {
        self.update(|d| d.session.space = space);
    }

    pub fn set_client(&self, client_id: &str, client_secret: &str, grant_type: GrantType) {
        self.update(|d| {
            d.credentials.client_id = client_id.to_string();
            d.credentials.client_secret = client_secret.to_string();
            d.credentials.grant_type = grant_type;
        });
    }

    pub fn set_ssl_disabled(&self, disabled: bool) {
        self.update(|d| d.ssl_disabled = disabled);
    }
}
