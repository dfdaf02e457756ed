//! Error types for the config store, token refresher and API gateway.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failures reading or writing the persisted config.
///
/// These never abort the in-memory operation that triggered them; the store
/// hands them to its error handler instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors from the OAuth token endpoint.
///
/// `Clone` so a single refresh outcome can be handed to every caller waiting
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The refresh token was expired or revoked.
    #[error("refresh token rejected: {0}")]
    InvalidRefreshToken(String),

    /// Username/password or client id/secret rejected.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("no authorization endpoint targeted")]
    NoTokenEndpoint,

    #[error("error contacting token endpoint: {0}")]
    Network(String),

    /// The token endpoint's TLS certificate could not be verified.
    #[error("invalid SSL certificate from {0}")]
    InvalidSslCert(String),

    #[error("token endpoint returned status {status}, error code: {code}, message: {description}")]
    Rejected {
        status: u16,
        code: String,
        description: String,
    },

    #[error("invalid token response: {0}")]
    Decode(String),
}

impl AuthError {
    /// Whether the user has to log in again to recover.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidRefreshToken(_) | AuthError::InvalidCredentials(_) | AuthError::NotLoggedIn
        )
    }
}

/// A non-2xx response, with whatever the server told us about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    /// Server error code (`CF-…`, a numeric CC code, or a UAA `error`).
    pub code: String,
    pub description: String,
    /// Whether the body says the access token is invalid.
    pub invalid_token: bool,
    pub body: String,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status code: {}", self.status)?;
        if !self.code.is_empty() {
            write!(f, ", error code: {}", self.code)?;
        }
        if !self.description.is_empty() {
            write!(f, ", message: {}", self.description)?;
        }
        Ok(())
    }
}

/// Coarse error category, used by callers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Client,
    Server,
    Network,
    Decode,
    Request,
}

/// Everything that can go wrong performing a gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The token was rejected and a refresh could not fix it.
    #[error("not authorized, {0}")]
    Unauthorized(HttpError),

    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] AuthError),

    #[error("request failed, {0}")]
    Client(HttpError),

    #[error("server error, {0}")]
    Server(HttpError),

    #[error("error performing request to {host}: {source}")]
    Network {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    /// TLS verification failed; the user may need `--skip-ssl-validation`.
    #[error("invalid SSL certificate from {host}: {source}")]
    InvalidSslCert {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("stopped after 1 redirect from {url}")]
    TooManyRedirects { url: String },

    #[error("invalid JSON response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("cannot retry streaming upload to {url} after token refresh")]
    StreamNotReplayable { url: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("job {url} failed: {description}")]
    JobFailed { url: String, description: String },

    #[error("timed out waiting for job {url}")]
    JobTimeout { url: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized(_) | GatewayError::RefreshFailed(_) => ErrorKind::Auth,
            GatewayError::Client(_) => ErrorKind::Client,
            GatewayError::Server(_) | GatewayError::JobFailed { .. } => ErrorKind::Server,
            GatewayError::Network { .. } | GatewayError::InvalidSslCert { .. } | GatewayError::JobTimeout { .. } => {
                ErrorKind::Network
            }
            GatewayError::Decode { .. } => ErrorKind::Decode,
            GatewayError::StreamNotReplayable { .. }
            | GatewayError::TooManyRedirects { .. }
            | GatewayError::InvalidRequest(_)
            | GatewayError::HttpClient(_) => ErrorKind::Request,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            GatewayError::Network { source, .. } => source.is_timeout(),
            GatewayError::JobTimeout { .. } => true,
            _ => false,
        }
    }

    /// The server's error response, when there was one.
    pub fn http_error(&self) -> Option<&HttpError> {
        match self {
            GatewayError::Unauthorized(e) | GatewayError::Client(e) | GatewayError::Server(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn decode(url: &str, message: impl fmt::Display) -> Self {
        GatewayError::Decode {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Transport failure talking to `host`, split out when TLS verification failed.
    pub(crate) fn transport(host: String, source: reqwest::Error) -> Self {
        if is_certificate_error(&source) {
            GatewayError::InvalidSslCert { host, source }
        } else {
            GatewayError::Network { host, source }
        }
    }
}

const CERTIFICATE_FAILURES: &[&str] = &[
    "certificate verify failed",
    "invalid peer certificate",
    "certificate has expired",
    "self signed certificate",
    "self-signed certificate",
    "unable to get local issuer certificate",
    "certificate is not valid for",
    "hostname mismatch",
    "certificate was not trusted",
];

/// Whether any error in the chain is a TLS certificate verification failure.
///
/// The TLS backends only expose these as text, so the chain's messages are
/// matched against the wording openssl, rustls and the platform verifiers use.
pub(crate) fn is_certificate_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_lowercase();
        if CERTIFICATE_FAILURES.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}
