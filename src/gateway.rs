//! Authenticated HTTP gateway for the Cloud Controller and UAA APIs.
//!
//! One logical call is Attach → Send → Inspect → (Refresh → Attach → Send) →
//! Classify. A rejected token is refreshed and the request retried exactly
//! once; a second rejection is returned as [`GatewayError::Unauthorized`].
//! Every attempt builds a fresh `reqwest` request from the [`Request`]
//! descriptor, so nothing is shared between attempts except the config store.
//!
//! Buffered bodies are replayed on retry. Stream bodies are sent once; if a
//! refresh means a stream would have to be sent again, the call fails with
//! [`GatewayError::StreamNotReplayable`] instead.
//!
//! Redirects are followed by hand, once, with the `Authorization` header
//! carried over even across hosts. A second redirect is an error.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::auth::TokenRefresher;
use crate::config::Settings;
use crate::error::{GatewayError, HttpError, Result};
use crate::redact::{sanitize, PRIVATE_DATA_HIDDEN};
use crate::store::ConfigStore;

const WARNINGS_HEADER: &str = "x-cf-warnings";
const INVALID_TOKEN_CODE: i64 = 1000;
const INVALID_TOKEN_ERROR_CODE: &str = "CF-InvalidAuthToken";
const JOB_FINISHED: &str = "finished";
const JOB_FAILED: &str = "failed";

/// Which API a gateway talks to. Decides where relative paths resolve and
/// how error bodies are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    CloudController,
    Uaa,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    errors: Vec<V3Error>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V3Error {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

impl ApiFlavor {
    /// Read a non-2xx body into an [`HttpError`].
    ///
    /// Cloud Controller v2 sends `{code, description, error_code}`, v3 sends
    /// `{errors: [{code, title, detail}]}`, UAA sends `{error,
    /// error_description}`. Anything else keeps the raw body as description.
    pub fn parse_error(self, status: u16, body: &[u8]) -> HttpError {
        let raw = String::from_utf8_lossy(body).into_owned();
        let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();

        let (code, description, invalid_token) = match self {
            ApiFlavor::CloudController => match parsed.errors.first() {
                Some(first) => (
                    first.title.clone(),
                    first.detail.clone(),
                    first.code == Some(INVALID_TOKEN_CODE) || first.title == INVALID_TOKEN_ERROR_CODE,
                ),
                None => {
                    let numeric = parsed.code.as_ref().and_then(Value::as_i64);
                    let invalid = numeric == Some(INVALID_TOKEN_CODE)
                        || parsed.error_code.as_deref() == Some(INVALID_TOKEN_ERROR_CODE);
                    let code = numeric
                        .map(|c| c.to_string())
                        .or(parsed.error_code)
                        .unwrap_or_default();
                    (code, parsed.description.unwrap_or_default(), invalid)
                }
            },
            ApiFlavor::Uaa => {
                let code = match parsed.error {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let invalid = code == "invalid_token";
                (code, parsed.error_description.unwrap_or_default(), invalid)
            }
        };

        let description = if code.is_empty() && description.is_empty() {
            raw.trim().to_string()
        } else {
            description
        };

        HttpError {
            status,
            code,
            description,
            invalid_token,
            body: raw,
        }
    }
}

#[derive(Debug)]
enum RequestBody {
    Empty,
    Buffered(Bytes),
    /// One-shot; `None` once sent.
    Stream(Option<reqwest::Body>),
}

impl RequestBody {
    /// Body for the next attempt, or `Err` when a stream was already used up.
    fn next_attempt(&mut self) -> std::result::Result<Option<reqwest::Body>, ()> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Buffered(bytes) => Ok(Some(bytes.clone().into())),
            RequestBody::Stream(body) => body.take().map(Some).ok_or(()),
        }
    }
}

/// What to send. Built by callers, consumed by one gateway call.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
    content_type: Option<String>,
    authenticated: bool,
}

impl Request {
    /// `path` is either relative to the gateway's endpoint or an absolute URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            content_type: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        self.body = RequestBody::Buffered(Bytes::from(bytes));
        Ok(self)
    }

    /// Buffered payload; replayed if the call is retried.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    /// One-shot payload such as a file upload; never replayed.
    pub fn stream(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.body = RequestBody::Stream(Some(body.into()));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Send without an `Authorization` header (and therefore never refresh).
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A response with its body fully read. Only [`Gateway::perform_raw`] hands
/// out non-2xx ones.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    url: String,
}

impl Response {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| GatewayError::decode(&self.url, e))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AsyncResource {
    #[serde(default)]
    metadata: AsyncMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AsyncMetadata {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct JobResource {
    entity: JobEntity,
}

#[derive(Debug, Deserialize)]
struct JobEntity {
    status: String,
    #[serde(default)]
    error_details: Option<JobErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct JobErrorDetails {
    #[serde(default)]
    description: String,
}

fn user_agent() -> String {
    format!("cf/{} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
}

/// HTTP client with the CLI's timeouts and TLS policy.
pub fn build_http_client(settings: &Settings, skip_ssl_validation: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.dial_timeout)
        .user_agent(user_agent())
        .danger_accept_invalid_certs(skip_ssl_validation)
        .redirect(Policy::none());

    if let Some(timeout) = settings.request_timeout {
        builder = builder.timeout(timeout);
    }

    builder.build().map_err(GatewayError::HttpClient)
}

pub(crate) fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn next_body(request: &mut Request, url: &str) -> Result<Option<reqwest::Body>> {
    request
        .body
        .next_attempt()
        .map_err(|()| GatewayError::StreamNotReplayable { url: url.to_string() })
}

/// `Location` of a redirect response, if it is one.
fn redirect_location(response: &Response) -> Option<String> {
    if !matches!(response.status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    response
        .headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub struct Gateway {
    flavor: ApiFlavor,
    http: reqwest::Client,
    config: Arc<ConfigStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    warnings: Mutex<Vec<String>>,
    polling_throttle: Duration,
    job_timeout: Option<Duration>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("flavor", &self.flavor)
            .field("refreshes", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(flavor: ApiFlavor, config: Arc<ConfigStore>, settings: &Settings) -> Result<Self> {
        let http = build_http_client(settings, config.is_ssl_disabled())?;
        Ok(Self::with_client(flavor, config, http, settings))
    }

    pub fn with_client(flavor: ApiFlavor, config: Arc<ConfigStore>, http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            flavor,
            http,
            config,
            refresher: None,
            warnings: Mutex::new(Vec::new()),
            polling_throttle: settings.polling_throttle,
            job_timeout: None,
        }
    }

    /// Without a refresher, a rejected token is returned as `Unauthorized`.
    pub fn with_token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Overrides the config's `AsyncTimeout` for job polling.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Warnings the server attached to responses since the last call, oldest first.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock())
    }

    fn base_url(&self) -> String {
        match self.flavor {
            ApiFlavor::CloudController => self.config.api_endpoint(),
            ApiFlavor::Uaa => self.config.token_endpoint(),
        }
    }

    /// Absolute URL for `path`; absolute inputs pass through.
    pub fn resolve_url(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }

        let base = self.base_url();
        if base.is_empty() {
            return Err(GatewayError::InvalidRequest(format!("no API endpoint targeted for {}", path)));
        }

        if path.starts_with('/') {
            Ok(format!("{}{}", base, path))
        } else {
            Ok(format!("{}/{}", base, path))
        }
    }

    /// Perform one logical call, refreshing the token and retrying at most once.
    pub async fn perform(&self, request: Request) -> Result<Response> {
        let (response, rejected) = self.round_trip(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let error = self.flavor.parse_error(response.status, &response.body);
        debug!(url = %response.url, status = response.status, code = %error.code, "request failed");

        Err(if rejected {
            GatewayError::Unauthorized(error)
        } else if response.status >= 500 {
            GatewayError::Server(error)
        } else {
            GatewayError::Client(error)
        })
    }

    /// Like [`perform`](Self::perform), but any status comes back as a
    /// response. A rejected token is still refreshed and the call retried once.
    pub async fn perform_raw(&self, request: Request) -> Result<Response> {
        self.round_trip(request).await.map(|(response, _)| response)
    }

    /// Send, and on a rejected token refresh and send again. Returns the last
    /// response and whether the server rejected its token.
    async fn round_trip(&self, mut request: Request) -> Result<(Response, bool)> {
        let url = self.resolve_url(&request.path)?;
        let mut refreshed = false;

        loop {
            let token = if request.authenticated {
                self.config.access_token()
            } else {
                String::new()
            };

            let response = self.send(&mut request, &url, &token).await?;
            if response.is_success() {
                return Ok((response, false));
            }

            let error = self.flavor.parse_error(response.status, &response.body);
            let rejected = response.status == 401 || (error.invalid_token && (400..500).contains(&response.status));

            if rejected && !refreshed && !token.is_empty() {
                if let Some(refresher) = &self.refresher {
                    refreshed = true;
                    info!(%url, status = response.status, "access token rejected, refreshing");
                    refresher.refresh(&token).await.map_err(GatewayError::RefreshFailed)?;
                    continue;
                }
            }

            return Ok((response, rejected));
        }
    }

    /// One attempt, following at most one redirect.
    async fn send(&self, request: &mut Request, url: &str, token: &str) -> Result<Response> {
        let content_type = request.content_type.clone().unwrap_or_else(|| "application/json".to_string());
        let body = next_body(request, url)?;
        let response = self
            .send_once(&request.method, url, &request.query, &content_type, token, body)
            .await?;

        let Some(location) = redirect_location(&response) else {
            return Ok(response);
        };
        let target = reqwest::Url::parse(url)
            .and_then(|base| base.join(&location))
            .map_err(|e| GatewayError::InvalidRequest(format!("bad redirect location {:?} from {}: {}", location, url, e)))?;

        // 301/302/303 turn everything but GET and HEAD into a bodiless GET.
        let (method, body) = match response.status {
            301..=303 if request.method != Method::GET && request.method != Method::HEAD => (Method::GET, None),
            301..=303 => (request.method.clone(), None),
            _ => (request.method.clone(), next_body(request, url)?),
        };

        debug!(from = url, to = %target, status = response.status, "following redirect");
        let redirected = self
            .send_once(&method, target.as_str(), &[], &content_type, token, body)
            .await?;

        if redirect_location(&redirected).is_some() {
            return Err(GatewayError::TooManyRedirects { url: url.to_string() });
        }
        Ok(redirected)
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        content_type: &str,
        token: &str,
        body: Option<reqwest::Body>,
    ) -> Result<Response> {
        let mut builder = self
            .http
            .request(method.clone(), url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, content_type);

        if !query.is_empty() {
            builder = builder.query(query);
        }
        if !token.is_empty() {
            builder = builder.header(AUTHORIZATION, token);
        }

        trace!(
            %method,
            %url,
            authorization = if token.is_empty() { "" } else { PRIVATE_DATA_HIDDEN },
            body = %body.as_ref().and_then(reqwest::Body::as_bytes).map(|b| sanitize(&String::from_utf8_lossy(b))).unwrap_or_default(),
            "REQUEST"
        );

        if let Some(body) = body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::transport(host_of(url), e))?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::transport(host_of(url), e))?;

        trace!(status, body = %sanitize(&String::from_utf8_lossy(&body)), "RESPONSE");

        self.collect_warnings(&headers);

        Ok(Response {
            status,
            headers,
            body,
            url: url.to_string(),
        })
    }

    fn collect_warnings(&self, headers: &HeaderMap) {
        let mut warnings = self.warnings.lock();
        for value in headers.get_all(WARNINGS_HEADER) {
            let Ok(value) = value.to_str() else { continue };
            for raw in value.split(',').map(str::trim).filter(|w| !w.is_empty()) {
                let warning = urlencoding::decode(raw)
                    .map(|w| w.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                warnings.push(warning);
            }
        }
    }

    /// `perform`, then decode the body as `T`.
    pub async fn perform_for_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.perform(request).await?.json()
    }

    /// Perform with `async=true`; if the server answers with a job, wait for it.
    ///
    /// Returns the initial response once the job (if any) has finished.
    pub async fn perform_polling(&self, request: Request) -> Result<Response> {
        let response = self.perform(request.query("async", "true")).await?;
        if response.is_empty() {
            return Ok(response);
        }

        let resource: AsyncResource = response.json()?;
        let job_url = resource.metadata.url;
        if !job_url.contains("/jobs/") {
            return Ok(response);
        }

        self.wait_for_job(&job_url).await?;
        Ok(response)
    }

    /// Poll a CC job until it finishes, fails, or the async timeout runs out.
    pub async fn wait_for_job(&self, job_url: &str) -> Result<()> {
        let timeout = self.job_timeout.or_else(|| match self.config.async_timeout() {
            0 => None,
            minutes => Some(Duration::from_secs(u64::from(minutes) * 60)),
        });
        let started = Instant::now();

        loop {
            if timeout.is_some_and(|t| started.elapsed() > t) {
                return Err(GatewayError::JobTimeout {
                    url: job_url.to_string(),
                });
            }

            let job: JobResource = self.perform_for_json(Request::get(job_url)).await?;
            match job.entity.status.as_str() {
                JOB_FINISHED => return Ok(()),
                JOB_FAILED => {
                    return Err(GatewayError::JobFailed {
                        url: job_url.to_string(),
                        description: job.entity.error_details.map(|d| d.description).unwrap_or_default(),
                    })
                }
                status => debug!(job = job_url, status, "waiting for job"),
            }

            tokio::time::sleep(self.polling_throttle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cc_v2_errors() {
        let err = ApiFlavor::CloudController.parse_error(
            400,
            br#"{"code": 333, "description": "bad request", "error_code": "CF-BadRequest"}"#,
        );
        assert_eq!(err.code, "333");
        assert_eq!(err.description, "bad request");
        assert!(!err.invalid_token);
    }

    #[test]
    fn detects_cc_v2_invalid_token() {
        let err = ApiFlavor::CloudController.parse_error(401, br#"{"code": 1000, "description": "Auth token is invalid"}"#);
        assert!(err.invalid_token);

        let err = ApiFlavor::CloudController.parse_error(403, br#"{"error_code": "CF-InvalidAuthToken"}"#);
        assert!(err.invalid_token);
        assert_eq!(err.code, "CF-InvalidAuthToken");
    }

    #[test]
    fn parses_cc_v3_errors() {
        let err = ApiFlavor::CloudController.parse_error(
            404,
            br#"{"errors": [{"code": 10010, "title": "CF-ResourceNotFound", "detail": "App not found"}]}"#,
        );
        assert_eq!(err.code, "CF-ResourceNotFound");
        assert_eq!(err.description, "App not found");
        assert!(!err.invalid_token);

        let err = ApiFlavor::CloudController.parse_error(
            401,
            br#"{"errors": [{"code": 1000, "title": "CF-InvalidAuthToken", "detail": "Invalid Auth Token"}]}"#,
        );
        assert!(err.invalid_token);
    }

    #[test]
    fn parses_uaa_errors() {
        let err = ApiFlavor::Uaa.parse_error(401, br#"{"error": "invalid_token", "error_description": "expired"}"#);
        assert_eq!(err.code, "invalid_token");
        assert_eq!(err.description, "expired");
        assert!(err.invalid_token);

        // CC-shaped bodies mean nothing to UAA.
        let err = ApiFlavor::Uaa.parse_error(401, br#"{"code": 1000}"#);
        assert!(!err.invalid_token);
    }

    #[test]
    fn unstructured_bodies_become_descriptions() {
        let err = ApiFlavor::CloudController.parse_error(502, b"  Bad Gateway\n");
        assert_eq!(err.code, "");
        assert_eq!(err.description, "Bad Gateway");
        assert_eq!(err.body, "  Bad Gateway\n");
    }

    #[test]
    fn streams_are_one_shot_and_buffers_replay() {
        let mut buffered = RequestBody::Buffered(Bytes::from_static(b"{}"));
        assert!(matches!(buffered.next_attempt(), Ok(Some(_))));
        assert!(matches!(buffered.next_attempt(), Ok(Some(_))));

        let mut stream = RequestBody::Stream(Some(reqwest::Body::from("bits")));
        assert!(matches!(stream.next_attempt(), Ok(Some(_))));
        assert!(stream.next_attempt().is_err());

        assert!(matches!(RequestBody::Empty.next_attempt(), Ok(None)));
    }

    #[test]
    fn resolves_paths_against_the_flavour_endpoint() {
        let config = Arc::new(ConfigStore::in_memory());
        config.update(|d| {
            d.endpoints.target = "https://api.example.com/".into();
            d.endpoints.authorization_endpoint = "https://login.example.com".into();
        });
        let settings = Settings::default();

        let cc = Gateway::with_client(ApiFlavor::CloudController, config.clone(), reqwest::Client::new(), &settings);
        assert_eq!(cc.resolve_url("/v2/apps").unwrap(), "https://api.example.com/v2/apps");
        assert_eq!(cc.resolve_url("v2/apps").unwrap(), "https://api.example.com/v2/apps");
        assert_eq!(cc.resolve_url("https://other.example.com/x").unwrap(), "https://other.example.com/x");

        let uaa = Gateway::with_client(ApiFlavor::Uaa, config, reqwest::Client::new(), &settings);
        assert_eq!(uaa.resolve_url("/Users").unwrap(), "https://login.example.com/Users");
    }

    #[test]
    fn untargeted_relative_paths_are_invalid() {
        let gateway = Gateway::with_client(
            ApiFlavor::CloudController,
            Arc::new(ConfigStore::in_memory()),
            reqwest::Client::new(),
            &Settings::default(),
        );
        assert!(matches!(gateway.resolve_url("/v2/apps"), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn warnings_are_split_and_decoded() {
        let gateway = Gateway::with_client(
            ApiFlavor::CloudController,
            Arc::new(ConfigStore::in_memory()),
            reqwest::Client::new(),
            &Settings::default(),
        );
        let mut headers = HeaderMap::new();
        headers.append(WARNINGS_HEADER, "Something%20odd, Another%2C%20one".parse().unwrap());

        gateway.collect_warnings(&headers);

        assert_eq!(gateway.take_warnings(), vec!["Something odd", "Another, one"]);
        assert!(gateway.take_warnings().is_empty());
    }
}
