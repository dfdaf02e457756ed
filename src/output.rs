//! Output handling
//!
//! - agent mode: JSON Lines on stdout, each tagged with a schema version (v: 1)
//! - human mode: logs on stderr, results pretty-printed on stdout

use serde::Serialize;
use serde_json::{json, Value};

use cf::error::{AuthError, ErrorKind, GatewayError};

const SCHEMA_VERSION: u8 = 1;

/// Event wrapper with schema version
#[derive(Serialize)]
struct Event<T: Serialize> {
    v: u8,
    #[serde(rename = "type")]
    event_type: String,
    payload: T,
}

fn emit<T: Serialize>(event_type: &str, payload: T) {
    let event = Event {
        v: SCHEMA_VERSION,
        event_type: event_type.to_string(),
        payload,
    };
    match serde_json::to_string(&event) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("failed to encode {} event: {}", event_type, e),
    }
}

/// Output handler
#[derive(Debug, Clone, Copy)]
pub struct Output {
    agent_mode: bool,
}

impl Output {
    pub fn new(agent_mode: bool) -> Self {
        Self { agent_mode }
    }

    /// Log message (stderr for human, JSON Lines for agent)
    pub fn log(&self, level: &str, message: &str) {
        if self.agent_mode {
            emit("log", json!({"level": level, "message": message}));
        } else {
            eprintln!("[{}] {}", level.to_uppercase(), message);
        }
    }

    /// Server warnings collected during a command
    pub fn warnings(&self, warnings: &[String]) {
        for warning in warnings {
            self.log("warn", warning);
        }
    }

    /// Final result
    pub fn result<T: Serialize>(&self, data: T) {
        if self.agent_mode {
            emit("result", data);
            return;
        }
        match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("failed to encode result: {}", e),
        }
    }

    /// Report the error and exit with its category's code
    pub fn error(&self, err: CliError) -> ! {
        if self.agent_mode {
            emit("error", &err);
        } else {
            eprintln!("Error [{}][{}]: {}", err.cat, err.code, err.message.as_deref().unwrap_or(""));
            if err.retryable {
                if let Some(s) = err.retry_after_s {
                    eprintln!("  Retry after: {}s", s);
                }
            }
            if !err.fix.is_empty() {
                eprintln!("  Fix: {}", err.fix.join(", "));
            }
        }
        std::process::exit(err.exit_code());
    }
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub cat: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u32>,
    pub fix: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CliError {
    fn new(cat: &str, code: &str, message: &str, retryable: bool, fix: &[&str]) -> Self {
        Self {
            code: code.into(),
            cat: cat.into(),
            op: None,
            retryable,
            retry_after_s: None,
            fix: fix.iter().map(|f| f.to_string()).collect(),
            message: Some(message.into()),
            details: None,
        }
    }

    /// Network error
    pub fn net(code: &str, message: &str) -> Self {
        let mut err = Self::new("net", code, message, true, &["check your network connection or proxy settings"]);
        err.retry_after_s = Some(5);
        err
    }

    /// Input error
    pub fn input(code: &str, message: &str) -> Self {
        Self::new("in", code, message, false, &["check the command arguments"])
    }

    /// Auth error
    pub fn auth(code: &str, message: &str) -> Self {
        Self::new("auth", code, message, false, &["cf auth USERNAME PASSWORD"])
    }

    /// The API rejected the request
    pub fn api(code: &str, message: &str) -> Self {
        Self::new("api", code, message, false, &[])
    }

    /// External service error
    pub fn ext(code: &str, message: &str) -> Self {
        let mut err = Self::new("ext", code, message, true, &["try again later"]);
        err.retry_after_s = Some(5);
        err
    }

    /// System error
    pub fn sys(code: &str, message: &str) -> Self {
        Self::new("sys", code, message, false, &["run again with --verbose and report the output"])
    }

    /// Timeout error
    pub fn timeout(code: &str, message: &str, retry_after: u32) -> Self {
        let mut err = Self::new("time", code, message, true, &["raise CF_REQUEST_TIMEOUT or try again"]);
        err.retry_after_s = Some(retry_after);
        err
    }

    /// Add operation context
    pub fn with_op(mut self, op: &str) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add details
    pub fn with_details<T: Serialize>(mut self, details: T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Certificate rejected; the fix is to opt out of verification.
    pub fn invalid_ssl_cert(message: &str) -> Self {
        let mut err = Self::input("INVALID_SSL_CERT", message);
        err.fix = vec!["cf api URL --skip-ssl-validation".into()];
        err
    }

    /// Categorize a command failure.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);

        if let Some(gateway) = err.downcast_ref::<GatewayError>() {
            return Self::from_gateway(gateway, &message);
        }
        if let Some(auth) = err.downcast_ref::<AuthError>() {
            return Self::from_auth(auth, &message);
        }
        Self::sys("INTERNAL", &message)
    }

    fn from_gateway(err: &GatewayError, message: &str) -> Self {
        if err.is_timeout() {
            return Self::timeout("TIMEOUT", message, 5);
        }

        let mapped = match err {
            GatewayError::RefreshFailed(auth) => return Self::from_auth(auth, message),
            GatewayError::StreamNotReplayable { .. } => Self::sys("STREAM_NOT_REPLAYABLE", message),
            GatewayError::InvalidSslCert { .. } => Self::invalid_ssl_cert(message),
            _ => match err.kind() {
                ErrorKind::Auth => Self::auth("NOT_AUTHORIZED", message),
                ErrorKind::Client => Self::api("API_ERROR", message),
                ErrorKind::Server => Self::ext("SERVER_ERROR", message),
                ErrorKind::Network => Self::net("NETWORK_ERROR", message),
                ErrorKind::Decode => Self::sys("INVALID_RESPONSE", message),
                ErrorKind::Request => Self::input("INVALID_REQUEST", message),
            },
        };

        match err.http_error() {
            Some(http) => mapped.with_details(json!({
                "status": http.status,
                "error_code": http.code,
                "description": http.description,
            })),
            None => mapped,
        }
    }

    fn from_auth(err: &AuthError, message: &str) -> Self {
        match err {
            AuthError::Network(_) => Self::net("NETWORK_ERROR", message),
            AuthError::InvalidSslCert(_) => Self::invalid_ssl_cert(message),
            AuthError::NoTokenEndpoint => {
                let mut e = Self::input("NO_API_ENDPOINT", message);
                e.fix = vec!["cf api URL".into()];
                e
            }
            e if e.requires_login() => Self::auth("LOGIN_REQUIRED", message),
            _ => Self::ext("UAA_ERROR", message),
        }
    }

    /// Get exit code based on category
    pub fn exit_code(&self) -> i32 {
        match self.cat.as_str() {
            "in" => 1,
            "auth" => 3,
            "time" => 4,
            _ => 2,
        }
    }
}
