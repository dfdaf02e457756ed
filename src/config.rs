//! Runtime settings (environment + .env)
//!
//! Persistent CLI state (tokens, target, org/space) lives in [`crate::store`];
//! this module only covers where that state lives and the knobs read from the
//! environment at startup.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Connect timeout used when `CF_DIAL_TIMEOUT` is unset.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between async job polls when `CF_POLLING_THROTTLE_MS` is unset.
pub const DEFAULT_POLLING_THROTTLE: Duration = Duration::from_secs(5);

/// CF home directory (`$CF_HOME`, falling back to the user's home)
pub fn cf_home() -> PathBuf {
    if let Ok(dir) = std::env::var("CF_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Path of the persisted config file
pub fn config_file_path() -> PathBuf {
    cf_home().join(".cf").join("config.json")
}

/// Load a .env file from the working directory, if there is one
pub fn load_env() -> Result<(), dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Settings read from the environment once per process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    /// TCP connect timeout for every API call.
    pub dial_timeout: Duration,
    /// Whole-request timeout; `None` lets a request run until the server answers.
    pub request_timeout: Option<Duration>,
    pub polling_throttle: Duration,
    /// Dump requests and responses to the log.
    pub trace: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: config_file_path(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: None,
            polling_throttle: DEFAULT_POLLING_THROTTLE,
            trace: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();

        Self {
            config_path: config_file_path(),
            dial_timeout: var("CF_DIAL_TIMEOUT")
                .and_then(|v| parse_duration(&v, Duration::from_secs))
                .unwrap_or(DEFAULT_DIAL_TIMEOUT),
            request_timeout: var("CF_REQUEST_TIMEOUT").and_then(|v| parse_duration(&v, Duration::from_secs)),
            polling_throttle: var("CF_POLLING_THROTTLE_MS")
                .and_then(|v| parse_duration(&v, Duration::from_millis))
                .unwrap_or(DEFAULT_POLLING_THROTTLE),
            trace: var("CF_TRACE").map(|v| parse_flag(&v)).unwrap_or(false),
        }
    }
}

fn parse_duration(value: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    value.trim().parse::<u64>().ok().filter(|n| *n > 0).map(unit)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
