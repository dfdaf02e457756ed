//! Scrubbing secrets out of traced requests and responses.

use std::sync::LazyLock;

use regex::Regex;

pub const PRIVATE_DATA_HIDDEN: &str = "[PRIVATE DATA HIDDEN]";

static AUTHORIZATION_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Authorization: .*$").unwrap());

static FORM_SECRET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(password|refresh_token|client_secret)=[^&\s]*").unwrap());

static JSON_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(password|oldPassword|access_token|refresh_token|token|client_secret)"\s*:\s*"(?:[^"\\]|\\.)*""#)
        .unwrap()
});

/// Replace tokens and passwords in a dumped HTTP exchange.
///
/// Covers the `Authorization` header line, form and query secrets
/// (`password=…`), and JSON string values under secret keys. Everything else,
/// including a body that merely mentions `Authorization:`, is left as is.
pub fn sanitize(text: &str) -> String {
    let text = AUTHORIZATION_HEADER_RE.replace_all(text, format!("Authorization: {PRIVATE_DATA_HIDDEN}").as_str());
    let text = FORM_SECRET_RE.replace_all(&text, format!("${{1}}={PRIVATE_DATA_HIDDEN}").as_str());
    JSON_SECRET_RE
        .replace_all(&text, format!(r#""${{1}}":"{PRIVATE_DATA_HIDDEN}""#).as_str())
        .into_owned()
}
