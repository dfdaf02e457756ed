//! `cf curl`

use anyhow::Result;
use reqwest::Method;
use serde_json::{json, Value};

use cf::gateway::Request;

use super::Context;
use crate::output::CliError;

pub async fn run(ctx: &Context, path: &str, method: &str, data: Option<String>, uaa: bool) -> Result<()> {
    let method = match Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => ctx.out.error(CliError::input("INVALID_METHOD", &format!("invalid HTTP method: {}", method)).with_op("curl")),
    };

    let gateway = if uaa { ctx.uaa()? } else { ctx.cloud_controller()? };

    let mut request = Request::new(method, path);
    if let Some(data) = data {
        request = request.body(data);
    }

    // Error statuses are part of the output, not a failure of the command.
    let response = gateway.perform_raw(request).await?;
    ctx.out.warnings(&gateway.take_warnings());
    if !response.is_success() {
        ctx.out.log("warn", &format!("server responded with status {}", response.status));
    }

    let body = if response.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&response.body).unwrap_or_else(|_| Value::String(response.text()))
    };

    ctx.out.result(json!({
        "status": response.status,
        "body": body,
    }));
    Ok(())
}
