//! `cf api`

use anyhow::{Context as _, Result};
use serde_json::json;

use cf::gateway::{build_http_client, ApiFlavor, Gateway, Request};
use cf::resources::CcInfo;
use cf::store::EndpointSet;

use super::Context;

pub async fn run(ctx: &Context, url: Option<String>, skip_ssl_validation: bool, unset: bool) -> Result<()> {
    if unset {
        return unset_api(ctx);
    }

    match url {
        Some(url) => set_api(ctx, &url, skip_ssl_validation).await,
        None => {
            show(ctx);
            Ok(())
        }
    }
}

/// Add `https://` when no scheme was given and drop trailing slashes.
fn normalize_endpoint(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

async fn set_api(ctx: &Context, url: &str, skip_ssl_validation: bool) -> Result<()> {
    let endpoint = normalize_endpoint(url);
    ctx.out.log("info", &format!("Setting API endpoint to {}...", endpoint));

    let http = build_http_client(&ctx.settings, skip_ssl_validation)?;
    let gateway = Gateway::with_client(ApiFlavor::CloudController, ctx.config.clone(), http, &ctx.settings);

    let info: CcInfo = gateway
        .perform_for_json(Request::get(format!("{}/v2/info", endpoint)).unauthenticated())
        .await
        .with_context(|| format!("could not reach API endpoint {}", endpoint))?;

    ctx.out.warnings(&gateway.take_warnings());

    ctx.config.update(|data| {
        data.endpoints = info.into_endpoints(&endpoint);
        data.ssl_disabled = skip_ssl_validation;
    });

    show(ctx);
    Ok(())
}

fn unset_api(ctx: &Context) -> Result<()> {
    ctx.out.log("info", "Unsetting API endpoint...");
    ctx.config.update(|data| {
        data.endpoints = EndpointSet::default();
        data.ssl_disabled = false;
    });
    ctx.out.result(json!({ "api": null }));
    Ok(())
}

fn show(ctx: &Context) {
    let data = ctx.config.get();
    if !ctx.config.has_api_endpoint() {
        ctx.out.log("info", "No API endpoint set. Use 'cf api URL' to set one.");
        ctx.out.result(json!({ "api": null }));
        return;
    }

    ctx.out.result(json!({
        "api": data.endpoints.target,
        "api_version": data.endpoints.api_version,
        "ssl_disabled": data.ssl_disabled,
        "logged_in": ctx.config.is_logged_in(),
    }));
}
