//! `cf auth` / `cf logout`

use anyhow::Result;
use serde_json::json;

use super::Context;

pub async fn login(ctx: &Context, username: &str, password: &str, client_credentials: bool) -> Result<()> {
    let authenticator = ctx.authenticator()?;

    ctx.out.log("info", &format!("Authenticating {} against {}...", username, ctx.config.token_endpoint()));

    if client_credentials {
        authenticator.authenticate_client(username, password).await?;
    } else {
        authenticator.authenticate(username, password).await?;
    }

    ctx.out.result(json!({
        "authenticated": true,
        "user": username,
        "grant_type": ctx.config.credentials().grant_type,
        "api": ctx.config.api_endpoint(),
    }));
    Ok(())
}

pub fn logout(ctx: &Context) -> Result<()> {
    ctx.out.log("info", "Logging out...");
    ctx.config.clear_session();
    ctx.out.result(json!({ "logged_out": true }));
    Ok(())
}
