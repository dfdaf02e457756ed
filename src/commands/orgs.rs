//! `cf orgs` / `cf spaces`

use anyhow::{Context as _, Result};
use serde_json::json;

use cf::resources::{OrganizationEntity, Resource, SpaceEntity};

use super::Context;
use crate::output::CliError;

pub async fn orgs(ctx: &Context) -> Result<()> {
    ctx.require_login()?;
    let cc = ctx.cloud_controller()?;

    ctx.out.log("info", "Getting orgs...");

    let orgs: Vec<Resource<OrganizationEntity>> = cc
        .list_all("/v2/organizations?order-by=name")
        .await
        .context("listing organizations")?;

    ctx.out.warnings(&cc.take_warnings());
    ctx.out.result(json!({
        "count": orgs.len(),
        "orgs": orgs.iter().map(|o| json!({
            "guid": o.metadata.guid,
            "name": o.entity.name,
        })).collect::<Vec<_>>()
    }));
    Ok(())
}

pub async fn spaces(ctx: &Context) -> Result<()> {
    ctx.require_login()?;
    if !ctx.config.has_organization() {
        ctx.out.error(CliError::input("NO_ORG_TARGETED", "No org targeted, use 'cf target -o ORG' first").with_op("spaces"));
    }
    let cc = ctx.cloud_controller()?;
    let org = ctx.config.organization();

    ctx.out.log("info", &format!("Getting spaces in org {}...", org.name));

    let path = format!("/v2/organizations/{}/spaces?order-by=name", org.guid);
    let spaces: Vec<Resource<SpaceEntity>> = cc
        .list_all(&path)
        .await
        .with_context(|| format!("listing spaces in {}", org.name))?;

    ctx.out.warnings(&cc.take_warnings());
    ctx.out.result(json!({
        "org": org.name,
        "count": spaces.len(),
        "spaces": spaces.iter().map(|s| json!({
            "guid": s.metadata.guid,
            "name": s.entity.name,
            "allow_ssh": s.entity.allow_ssh,
        })).collect::<Vec<_>>()
    }));
    Ok(())
}
