//! `cf target`

use anyhow::Result;
use serde_json::json;

use cf::gateway::Gateway;
use cf::resources::{OrganizationEntity, Resource, SpaceEntity};
use cf::store::{OrganizationFields, SpaceFields};

use super::Context;
use crate::output::CliError;

pub async fn run(ctx: &Context, org: Option<String>, space: Option<String>) -> Result<()> {
    if org.is_none() && space.is_none() {
        show(ctx);
        return Ok(());
    }

    ctx.require_login()?;
    let cc = ctx.cloud_controller()?;

    if let Some(name) = org {
        ctx.out.log("info", &format!("Targeting org {}...", name));
        match find_org(&cc, &name).await? {
            Some(org) => ctx.config.set_organization(org),
            None => ctx.out.error(
                CliError::input("ORG_NOT_FOUND", &format!("Organization {} not found", name)).with_op("target"),
            ),
        }
    }

    if let Some(name) = space {
        if !ctx.config.has_organization() {
            ctx.out.error(
                CliError::input("NO_ORG_TARGETED", "No org targeted, use 'cf target -o ORG' first").with_op("target"),
            );
        }

        ctx.out.log("info", &format!("Targeting space {}...", name));
        let org_guid = ctx.config.organization().guid;
        match find_space(&cc, &org_guid, &name).await? {
            Some(space) => ctx.config.set_space(space),
            None => ctx.out.error(
                CliError::input("SPACE_NOT_FOUND", &format!("Space {} not found", name)).with_op("target"),
            ),
        }
    }

    ctx.out.warnings(&cc.take_warnings());
    show(ctx);
    Ok(())
}

fn name_filter(name: &str) -> String {
    urlencoding::encode(&format!("name:{}", name)).into_owned()
}

async fn find_org(cc: &Gateway, name: &str) -> Result<Option<OrganizationFields>> {
    let path = format!("/v2/organizations?q={}", name_filter(name));
    let mut found = None;
    cc.list_paginated(&path, |org: Resource<OrganizationEntity>| {
        found = Some(OrganizationFields::from(org));
        false
    })
    .await?;
    Ok(found)
}

async fn find_space(cc: &Gateway, org_guid: &str, name: &str) -> Result<Option<SpaceFields>> {
    let path = format!("/v2/organizations/{}/spaces?q={}", org_guid, name_filter(name));
    let mut found = None;
    cc.list_paginated(&path, |space: Resource<SpaceEntity>| {
        found = Some(SpaceFields::from(space));
        false
    })
    .await?;
    Ok(found)
}

fn show(ctx: &Context) {
    let data = ctx.config.get();
    let or_null = |s: &str| if s.is_empty() { json!(null) } else { json!(s) };

    ctx.out.result(json!({
        "api": or_null(&data.endpoints.target),
        "api_version": or_null(&data.endpoints.api_version),
        "logged_in": ctx.config.is_logged_in(),
        "org": or_null(&data.session.organization.name),
        "space": or_null(&data.session.space.name),
    }));
}
