//! Typed request helpers and Cloud Controller v2 resource shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::{Gateway, Request};
use crate::store::{EndpointSet, OrganizationFields, SpaceFields};

/// Metadata block every v2 resource carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub url: String,
}

/// A v2 resource: `{"metadata": {...}, "entity": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<E> {
    #[serde(default)]
    pub metadata: Metadata,
    pub entity: E,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationEntity {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceEntity {
    pub name: String,
    #[serde(default)]
    pub allow_ssh: bool,
}

impl From<Resource<OrganizationEntity>> for OrganizationFields {
    fn from(r: Resource<OrganizationEntity>) -> Self {
        Self {
            guid: r.metadata.guid,
            name: r.entity.name,
        }
    }
}

impl From<Resource<SpaceEntity>> for SpaceFields {
    fn from(r: Resource<SpaceEntity>) -> Self {
        Self {
            guid: r.metadata.guid,
            name: r.entity.name,
            allow_ssh: r.entity.allow_ssh,
        }
    }
}

/// `GET /v2/info`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CcInfo {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub doppler_logging_endpoint: String,
    #[serde(default)]
    pub routing_endpoint: String,
    #[serde(default)]
    pub min_cli_version: Option<String>,
    #[serde(default)]
    pub min_recommended_cli_version: Option<String>,
    #[serde(default)]
    pub app_ssh_oauth_client: String,
}

impl CcInfo {
    /// Endpoint set for a newly targeted API at `target`.
    pub fn into_endpoints(self, target: &str) -> EndpointSet {
        EndpointSet {
            target: target.trim_end_matches('/').to_string(),
            api_version: self.api_version,
            authorization_endpoint: self.authorization_endpoint,
            uaa_endpoint: self.token_endpoint,
            doppler_endpoint: self.doppler_logging_endpoint,
            routing_api_endpoint: self.routing_endpoint,
            ssh_oauth_client: self.app_ssh_oauth_client,
            min_cli_version: self.min_cli_version.unwrap_or_default(),
            min_recommended_cli_version: self.min_recommended_cli_version.unwrap_or_default(),
            ..EndpointSet::default()
        }
    }
}

impl Gateway {
    pub async fn get_resource<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.perform_for_json(Request::get(path)).await
    }

    pub async fn create_resource<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.perform_for_json(Request::post(path).json(body)?).await
    }

    pub async fn update_resource<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.perform_for_json(Request::put(path).json(body)?).await
    }

    pub async fn delete_resource(&self, path: &str) -> Result<()> {
        self.perform(Request::delete(path)).await.map(|_| ())
    }

    /// Delete with `async=true` and wait for the resulting job.
    pub async fn delete_resource_async(&self, path: &str) -> Result<()> {
        self.perform_polling(Request::delete(path)).await.map(|_| ())
    }
}
