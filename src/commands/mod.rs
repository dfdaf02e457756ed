//! Command handlers

pub mod api;
pub mod auth;
pub mod curl;
pub mod orgs;
pub mod target;

use std::sync::Arc;

use anyhow::Result;

use cf::auth::UaaAuthenticator;
use cf::config::Settings;
use cf::error::{AuthError, GatewayError};
use cf::gateway::{build_http_client, ApiFlavor, Gateway};
use cf::store::ConfigStore;

use crate::output::Output;

/// Everything a command needs: the config store, settings and output.
pub struct Context {
    pub config: Arc<ConfigStore>,
    pub settings: Settings,
    pub out: Output,
}

impl Context {
    pub fn new(config: Arc<ConfigStore>, settings: Settings, out: Output) -> Self {
        Self { config, settings, out }
    }

    fn http(&self) -> Result<reqwest::Client> {
        Ok(build_http_client(&self.settings, self.config.is_ssl_disabled())?)
    }

    pub fn authenticator(&self) -> Result<Arc<UaaAuthenticator>> {
        Ok(Arc::new(UaaAuthenticator::new(self.config.clone(), self.http()?)))
    }

    fn gateway(&self, flavor: ApiFlavor) -> Result<Gateway> {
        let http = self.http()?;
        let refresher = Arc::new(UaaAuthenticator::new(self.config.clone(), http.clone()));
        Ok(Gateway::with_client(flavor, self.config.clone(), http, &self.settings).with_token_refresher(refresher))
    }

    /// Gateway for the targeted Cloud Controller.
    pub fn cloud_controller(&self) -> Result<Gateway> {
        if !self.config.has_api_endpoint() {
            return Err(no_api_endpoint().into());
        }
        self.gateway(ApiFlavor::CloudController)
    }

    /// Gateway for the targeted UAA.
    pub fn uaa(&self) -> Result<Gateway> {
        if self.config.token_endpoint().is_empty() {
            return Err(AuthError::NoTokenEndpoint.into());
        }
        self.gateway(ApiFlavor::Uaa)
    }

    pub fn require_login(&self) -> Result<()> {
        if !self.config.has_api_endpoint() {
            return Err(no_api_endpoint().into());
        }
        if !self.config.is_logged_in() {
            return Err(AuthError::NotLoggedIn.into());
        }
        Ok(())
    }
}

fn no_api_endpoint() -> GatewayError {
    GatewayError::InvalidRequest("no API endpoint set, use 'cf api URL' first".into())
}
