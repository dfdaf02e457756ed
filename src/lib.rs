//! Cloud Foundry API access with self-refreshing credentials.
//!
//! - [`store`]: the persisted CLI config (tokens, target, org/space)
//! - [`auth`]: UAA logins and single-flight token refresh
//! - [`gateway`]: authenticated requests with one refresh-and-retry
//! - [`pagination`]: walking `next_url` / `pagination.next` collections
//! - [`resources`]: typed helpers and v2 resource shapes
//! - [`redact`]: hiding secrets in traced traffic

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pagination;
pub mod persist;
pub mod redact;
pub mod resources;
pub mod store;

pub use auth::{TokenPair, TokenRefresher, UaaAuthenticator};
pub use error::{AuthError, ConfigError, ErrorKind, GatewayError, HttpError};
pub use gateway::{ApiFlavor, Gateway, Request, Response};
pub use pagination::Page;
pub use store::ConfigStore;
