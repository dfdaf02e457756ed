//! Paginated collection walking.
//!
//! Cloud Controller v2 pages look like `{"resources": [...], "next_url": "/v2/..."}`
//! and v3 pages like `{"resources": [...], "pagination": {"next": {"href": "https://..."}}}`.
//! A null or empty cursor marks the last page.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::gateway::{Gateway, Request};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    resources: Option<Vec<Value>>,
    /// Outer `Some` means the key was present, even if null.
    #[serde(default, deserialize_with = "present")]
    next_url: Option<Option<String>>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(default)]
    href: String,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub resources: Vec<T>,
    /// Where the next page lives; `None` on the last page.
    pub next: Option<String>,
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode a page body fetched from `url`.
    ///
    /// The whole page fails if the envelope has neither `resources` nor any
    /// cursor field, or if any single element does not decode.
    pub fn decode(url: &str, body: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(body).map_err(|e| GatewayError::decode(url, e))?;

        if envelope.resources.is_none() && envelope.next_url.is_none() && envelope.pagination.is_none() {
            return Err(GatewayError::decode(url, "page has no resources and no next page link"));
        }

        let resources = envelope
            .resources
            .unwrap_or_default()
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()
            .map_err(|e| GatewayError::decode(url, e))?;

        let next = envelope
            .next_url
            .flatten()
            .or_else(|| envelope.pagination.and_then(|p| p.next).map(|l| l.href))
            .filter(|n| !n.trim().is_empty());

        Ok(Self { resources, next })
    }
}

impl Gateway {
    /// Walk every page from `start`, handing each element to `on_element`
    /// in order. Returning `false` from the callback stops the walk early;
    /// that is still a success.
    pub async fn list_paginated<T, F>(&self, start: &str, mut on_element: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> bool,
    {
        let mut next = Some(start.to_string());
        let mut pages = 0usize;

        while let Some(path) = next.take() {
            let response = self.perform(Request::get(path)).await?;
            let page = Page::<T>::decode(response.url(), &response.body)?;
            pages += 1;

            for element in page.resources {
                if !on_element(element) {
                    debug!(start, pages, "pagination stopped by caller");
                    return Ok(());
                }
            }

            next = page.next;
        }

        debug!(start, pages, "pagination complete");
        Ok(())
    }

    /// Collect every element of a paginated collection.
    pub async fn list_all<T: DeserializeOwned>(&self, start: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        self.list_paginated(start, |element: T| {
            all.push(element);
            true
        })
        .await?;
        Ok(all)
    }
}
