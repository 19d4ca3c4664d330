//! Package fetching from a package index.
//!
//! [`FetchPackages`] is the network seam of the install stage; the real
//! implementation resolves exact pins against an index base URL, tests inject
//! a mock.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::http::HttpClient;
use crate::manifest::Pin;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchPackages: Send + Sync {
    /// Fetch the archive blob for one exact pin.
    async fn fetch(&self, pin: &Pin) -> Result<Vec<u8>>;
}

/// Fetcher backed by a flat package index:
/// `{base}/packages/{name}/{name}-{version}.tar.gz`.
pub struct IndexFetcher {
    http: HttpClient,
    base_url: String,
}

impl IndexFetcher {
    pub fn new(http: HttpClient, base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn blob_url(&self, pin: &Pin) -> String {
        format!("{}/packages/{}/{}", self.base_url, pin.name, pin.blob_name())
    }
}

#[async_trait]
impl FetchPackages for IndexFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, pin: &Pin) -> Result<Vec<u8>> {
        let url = self.blob_url(pin);
        info!("Fetching {} {} from index...", pin.name, pin.version);
        self.http
            .download_bytes(&url)
            .await
            .with_context(|| format!("Failed to fetch {}=={}", pin.name, pin.version))
    }
}
