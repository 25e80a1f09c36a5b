//! npm registry lookup for publish status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::config::RegistryConfig;
use crate::domain::traits::RegistryClient;

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(default, rename = "dist-tags")]
    dist_tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NpmRegistry {
    base_url: String,
    timeout: Duration,
}

impl NpmRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Scoped names keep the `@` but encode the slash.
    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.replace('/', "%2F"))
    }
}

#[async_trait]
impl RegistryClient for NpmRegistry {
    async fn published_version(&self, package_name: &str) -> Result<Option<String>> {
        let url = self.package_url(package_name);
        let response = crate::infrastructure::llm::http_client()
            .get(&url)
            .header("Accept", "application/vnd.npm.install-v1+json")
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Registry request failed: {}", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(package = package_name, "Package not published yet");
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Registry returned HTTP {} for {}", response.status(), package_name);
        }

        let packument: Packument = response
            .json()
            .await
            .with_context(|| format!("Invalid registry response for {}", package_name))?;
        Ok(latest_version(packument))
    }
}

fn latest_version(packument: Packument) -> Option<String> {
    packument.dist_tags.get("latest").cloned()
}
