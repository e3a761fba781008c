use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Discoverer, DiscovererOptions};
use crate::error::DiscoveryError;

/// Artifact Hub package kind for Inspektor Gadget gadgets.
const GADGET_KIND: u32 = 22;
const SEARCH_LIMIT: u32 = 60;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    packages: Vec<Package>,
}

#[derive(Debug, Deserialize)]
struct Package {
    #[serde(default)]
    name: String,
    normalized_name: String,
    #[serde(default)]
    official: bool,
    #[serde(default)]
    cncf: bool,
    #[serde(default)]
    verified_publisher: bool,
    #[serde(default)]
    deprecated: bool,
}

impl Package {
    fn is_trusted(&self) -> bool {
        self.official && self.cncf
    }
}

#[derive(Debug, Deserialize)]
struct PackageDetails {
    #[serde(default)]
    containers_images: Vec<ContainerImage>,
}

#[derive(Debug, Deserialize)]
struct ContainerImage {
    image: String,
}

/// Lists gadget images published on Artifact Hub.
pub struct ArtifactHubDiscoverer {
    client: reqwest::Client,
    base_url: String,
    include_unofficial: bool,
}

impl ArtifactHubDiscoverer {
    pub fn new(options: DiscovererOptions) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| DiscoveryError::Http {
                url: options.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            include_unofficial: options.include_unofficial,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, DiscoveryError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Http {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| DiscoveryError::Http { url, source })
    }

    async fn package_image(&self, normalized_name: &str) -> Result<String, DiscoveryError> {
        let url = format!(
            "{}/api/v1/packages/inspektor-gadget/gadgets/{}",
            self.base_url, normalized_name
        );
        let details: PackageDetails = self.get_json(url).await?;
        details
            .containers_images
            .into_iter()
            .next()
            .map(|c| c.image)
            .ok_or_else(|| DiscoveryError::NoImages(normalized_name.to_string()))
    }
}

#[async_trait]
impl Discoverer for ArtifactHubDiscoverer {
    async fn list_images(&self) -> Result<Vec<String>, DiscoveryError> {
        let url = format!(
            "{}/api/v1/packages/search?kind={GADGET_KIND}&limit={SEARCH_LIMIT}",
            self.base_url
        );
        let search: SearchResponse = self.get_json(url).await?;

        let mut images = Vec::new();
        for package in search.packages {
            if package.deprecated || !(self.include_unofficial || package.is_trusted()) {
                log::debug!(
                    "Skipping gadget package {} (official={}, cncf={}, verified={}, deprecated={})",
                    package.normalized_name,
                    package.official,
                    package.cncf,
                    package.verified_publisher,
                    package.deprecated
                );
                continue;
            }
            match self.package_image(&package.normalized_name).await {
                Ok(image) => images.push(image),
                Err(e) => log::warn!("Skipping gadget package {}: {e}", package.name),
            }
        }
        log::info!("Discovered {} gadget images on Artifact Hub", images.len());
        Ok(images)
    }
}
