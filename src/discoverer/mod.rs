//! Enumerating installable gadget images.

mod artifacthub;

pub use artifacthub::ArtifactHubDiscoverer;

use async_trait::async_trait;

use crate::error::DiscoveryError;

pub const SOURCE_ARTIFACTHUB: &str = "artifacthub";

#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn list_images(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Options shared by discoverer implementations.
#[derive(Debug, Clone)]
pub struct DiscovererOptions {
    pub base_url: String,
    /// Keep packages without an official, CNCF or verified publisher marker.
    pub include_unofficial: bool,
}

impl Default for DiscovererOptions {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_ARTIFACTHUB_URL.to_string(),
            include_unofficial: false,
        }
    }
}

/// Discoverer for a named source.
pub fn new(source: &str, options: DiscovererOptions) -> Result<Box<dyn Discoverer>, DiscoveryError> {
    match source {
        SOURCE_ARTIFACTHUB => Ok(Box::new(ArtifactHubDiscoverer::new(options)?)),
        other => Err(DiscoveryError::UnknownSource(other.to_string())),
    }
}
