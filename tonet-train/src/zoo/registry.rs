//! Pretrained weight registry: architecture identifier to download URL.

use crate::error::TrainError;
use std::collections::BTreeMap;

/// Resolves where the official pretrained weights for an architecture live.
pub trait WeightRegistry: Send + Sync {
    fn resolve(&self, architecture: &str) -> Option<String>;
}

/// Registry backed by a fixed table, usually `weight_urls` from the config.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    urls: BTreeMap<String, String>,
}

impl StaticRegistry {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        Self { urls }
    }

    pub fn with_entry(mut self, architecture: impl Into<String>, url: impl Into<String>) -> Self {
        self.urls.insert(architecture.into(), url.into());
        self
    }

    pub fn architectures(&self) -> impl Iterator<Item = &String> {
        self.urls.keys()
    }
}

impl WeightRegistry for StaticRegistry {
    fn resolve(&self, architecture: &str) -> Option<String> {
        self.urls.get(architecture).cloned()
    }
}

/// File name a downloaded resource is cached under: the last URL path segment.
pub fn cache_file_name(resource: &str) -> Result<String, TrainError> {
    let parsed = url::Url::parse(resource)
        .map_err(|e| TrainError::config(format!("invalid weights URL {resource}: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TrainError::config(format!("weights URL {resource} has no file name")))
}
