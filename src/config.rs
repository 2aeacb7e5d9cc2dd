// ⚙️ Settings - loaded from a TOML file
//
// Every section has defaults, so an empty file (or no file at all) is a
// valid configuration for a local registry.

use crate::dar::DEFAULT_COLLECTIONS;
use crate::derived::DEFAULT_PRIMARY_RANK;
use crate::error::{CacheError, Result};
use crate::registry::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub registry: RegistrySettings,
    pub dar: DarSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub base_url: String,
    /// Root organisation; read from the registry when absent
    pub organisation_uuid: Option<Uuid>,
    pub page_size: usize,
    pub timeout_seconds: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            base_url: "http://localhost:8080".to_string(),
            organisation_uuid: None,
            page_size: DEFAULT_PAGE_SIZE,
            timeout_seconds: 300,
        }
    }
}

impl RegistrySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarSettings {
    pub enabled: bool,
    pub base_url: String,
    pub collections: Vec<String>,
}

impl Default for DarSettings {
    fn default() -> Self {
        DarSettings {
            enabled: true,
            base_url: "https://dawa.aws.dk".to_string(),
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub historic: bool,
    pub artifact_path: PathBuf,
    /// Primary-type class user keys, best first
    pub primary_rank: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            historic: false,
            artifact_path: PathBuf::from("orgcache.db"),
            primary_rank: DEFAULT_PRIMARY_RANK.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw).map_err(|e| CacheError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.registry.page_size == 0 {
            return Err(CacheError::Config("registry.page_size must be positive".to_string()));
        }
        if self.registry.base_url.trim().is_empty() {
            return Err(CacheError::Config("registry.base_url is empty".to_string()));
        }
        if self.dar.enabled && self.dar.collections.is_empty() {
            return Err(CacheError::Config("dar.collections is empty".to_string()));
        }
        Ok(())
    }
}
