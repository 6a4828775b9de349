// src/engine/catalog.rs

//! TOML catalog backing the in-memory engine
//!
//! ```toml
//! [config]
//! recent = 7
//!
//! [[repo]]
//! id = "fedora"
//! name = "Fedora"
//!
//! [[package]]
//! name = "bash"
//! version = "5.2.26"
//! release = "1.fc43"
//! arch = "x86_64"
//! repo = "fedora"          # or: installed = true
//! requires = ["glibc >= 2.38"]
//! ```

use super::{EngineError, GroupPackageType, HistoryTransaction, Repository};
use crate::package::{ChangelogEntry, Origin, Package};
use serde::Deserialize;
use std::path::Path;

/// Whole catalog file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub config: toml::Table,
    #[serde(default, rename = "repo")]
    pub repos: Vec<Repository>,
    #[serde(default, rename = "package")]
    pub packages: Vec<CatalogPackage>,
    #[serde(default, rename = "category")]
    pub categories: Vec<CatalogCategory>,
    #[serde(default, rename = "group")]
    pub groups: Vec<CatalogGroup>,
    #[serde(default, rename = "key")]
    pub keys: Vec<CatalogKey>,
    #[serde(default)]
    pub history: Vec<HistoryTransaction>,
    /// Repositories whose metadata cannot be fetched
    #[serde(default)]
    pub unavailable: Vec<String>,
}

/// Package entry; `installed` packages live in the system set
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPackage {
    pub name: String,
    #[serde(default)]
    pub epoch: u64,
    pub version: String,
    pub release: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub install_size: u64,
    #[serde(default)]
    pub buildtime: i64,
    #[serde(default)]
    pub sourcerpm: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub obsoletes: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
    #[serde(default)]
    pub gpg_key: Option<String>,
    /// Make every download of this package fail
    #[serde(default)]
    pub fail_download: bool,
}

fn default_arch() -> String {
    "noarch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogCategory {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mandatory: Vec<String>,
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub conditional: Vec<String>,
}

impl CatalogGroup {
    /// Members tagged with their type, in declaration order
    pub fn members(&self) -> Vec<(String, GroupPackageType)> {
        let tagged = |names: &[String], kind: GroupPackageType| {
            names.iter().map(move |n| (n.clone(), kind)).collect::<Vec<_>>()
        };
        let mut members = tagged(&self.mandatory, GroupPackageType::Mandatory);
        members.extend(tagged(&self.default, GroupPackageType::Default));
        members.extend(tagged(&self.optional, GroupPackageType::Optional));
        members.extend(tagged(&self.conditional, GroupPackageType::Conditional));
        members
    }
}

/// Signing key known to the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogKey {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Catalog {
    /// Parse a catalog from TOML text
    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        let catalog: Catalog =
            toml::from_str(text).map_err(|e| EngineError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Catalog(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<(), EngineError> {
        for pkg in &self.packages {
            match (&pkg.repo, pkg.installed) {
                (None, false) => {
                    return Err(EngineError::Catalog(format!(
                        "package {} has neither a repo nor installed = true",
                        pkg.name
                    )));
                }
                (Some(repo), false) if !self.repos.iter().any(|r| &r.id == repo) => {
                    return Err(EngineError::Catalog(format!(
                        "package {} refers to unknown repo {}",
                        pkg.name, repo
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Engine config as JSON values
    pub fn config_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.config
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect()
    }
}

impl CatalogPackage {
    /// Package object for this entry
    pub fn to_package(&self) -> Package {
        let origin = if self.installed {
            Origin::Installed(self.repo.clone())
        } else {
            Origin::Repo(self.repo.clone().unwrap_or_default())
        };
        let mut pkg = Package::new(
            &self.name,
            self.epoch,
            &self.version,
            &self.release,
            &self.arch,
            origin,
        );
        pkg.summary = self.summary.clone();
        pkg.description = self.description.clone();
        pkg.url = self.url.clone();
        pkg.license = self.license.clone();
        pkg.size = self.size;
        pkg.install_size = self.install_size;
        pkg.buildtime = self.buildtime;
        pkg.sourcerpm = self.sourcerpm.clone();
        pkg.requires = self.requires.clone();
        pkg.provides = self.provides.clone();
        pkg.obsoletes = self.obsoletes.clone();
        pkg.files = self.files.clone();
        pkg.changelog = self.changelog.clone();
        pkg.gpg_key = self.gpg_key.clone();
        pkg
    }
}
