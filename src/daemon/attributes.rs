// src/daemon/attributes.rs

//! Package attributes exposed to clients
//!
//! Clients ask for attributes by name. Each known name maps to an
//! [`Attribute`] variant with a pure value function; unknown names are an
//! [`UnknownAttribute`] error which the wire layer turns into `null`.
//!
//! Most attributes read a field of the package object. The derived ones
//! (`action`, `downgrades`) look at the rest of the index through a
//! [`PackageView`], which caches the lists it needs for one request.

use crate::engine::{PackageEngine, PackageFilter, PackageSelector, Scope};
use crate::package::Package;
use serde_json::{Value, json};
use std::cell::OnceCell;
use std::str::FromStr;
use thiserror::Error;

/// Name did not match any attribute
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown package attribute: {0}")]
pub struct UnknownAttribute(pub String);

/// Attributes a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Name,
    Epoch,
    Version,
    Release,
    Arch,
    RepoId,
    Summary,
    Description,
    Url,
    License,
    /// Download size
    Size,
    DownloadSize,
    InstallSize,
    BuildTime,
    SourceRpm,
    Requires,
    Provides,
    Obsoletes,
    Files,
    Changelog,
    /// What the client could do with the package
    Action,
    /// Older available versions of the same name.arch
    Downgrades,
    PkgTags,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Epoch => "epoch",
            Self::Version => "version",
            Self::Release => "release",
            Self::Arch => "arch",
            Self::RepoId => "repoid",
            Self::Summary => "summary",
            Self::Description => "description",
            Self::Url => "url",
            Self::License => "license",
            Self::Size => "size",
            Self::DownloadSize => "downloadsize",
            Self::InstallSize => "installsize",
            Self::BuildTime => "buildtime",
            Self::SourceRpm => "sourcerpm",
            Self::Requires => "requires",
            Self::Provides => "provides",
            Self::Obsoletes => "obsoletes",
            Self::Files => "files",
            Self::Changelog => "changelog",
            Self::Action => "action",
            Self::Downgrades => "downgrades",
            Self::PkgTags => "pkgtags",
        }
    }

    /// Whether the value depends on more than the package itself
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Action | Self::Downgrades)
    }
}

impl FromStr for Attribute {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let attr = match s {
            "name" => Self::Name,
            "epoch" => Self::Epoch,
            "version" => Self::Version,
            "release" => Self::Release,
            "arch" => Self::Arch,
            "repoid" | "reponame" => Self::RepoId,
            "summary" => Self::Summary,
            "description" => Self::Description,
            "url" => Self::Url,
            "license" => Self::License,
            "size" => Self::Size,
            "downloadsize" => Self::DownloadSize,
            "installsize" => Self::InstallSize,
            "buildtime" => Self::BuildTime,
            "sourcerpm" => Self::SourceRpm,
            "requires" => Self::Requires,
            "provides" => Self::Provides,
            "obsoletes" => Self::Obsoletes,
            "files" | "filelist" => Self::Files,
            "changelog" => Self::Changelog,
            "action" => Self::Action,
            "downgrades" => Self::Downgrades,
            "pkgtags" => Self::PkgTags,
            _ => return Err(UnknownAttribute(s.to_string())),
        };
        Ok(attr)
    }
}

/// Value of a plain (non-derived) attribute
pub fn plain_value(pkg: &Package, attr: Attribute) -> Option<Value> {
    let value = match attr {
        Attribute::Name => json!(pkg.name),
        Attribute::Epoch => json!(pkg.epoch),
        Attribute::Version => json!(pkg.version),
        Attribute::Release => json!(pkg.release),
        Attribute::Arch => json!(pkg.arch),
        Attribute::RepoId => json!(pkg.origin.to_string()),
        Attribute::Summary => json!(pkg.summary),
        Attribute::Description => json!(pkg.description),
        Attribute::Url => json!(pkg.url),
        Attribute::License => json!(pkg.license),
        Attribute::Size | Attribute::DownloadSize => json!(pkg.size),
        Attribute::InstallSize => json!(pkg.install_size),
        Attribute::BuildTime => json!(pkg.buildtime),
        Attribute::SourceRpm => json!(pkg.sourcerpm),
        Attribute::Requires => json!(pkg.requires),
        Attribute::Provides => json!(pkg.provides),
        Attribute::Obsoletes => json!(pkg.obsoletes),
        Attribute::Files => json!(pkg.files),
        Attribute::Changelog => Value::Array(
            pkg.changelog
                .iter()
                .map(|c| json!([c.timestamp, c.author, c.text]))
                .collect(),
        ),
        Attribute::PkgTags => json!([]),
        Attribute::Action | Attribute::Downgrades => return None,
    };
    Some(value)
}

/// Per-request view of the index for derived attributes
pub struct PackageView<'a> {
    engine: &'a dyn PackageEngine,
    installed: OnceCell<Vec<Package>>,
    updates: OnceCell<Vec<Package>>,
    obsoleters: OnceCell<Vec<Package>>,
}

impl<'a> PackageView<'a> {
    pub fn new(engine: &'a dyn PackageEngine) -> Self {
        Self {
            engine,
            installed: OnceCell::new(),
            updates: OnceCell::new(),
            obsoleters: OnceCell::new(),
        }
    }

    pub fn installed(&self) -> &[Package] {
        self.installed
            .get_or_init(|| self.engine.list(PackageFilter::Installed))
    }

    fn updates(&self) -> &[Package] {
        self.updates
            .get_or_init(|| self.engine.list(PackageFilter::Updates))
    }

    fn obsoleters(&self) -> &[Package] {
        self.obsoleters
            .get_or_init(|| self.engine.list(PackageFilter::Obsoletes))
    }

    /// Value of `attr` for `pkg`
    pub fn value(&self, pkg: &Package, attr: Attribute) -> Value {
        match attr {
            Attribute::Action => json!(self.action(pkg)),
            Attribute::Downgrades => json!(self.downgrades(pkg)),
            _ => plain_value(pkg, attr).unwrap_or(Value::Null),
        }
    }

    /// Value of the attribute called `name`, `null` when unknown
    pub fn value_by_name(&self, pkg: &Package, name: &str) -> Value {
        match name.parse::<Attribute>() {
            Ok(attr) => self.value(pkg, attr),
            Err(_) => Value::Null,
        }
    }

    /// Listing row: the bare id, or `[id, attr...]` when attributes are asked for
    pub fn row(&self, pkg: &Package, attrs: &[String]) -> Value {
        if attrs.is_empty() {
            return json!(pkg.package_id());
        }
        let mut row = Vec::with_capacity(attrs.len() + 1);
        row.push(json!(pkg.package_id()));
        row.extend(attrs.iter().map(|name| self.value_by_name(pkg, name)));
        Value::Array(row)
    }

    /// `remove`, `update`, `obsolete`, `downgrade` or `install`
    pub fn action(&self, pkg: &Package) -> &'static str {
        if pkg.is_installed() {
            return "remove";
        }
        if self.updates().iter().any(|u| u == pkg) {
            return "update";
        }
        if self.obsoleters().iter().any(|o| o == pkg) {
            return "obsolete";
        }
        let older = self
            .installed()
            .iter()
            .filter(|i| i.name == pkg.name)
            .any(|i| pkg.evr() < i.evr());
        if older { "downgrade" } else { "install" }
    }

    /// Ids of available packages with the same name.arch and a lower EVR
    pub fn downgrades(&self, pkg: &Package) -> Vec<String> {
        let selector = PackageSelector::named(pkg.name.as_str())
            .scope(Scope::Available)
            .arch(pkg.arch.as_str());
        let evr = pkg.evr();
        self.engine
            .find(&selector)
            .iter()
            .filter(|a| a.name == pkg.name && a.evr() < evr)
            .map(|a| a.package_id())
            .collect()
    }
}
