// src/package.rs

//! Package identity and metadata
//!
//! A package is identified on the wire by a six-field reference,
//! `name,epoch,version,release,arch,origin`. The origin is the repository id
//! the package comes from, `@System` for an installed package (or
//! `@<repo>` when the engine remembers where it was installed from), or
//! `@commandline` for a local file.

use crate::error::{Error, Result};
use crate::version::{Dependency, RpmVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Origin marker for installed packages
pub const INSTALLED_ORIGIN: &str = "@System";
/// Origin marker for packages loaded from a local file
pub const COMMANDLINE_ORIGIN: &str = "@commandline";

/// Where a package object lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// Available from an enabled repository
    Repo(String),
    /// Installed on the system, optionally remembering the source repository
    Installed(Option<String>),
    /// Loaded from a local package file
    CommandLine,
}

impl Origin {
    /// Whether this origin denotes an installed package
    pub fn is_installed(&self) -> bool {
        matches!(self, Origin::Installed(_))
    }

    /// Repository id for available packages
    pub fn repo_id(&self) -> Option<&str> {
        match self {
            Origin::Repo(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Repo(id) => write!(f, "{}", id),
            Origin::Installed(None) => write!(f, "{}", INSTALLED_ORIGIN),
            Origin::Installed(Some(repo)) => write!(f, "@{}", repo),
            Origin::CommandLine => write!(f, "{}", COMMANDLINE_ORIGIN),
        }
    }
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(Error::ParseError("empty package origin".to_string())),
            INSTALLED_ORIGIN => Ok(Origin::Installed(None)),
            COMMANDLINE_ORIGIN => Ok(Origin::CommandLine),
            _ => match s.strip_prefix('@') {
                Some("") => Err(Error::ParseError(format!("invalid package origin '{}'", s))),
                Some(repo) => Ok(Origin::Installed(Some(repo.to_string()))),
                None => Ok(Origin::Repo(s.to_string())),
            },
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Six-field package reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageRef {
    pub name: String,
    pub epoch: u64,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub origin: Origin,
}

impl PackageRef {
    /// Parse the wire form `name,epoch,version,release,arch,origin`
    pub fn parse(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(',').collect();
        let [name, epoch, version, release, arch, origin] = fields.as_slice() else {
            return Err(Error::ParseError(format!(
                "package id '{}' must have 6 comma separated fields",
                s
            )));
        };

        if name.is_empty() || version.is_empty() || arch.is_empty() {
            return Err(Error::ParseError(format!("incomplete package id '{}'", s)));
        }
        let epoch = epoch
            .parse::<u64>()
            .map_err(|e| Error::ParseError(format!("invalid epoch in package id '{}': {}", s, e)))?;
        // A non-canonical epoch ("00") would not survive a format/parse cycle
        if epoch.to_string() != fields[1] {
            return Err(Error::ParseError(format!("non-canonical epoch in package id '{}'", s)));
        }

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            origin: origin.parse()?,
        })
    }

    /// The EVR part as a comparable version
    pub fn evr(&self) -> RpmVersion {
        RpmVersion::new(self.epoch, &self.version, &self.release)
    }

    /// Human readable `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        if self.epoch > 0 {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        } else {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.name, self.epoch, self.version, self.release, self.arch, self.origin
        )
    }
}

impl FromStr for PackageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One changelog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    /// Unix timestamp
    pub timestamp: i64,
    pub author: String,
    pub text: String,
}

/// Package object as exposed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub epoch: u64,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub origin: Origin,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub license: String,
    /// Download size in bytes
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
    /// Signing key id, when the package is signed
    #[serde(default)]
    pub gpg_key: Option<String>,
}

impl Package {
    /// Minimal package with identity fields only
    pub fn new(
        name: impl Into<String>,
        epoch: u64,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
        origin: Origin,
    ) -> Self {
        Self {
            name: name.into(),
            epoch,
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
            origin,
            summary: String::new(),
            description: String::new(),
            url: String::new(),
            license: String::new(),
            size: 0,
            install_size: 0,
            buildtime: 0,
            sourcerpm: String::new(),
            requires: Vec::new(),
            provides: Vec::new(),
            obsoletes: Vec::new(),
            files: Vec::new(),
            changelog: Vec::new(),
            gpg_key: None,
        }
    }

    /// Wire reference for this package
    pub fn reference(&self) -> PackageRef {
        PackageRef {
            name: self.name.clone(),
            epoch: self.epoch,
            version: self.version.clone(),
            release: self.release.clone(),
            arch: self.arch.clone(),
            origin: self.origin.clone(),
        }
    }

    /// Wire reference as a string
    pub fn package_id(&self) -> String {
        self.reference().to_string()
    }

    pub fn evr(&self) -> RpmVersion {
        RpmVersion::new(self.epoch, &self.version, &self.release)
    }

    pub fn nevra(&self) -> String {
        self.reference().nevra()
    }

    pub fn is_installed(&self) -> bool {
        self.origin.is_installed()
    }

    /// Whether name, EVR and arch match a reference (origin ignored)
    pub fn same_nevra(&self, other: &Package) -> bool {
        self.name == other.name
            && self.epoch == other.epoch
            && self.version == other.version
            && self.release == other.release
            && self.arch == other.arch
    }

    /// Whether this package satisfies a capability requirement
    pub fn provides_capability(&self, dep: &Dependency) -> bool {
        if dep.matches(&self.name, &self.evr()) {
            return true;
        }
        self.provides.iter().any(|p| match Dependency::parse(p) {
            // A provide without a version is satisfied at the package's own EVR
            Ok(provide) => match provide.constraint {
                crate::version::VersionConstraint::Exact(ref v) => dep.matches(&provide.name, v),
                _ => dep.matches(&provide.name, &self.evr()),
            },
            Err(_) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_roundtrip_preserves_zero_epoch() {
        let s = "pkgX,0,1.0,1,noarch,repo1";
        let r = PackageRef::parse(s).unwrap();
        assert_eq!(r.epoch, 0);
        assert_eq!(r.origin, Origin::Repo("repo1".into()));
        assert_eq!(r.to_string(), s);
    }

    #[test]
    fn test_ref_origins() {
        let installed = PackageRef::parse("bash,0,5.2,1.fc43,x86_64,@System").unwrap();
        assert!(installed.origin.is_installed());
        assert_eq!(installed.to_string(), "bash,0,5.2,1.fc43,x86_64,@System");

        let from_repo = PackageRef::parse("bash,0,5.2,1.fc43,x86_64,@fedora").unwrap();
        assert_eq!(from_repo.origin, Origin::Installed(Some("fedora".into())));
        assert_eq!(from_repo.to_string(), "bash,0,5.2,1.fc43,x86_64,@fedora");

        let local = PackageRef::parse("foo,2,1.0,1,noarch,@commandline").unwrap();
        assert_eq!(local.origin, Origin::CommandLine);
        assert_eq!(local.nevra(), "foo-2:1.0-1.noarch");
    }

    #[test]
    fn test_ref_rejects_malformed() {
        assert!(PackageRef::parse("pkgX,0,1.0,1,noarch").is_err());
        assert!(PackageRef::parse("pkgX,0,1.0,1,noarch,repo1,extra").is_err());
        assert!(PackageRef::parse("pkgX,x,1.0,1,noarch,repo1").is_err());
        assert!(PackageRef::parse("pkgX,00,1.0,1,noarch,repo1").is_err());
        assert!(PackageRef::parse(",0,1.0,1,noarch,repo1").is_err());
        assert!(PackageRef::parse("pkgX,0,1.0,1,noarch,").is_err());
        assert!(PackageRef::parse("pkgX,0,1.0,1,noarch,@").is_err());
    }

    #[test]
    fn test_provides_capability() {
        let mut pkg = Package::new("libfoo", 0, "1.2", "1", "x86_64", Origin::Repo("r".into()));
        pkg.provides = vec!["libfoo.so.1".into(), "foo-api = 3.0".into()];

        assert!(pkg.provides_capability(&Dependency::parse("libfoo >= 1.0").unwrap()));
        assert!(!pkg.provides_capability(&Dependency::parse("libfoo >= 2.0").unwrap()));
        assert!(pkg.provides_capability(&Dependency::parse("libfoo.so.1").unwrap()));
        assert!(pkg.provides_capability(&Dependency::parse("foo-api >= 3").unwrap()));
        assert!(!pkg.provides_capability(&Dependency::parse("foo-api > 3.0").unwrap()));
    }
}
