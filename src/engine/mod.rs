// src/engine/mod.rs

//! Package engine collaborator interface
//!
//! The daemon never resolves dependencies, parses repository metadata or
//! applies RPM transactions itself. Those jobs belong to an engine reached
//! through the traits in this module:
//!
//! - [`EngineProvider`] opens a fresh engine instance (the "sack") for a
//!   set of enabled repositories
//! - [`PackageEngine`] answers queries, holds the goal, resolves it and
//!   downloads/applies the result
//! - the observer traits are the engine's callback extension points, which
//!   the daemon implements to forward progress to clients
//!
//! [`memory`] provides an in-process engine backed by a TOML catalog.

pub mod catalog;
pub mod memory;

use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by an engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Repository metadata could not be loaded or refreshed
    #[error("Repository error: {0}")]
    Repo(String),

    /// The download observer asked the engine to stop
    #[error("Download aborted")]
    DownloadAborted,

    /// Applying the transaction failed before it started
    #[error("{0}")]
    Transaction(String),

    /// Catalog (backing data) could not be read
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while adding a request to the goal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkError {
    /// The pattern matched no package
    #[error("No package matched: {0}")]
    NoMatch(String),

    /// The operation needs an installed package and there is none
    #[error("Package not installed: {0}")]
    NotInstalled(String),

    /// Group lookup failed
    #[error("Group error: {0}")]
    Comps(String),

    /// The request cannot be expressed (bad local file, wrong origin)
    #[error("{0}")]
    Invalid(String),
}

/// Named enumeration filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageFilter {
    Installed,
    Available,
    Updates,
    Obsoletes,
    Recent,
    Extras,
}

impl PackageFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "installed" => Some(Self::Installed),
            "available" => Some(Self::Available),
            "updates" => Some(Self::Updates),
            "obsoletes" => Some(Self::Obsoletes),
            "recent" => Some(Self::Recent),
            "extras" => Some(Self::Extras),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Available => "available",
            Self::Updates => "updates",
            Self::Obsoletes => "obsoletes",
            Self::Recent => "recent",
            Self::Extras => "extras",
        }
    }
}

/// Which package objects a selector looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    Installed,
    Available,
    #[default]
    All,
}

/// Structured package query
#[derive(Debug, Clone, Default)]
pub struct PackageSelector {
    /// Name glob (`*` and `?` wildcards)
    pub name: Option<String>,
    pub epoch: Option<u64>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub scope: Scope,
    /// Keep only the newest EVR per name.arch
    pub newest_only: bool,
}

impl PackageSelector {
    pub fn named(pattern: impl Into<String>) -> Self {
        Self {
            name: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn newest_only(mut self, newest_only: bool) -> Self {
        self.newest_only = newest_only;
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }
}

/// Operation kinds the goal understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GoalAction {
    Install,
    Remove,
    Update,
    Reinstall,
    Downgrade,
    Obsolete,
}

/// Group membership classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPackageType {
    Mandatory,
    Default,
    Optional,
    Conditional,
}

/// A single request added to the engine's goal
#[derive(Debug, Clone, PartialEq)]
pub enum GoalRequest {
    /// Act on one concrete package object
    Package { package: Package, action: GoalAction },
    /// Act on whatever the engine's pattern matching selects
    Pattern { pattern: String, action: GoalAction },
    /// Install a local package file
    LocalFile(PathBuf),
    /// Install the given member types of a group
    GroupInstall {
        group: String,
        types: Vec<GroupPackageType>,
    },
    /// Remove the installed members of a group
    GroupRemove { group: String },
}

/// Kinds of change in a resolved transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Install,
    Upgrade,
    Erase,
    Reinstall,
    Downgrade,
}

impl ItemKind {
    /// Items whose active package has to be fetched before applying
    pub fn needs_download(&self) -> bool {
        !matches!(self, ItemKind::Erase)
    }
}

/// One element of a resolved transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionItem {
    pub kind: ItemKind,
    /// The package being installed, upgraded to, erased, ...
    pub package: Package,
    /// Installed packages replaced through obsoletes
    pub obsoleted: Vec<Package>,
}

/// Result of resolving the goal
#[derive(Debug, Clone, PartialEq)]
pub enum SolverOutcome {
    /// The goal is satisfiable; an empty list means nothing to do
    Solved(Vec<TransactionItem>),
    /// Problems the solver reported
    Unresolved(Vec<String>),
}

/// Outcome of applying the resolved transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// 0 on success, engine specific otherwise
    pub code: i32,
    pub messages: Vec<String>,
}

/// A comps category with its groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub installed: bool,
}

/// Group member list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub packages: Vec<(String, GroupPackageType)>,
}

/// Repository configuration as exposed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub baseurl: Vec<String>,
    #[serde(default)]
    pub metalink: Option<String>,
    #[serde(default = "default_true")]
    pub gpgcheck: bool,
    #[serde(default)]
    pub gpgkey: Vec<String>,
    #[serde(default = "default_cost")]
    pub cost: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub skip_if_unavailable: bool,
}

fn default_true() -> bool {
    true
}

fn default_cost() -> u32 {
    1000
}

fn default_priority() -> u32 {
    99
}

/// A package touched by a past transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPackage {
    pub package_id: String,
    /// e.g. "Install", "Update", "Updated", "Erase", "Obsoleted"
    pub state: String,
    /// Whether the package is still installed
    pub installed: bool,
}

/// A past transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTransaction {
    pub tid: i64,
    /// Unix timestamp the transaction started
    pub begin: i64,
    pub packages: Vec<HistoryPackage>,
}

/// Status reported at the end of one file download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Ok,
    Failed,
    AlreadyExists,
    Mirror,
    Drpm,
}

impl DownloadStatus {
    /// Integer status code used on the wire
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => -1,
            Self::Failed => 1,
            Self::AlreadyExists => 2,
            Self::Mirror => 3,
            Self::Drpm => 4,
        }
    }
}

/// RPM transaction element actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmAction {
    Cleanup,
    Downgrade,
    Erase,
    Install,
    Obsolete,
    Reinstall,
    Update,
}

impl RpmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cleanup => "cleanup",
            Self::Downgrade => "downgrade",
            Self::Erase => "erase",
            Self::Install => "install",
            Self::Obsolete => "obsolete",
            Self::Reinstall => "reinstall",
            Self::Update => "update",
        }
    }
}

/// GPG key the engine wants to import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpgKeyInfo {
    pub package_id: String,
    pub user_id: String,
    pub key_id: String,
    pub key_url: String,
    pub fingerprint: String,
    pub timestamp: i64,
}

/// Repository metadata load callbacks
pub trait MetadataObserver {
    fn progress(&mut self, repo_id: &str, fraction: f64);
    fn end(&mut self, repo_id: &str, ok: bool);
}

/// Package download callbacks
pub trait DownloadObserver {
    fn start(&mut self, total_files: usize, total_bytes: u64);
    fn progress(&mut self, name: &str, done: u64, total: u64);
    /// Returning `Break` tells the engine to stop fetching
    fn end(&mut self, name: &str, status: DownloadStatus, message: &str) -> ControlFlow<()>;
}

/// RPM transaction callbacks
pub trait RpmObserver {
    fn progress(
        &mut self,
        package: &str,
        action: RpmAction,
        elem_current: u64,
        elem_total: u64,
        tx_current: usize,
        tx_total: usize,
    );
    fn script_error(&mut self, package: &str, message: &str);
}

/// Decides whether a signing key may be imported
pub trait KeyConfirmation {
    fn confirm_import(&mut self, key: &GpgKeyInfo) -> bool;
}

/// Factory for engine instances
pub trait EngineProvider: Send + Sync {
    /// All configured repositories, enabled or not
    fn repositories(&self) -> Vec<Repository>;

    /// Load an engine for the given repositories (`None` = configured set)
    fn open(
        &self,
        enabled: Option<&BTreeSet<String>>,
        metadata: &mut dyn MetadataObserver,
    ) -> Result<Box<dyn PackageEngine>, EngineError>;

    /// Invalidate the on-disk metadata cache
    fn expire_cache(&self) -> Result<(), EngineError>;
}

/// A loaded package index plus goal
pub trait PackageEngine: Send {
    fn list(&self, filter: PackageFilter) -> Vec<Package>;
    fn find(&self, selector: &PackageSelector) -> Vec<Package>;
    /// Packages whose `field` contains `key`, case-insensitively
    fn search(&self, field: &str, key: &str) -> Vec<Package>;

    fn categories(&self) -> Vec<Category>;
    fn group(&self, pattern: &str) -> Option<Group>;

    /// Repositories this engine was opened with
    fn repositories(&self) -> Vec<Repository>;
    fn config(&self) -> serde_json::Map<String, serde_json::Value>;
    fn set_config(&mut self, key: &str, value: serde_json::Value) -> bool;

    fn mark(&mut self, request: &GoalRequest) -> Result<(), MarkError>;
    fn reset_goal(&mut self);
    fn resolve(&mut self) -> SolverOutcome;

    fn download(
        &mut self,
        packages: &[Package],
        observer: &mut dyn DownloadObserver,
    ) -> Result<(), EngineError>;
    fn commit(
        &mut self,
        rpm: &mut dyn RpmObserver,
        keys: &mut dyn KeyConfirmation,
    ) -> Result<CommitOutcome, EngineError>;

    /// Past transactions, newest first
    fn history(&self) -> Vec<HistoryTransaction>;

    /// Release held resources
    fn close(&mut self) {}
}
