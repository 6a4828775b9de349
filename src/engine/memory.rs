// src/engine/memory.rs

//! In-process package engine backed by a [`Catalog`]
//!
//! The provider owns the "system": the installed set, transaction history,
//! imported signing keys and the package download cache. Engines opened
//! from it snapshot the installed set, see the packages of their enabled
//! repositories, and write back on commit.
//!
//! The resolver is a small provides/requires closure:
//!
//! 1. expand each goal request into install/upgrade/erase/... items
//! 2. attach installed packages matched by an item's obsoletes
//! 3. pull in the newest provider for every unsatisfied requirement
//! 4. erase installed packages whose requirements are no longer met
//!
//! All iteration runs over sorted collections, so the same goal against the
//! same catalog always yields the same items in the same order.

use super::catalog::Catalog;
use super::{
    Category, CommitOutcome, DownloadObserver, DownloadStatus, EngineError, EngineProvider,
    GoalAction, GoalRequest, GpgKeyInfo, Group, GroupPackageType, GroupSummary,
    HistoryPackage, HistoryTransaction, ItemKind, KeyConfirmation, MarkError, MetadataObserver,
    PackageEngine, PackageFilter, PackageSelector, Repository, RpmAction, RpmObserver, Scope,
    SolverOutcome, TransactionItem,
};
use crate::package::{Origin, Package};
use crate::version::Dependency;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default window for the `recent` filter, in days
const DEFAULT_RECENT_DAYS: i64 = 7;

#[derive(Debug, Default)]
struct SystemState {
    installed: Vec<Package>,
    /// Newest first
    history: Vec<HistoryTransaction>,
    imported_keys: BTreeSet<String>,
    /// Package ids fetched into the local cache
    package_cache: BTreeSet<String>,
}

/// Engine factory over a catalog
pub struct MemoryProvider {
    catalog: Arc<Catalog>,
    system: Arc<Mutex<SystemState>>,
}

impl MemoryProvider {
    pub fn new(catalog: Catalog) -> Self {
        let mut installed: Vec<Package> = catalog
            .packages
            .iter()
            .filter(|p| p.installed)
            .map(|p| p.to_package())
            .collect();
        sort_packages(&mut installed);

        let mut history = catalog.history.clone();
        history.sort_by(|a, b| b.tid.cmp(&a.tid));

        Self {
            catalog: Arc::new(catalog),
            system: Arc::new(Mutex::new(SystemState {
                installed,
                history,
                ..SystemState::default()
            })),
        }
    }

    /// Load the catalog at `path`
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        Ok(Self::new(Catalog::load(path)?))
    }

    /// Currently installed packages
    pub fn installed(&self) -> Vec<Package> {
        self.system.lock().installed.clone()
    }

    /// Signing keys imported so far
    pub fn imported_keys(&self) -> BTreeSet<String> {
        self.system.lock().imported_keys.clone()
    }
}

impl EngineProvider for MemoryProvider {
    fn repositories(&self) -> Vec<Repository> {
        self.catalog.repos.clone()
    }

    fn open(
        &self,
        enabled: Option<&BTreeSet<String>>,
        metadata: &mut dyn MetadataObserver,
    ) -> Result<Box<dyn PackageEngine>, EngineError> {
        let enabled_ids: BTreeSet<String> = match enabled {
            Some(ids) => ids.clone(),
            None => self
                .catalog
                .repos
                .iter()
                .filter(|r| r.enabled)
                .map(|r| r.id.clone())
                .collect(),
        };

        let mut repos = self.catalog.repos.clone();
        for repo in &mut repos {
            repo.enabled = enabled_ids.contains(&repo.id);
        }

        let mut loaded = BTreeSet::new();
        for repo in repos.iter().filter(|r| r.enabled) {
            if self.catalog.unavailable.contains(&repo.id) {
                metadata.end(&repo.id, false);
                if repo.skip_if_unavailable {
                    warn!("Skipping unavailable repository {}", repo.id);
                    continue;
                }
                return Err(EngineError::Repo(format!(
                    "Failed to download metadata for repo '{}'",
                    repo.id
                )));
            }
            metadata.progress(&repo.id, 0.5);
            metadata.progress(&repo.id, 1.0);
            metadata.end(&repo.id, true);
            loaded.insert(repo.id.clone());
        }

        let mut available = Vec::new();
        let mut failing = BTreeSet::new();
        for entry in self.catalog.packages.iter().filter(|p| !p.installed) {
            let Some(repo) = entry.repo.as_ref() else {
                continue;
            };
            if !loaded.contains(repo) {
                continue;
            }
            let pkg = entry.to_package();
            if entry.fail_download {
                failing.insert(pkg.package_id());
            }
            available.push(pkg);
        }
        sort_packages(&mut available);

        let installed = self.system.lock().installed.clone();
        debug!(
            "Opened memory engine: {} installed, {} available in {} repos",
            installed.len(),
            available.len(),
            loaded.len()
        );

        Ok(Box::new(MemoryEngine {
            catalog: Arc::clone(&self.catalog),
            system: Arc::clone(&self.system),
            installed,
            available,
            repos,
            config: self.catalog.config_json(),
            failing,
            goal: Vec::new(),
            resolved: None,
        }))
    }

    fn expire_cache(&self) -> Result<(), EngineError> {
        info!("Expiring metadata cache");
        Ok(())
    }
}

/// One opened engine instance
pub struct MemoryEngine {
    catalog: Arc<Catalog>,
    system: Arc<Mutex<SystemState>>,
    installed: Vec<Package>,
    available: Vec<Package>,
    repos: Vec<Repository>,
    config: serde_json::Map<String, serde_json::Value>,
    failing: BTreeSet<String>,
    goal: Vec<GoalRequest>,
    resolved: Option<Vec<TransactionItem>>,
}

fn sort_packages(pkgs: &mut [Package]) {
    pkgs.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.arch.cmp(&b.arch))
            .then_with(|| a.evr().cmp(&b.evr()))
            .then_with(|| a.origin.cmp(&b.origin))
    });
}

/// Keep the newest EVR per name.arch; on a tie the first one seen wins
fn newest_per_name_arch(pkgs: Vec<Package>) -> Vec<Package> {
    let mut newest: BTreeMap<(String, String), Package> = BTreeMap::new();
    for pkg in pkgs {
        let key = (pkg.name.clone(), pkg.arch.clone());
        match newest.get(&key) {
            Some(current) if pkg.evr().cmp(&current.evr()) != Ordering::Greater => {}
            _ => {
                newest.insert(key, pkg);
            }
        }
    }
    newest.into_values().collect()
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(name),
        Err(_) => pattern == name,
    }
}

/// Build a package from a local `name-version-release.arch.rpm` file
fn local_package(path: &Path) -> Result<Package, MarkError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| MarkError::Invalid(format!("Cannot open {}: {}", path.display(), e)))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MarkError::Invalid(format!("Invalid file name {}", path.display())))?;
    let stem = file_name
        .strip_suffix(".rpm")
        .ok_or_else(|| MarkError::Invalid(format!("{} is not an rpm file", file_name)))?;

    let invalid = || MarkError::Invalid(format!("Cannot parse package name from {}", file_name));
    let (nvr, arch) = stem.rsplit_once('.').ok_or_else(invalid)?;
    let (nv, release) = nvr.rsplit_once('-').ok_or_else(invalid)?;
    let (name, version) = nv.rsplit_once('-').ok_or_else(invalid)?;
    if name.is_empty() || version.is_empty() || release.is_empty() || arch.is_empty() {
        return Err(invalid());
    }

    let mut pkg = Package::new(name, 0, version, release, arch, Origin::CommandLine);
    pkg.size = meta.len();
    Ok(pkg)
}

impl MemoryEngine {
    fn installed_named(&self, pattern: &str) -> Vec<&Package> {
        self.installed
            .iter()
            .filter(|p| glob_match(pattern, &p.name))
            .collect()
    }

    fn installed_like(&self, pkg: &Package) -> Option<&Package> {
        self.installed
            .iter()
            .find(|p| p.name == pkg.name && p.arch == pkg.arch)
    }

    fn updates(&self) -> Vec<Package> {
        let newest = newest_per_name_arch(self.available.clone());
        newest
            .into_iter()
            .filter(|avail| {
                self.installed_like(avail)
                    .is_some_and(|inst| avail.evr() > inst.evr())
            })
            .collect()
    }

    fn obsoleters(&self) -> Vec<Package> {
        self.available
            .iter()
            .filter(|avail| {
                avail.obsoletes.iter().any(|o| match Dependency::parse(o) {
                    Ok(dep) => self
                        .installed
                        .iter()
                        .any(|inst| inst.name != avail.name && dep.matches(&inst.name, &inst.evr())),
                    Err(_) => false,
                })
            })
            .cloned()
            .collect()
    }

    fn recent_days(&self) -> i64 {
        self.config
            .get("recent")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_RECENT_DAYS)
    }

    fn group_installed(&self, group: &super::catalog::CatalogGroup) -> bool {
        !group.mandatory.is_empty()
            && group
                .mandatory
                .iter()
                .all(|name| self.installed.iter().any(|p| &p.name == name))
    }

    fn key_info(&self, key_id: &str, pkg: &Package) -> GpgKeyInfo {
        let known = self.catalog.keys.iter().find(|k| k.id == key_id);
        GpgKeyInfo {
            package_id: pkg.package_id(),
            user_id: known.map(|k| k.user_id.clone()).unwrap_or_default(),
            key_id: key_id.to_string(),
            key_url: known.map(|k| k.url.clone()).unwrap_or_default(),
            fingerprint: known.map(|k| k.fingerprint.clone()).unwrap_or_default(),
            timestamp: known.map(|k| k.timestamp).unwrap_or_default(),
        }
    }
}

impl PackageEngine for MemoryEngine {
    fn list(&self, filter: PackageFilter) -> Vec<Package> {
        let mut pkgs = match filter {
            PackageFilter::Installed => self.installed.clone(),
            PackageFilter::Available => newest_per_name_arch(self.available.clone()),
            PackageFilter::Updates => self.updates(),
            PackageFilter::Obsoletes => self.obsoleters(),
            PackageFilter::Recent => {
                let cutoff = chrono::Utc::now().timestamp() - self.recent_days() * 86_400;
                newest_per_name_arch(self.available.clone())
                    .into_iter()
                    .filter(|p| p.buildtime >= cutoff)
                    .collect()
            }
            PackageFilter::Extras => self
                .installed
                .iter()
                .filter(|inst| !self.available.iter().any(|a| a.same_nevra(inst)))
                .cloned()
                .collect(),
        };
        sort_packages(&mut pkgs);
        pkgs
    }

    fn find(&self, selector: &PackageSelector) -> Vec<Package> {
        let candidates: Vec<&Package> = match selector.scope {
            Scope::Installed => self.installed.iter().collect(),
            Scope::Available => self.available.iter().collect(),
            Scope::All => self.installed.iter().chain(self.available.iter()).collect(),
        };

        let matched: Vec<Package> = candidates
            .into_iter()
            .filter(|p| {
                selector.name.as_deref().is_none_or(|n| glob_match(n, &p.name))
                    && selector.epoch.is_none_or(|e| e == p.epoch)
                    && selector.version.as_deref().is_none_or(|v| v == p.version)
                    && selector.release.as_deref().is_none_or(|r| r == p.release)
                    && selector.arch.as_deref().is_none_or(|a| a == p.arch)
            })
            .cloned()
            .collect();

        let mut result = if selector.newest_only {
            newest_per_name_arch(matched)
        } else {
            matched
        };
        sort_packages(&mut result);
        result
    }

    fn search(&self, field: &str, key: &str) -> Vec<Package> {
        let key = key.to_lowercase();
        let value_of = |p: &Package| -> Option<String> {
            match field {
                "name" => Some(p.name.to_lowercase()),
                "summary" => Some(p.summary.to_lowercase()),
                "description" => Some(p.description.to_lowercase()),
                "url" => Some(p.url.to_lowercase()),
                _ => None,
            }
        };
        let mut pkgs: Vec<Package> = self
            .installed
            .iter()
            .chain(self.available.iter())
            .filter(|p| value_of(p).is_some_and(|v| v.contains(&key)))
            .cloned()
            .collect();
        sort_packages(&mut pkgs);
        pkgs
    }

    fn categories(&self) -> Vec<Category> {
        self.catalog
            .categories
            .iter()
            .map(|cat| Category {
                id: cat.id.clone(),
                name: cat.name.clone(),
                description: cat.description.clone(),
                groups: cat
                    .groups
                    .iter()
                    .filter_map(|gid| self.catalog.groups.iter().find(|g| &g.id == gid))
                    .map(|g| GroupSummary {
                        id: g.id.clone(),
                        name: g.name.clone(),
                        description: g.description.clone(),
                        installed: self.group_installed(g),
                    })
                    .collect(),
            })
            .collect()
    }

    fn group(&self, pattern: &str) -> Option<Group> {
        self.catalog
            .groups
            .iter()
            .find(|g| glob_match(pattern, &g.id) || glob_match(pattern, &g.name))
            .map(|g| Group {
                id: g.id.clone(),
                name: g.name.clone(),
                packages: g.members(),
            })
    }

    fn repositories(&self) -> Vec<Repository> {
        self.repos.clone()
    }

    fn config(&self) -> serde_json::Map<String, serde_json::Value> {
        self.config.clone()
    }

    fn set_config(&mut self, key: &str, value: serde_json::Value) -> bool {
        if !self.config.contains_key(key) {
            return false;
        }
        self.config.insert(key.to_string(), value.clone());

        for repo in self.repos.iter_mut().filter(|r| r.enabled) {
            let Ok(serde_json::Value::Object(mut fields)) = serde_json::to_value(&*repo) else {
                continue;
            };
            if !fields.contains_key(key) {
                continue;
            }
            fields.insert(key.to_string(), value.clone());
            match serde_json::from_value(serde_json::Value::Object(fields)) {
                Ok(updated) => {
                    debug!("Setting option {} on repository {}", key, repo.id);
                    *repo = updated;
                }
                Err(e) => warn!("Cannot apply option {} to {}: {}", key, repo.id, e),
            }
        }
        true
    }

    fn mark(&mut self, request: &GoalRequest) -> Result<(), MarkError> {
        match request {
            GoalRequest::Package { package, action } => match action {
                GoalAction::Install | GoalAction::Obsolete => {}
                GoalAction::Remove | GoalAction::Update | GoalAction::Reinstall | GoalAction::Downgrade => {
                    if self.installed_named(&package.name).is_empty() {
                        return Err(MarkError::NotInstalled(package.nevra()));
                    }
                }
            },
            GoalRequest::Pattern { pattern, action } => match action {
                GoalAction::Install | GoalAction::Obsolete => {
                    if !self.available.iter().any(|p| glob_match(pattern, &p.name))
                        && self.installed_named(pattern).is_empty()
                    {
                        return Err(MarkError::NoMatch(pattern.clone()));
                    }
                }
                _ => {
                    if self.installed_named(pattern).is_empty() {
                        return Err(MarkError::NotInstalled(pattern.clone()));
                    }
                }
            },
            GoalRequest::LocalFile(path) => {
                local_package(path)?;
            }
            GoalRequest::GroupInstall { group, .. } | GoalRequest::GroupRemove { group } => {
                if self.group(group).is_none() {
                    return Err(MarkError::Comps(format!("No group named {}", group)));
                }
            }
        }

        self.goal.push(request.clone());
        self.resolved = None;
        Ok(())
    }

    fn reset_goal(&mut self) {
        self.goal.clear();
        self.resolved = None;
    }

    fn resolve(&mut self) -> SolverOutcome {
        let outcome = Solver::new(self).solve(&self.goal);
        self.resolved = match &outcome {
            SolverOutcome::Solved(items) => Some(items.clone()),
            SolverOutcome::Unresolved(_) => None,
        };
        outcome
    }

    fn download(
        &mut self,
        packages: &[Package],
        observer: &mut dyn DownloadObserver,
    ) -> Result<(), EngineError> {
        let remote: Vec<&Package> = packages
            .iter()
            .filter(|p| p.origin != Origin::CommandLine)
            .collect();
        let total_bytes = remote.iter().map(|p| p.size).sum();
        observer.start(remote.len(), total_bytes);

        for pkg in remote {
            let name = pkg.nevra();
            let id = pkg.package_id();

            let flow = if self.failing.contains(&id) {
                observer.end(
                    &name,
                    DownloadStatus::Failed,
                    "Cannot download: all mirrors were tried",
                )
            } else if self.system.lock().package_cache.contains(&id) {
                observer.end(&name, DownloadStatus::AlreadyExists, "Already downloaded")
            } else {
                observer.progress(&name, pkg.size / 2, pkg.size);
                observer.progress(&name, pkg.size, pkg.size);
                self.system.lock().package_cache.insert(id);
                observer.end(&name, DownloadStatus::Ok, "")
            };

            if flow.is_break() {
                return Err(EngineError::DownloadAborted);
            }
        }
        Ok(())
    }

    fn commit(
        &mut self,
        rpm: &mut dyn RpmObserver,
        keys: &mut dyn KeyConfirmation,
    ) -> Result<CommitOutcome, EngineError> {
        let items = match self.resolved.clone() {
            Some(items) => items,
            None => match self.resolve() {
                SolverOutcome::Solved(items) => items,
                SolverOutcome::Unresolved(messages) => {
                    return Ok(CommitOutcome { code: 1, messages });
                }
            },
        };

        if items.is_empty() {
            debug!("Nothing to commit");
            return Ok(CommitOutcome {
                code: 0,
                messages: Vec::new(),
            });
        }

        let incoming: Vec<&Package> = items
            .iter()
            .filter(|i| i.kind.needs_download())
            .map(|i| &i.package)
            .collect();

        for pkg in &incoming {
            let Some(key_id) = pkg.gpg_key.as_deref() else {
                continue;
            };
            if self.system.lock().imported_keys.contains(key_id) {
                continue;
            }
            let info = self.key_info(key_id, pkg);
            if !keys.confirm_import(&info) {
                return Ok(CommitOutcome {
                    code: 1,
                    messages: vec![format!(
                        "GPG key {} for {} was not imported",
                        key_id,
                        pkg.nevra()
                    )],
                });
            }
            info!("Imported GPG key {}", key_id);
            self.system.lock().imported_keys.insert(key_id.to_string());
        }

        let missing: Vec<String> = {
            let system = self.system.lock();
            incoming
                .iter()
                .filter(|p| p.origin != Origin::CommandLine)
                .filter(|p| !system.package_cache.contains(&p.package_id()))
                .map(|p| format!("{} : package was not downloaded", p.nevra()))
                .collect()
        };
        if !missing.is_empty() {
            return Ok(CommitOutcome {
                code: 1,
                messages: missing,
            });
        }

        let total = items.len();
        let mut trans_data = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let pkg = &item.package;
            let action = match item.kind {
                ItemKind::Install => RpmAction::Install,
                ItemKind::Upgrade => RpmAction::Update,
                ItemKind::Erase => RpmAction::Erase,
                ItemKind::Reinstall => RpmAction::Reinstall,
                ItemKind::Downgrade => RpmAction::Downgrade,
            };
            let size = pkg.install_size.max(pkg.size);
            rpm.progress(&pkg.nevra(), action, 0, size, index + 1, total);
            rpm.progress(&pkg.nevra(), action, size, size, index + 1, total);

            match item.kind {
                ItemKind::Erase => {
                    self.installed.retain(|p| !p.same_nevra(pkg));
                    trans_data.push(history_entry(pkg, "Erase", false));
                }
                kind => {
                    let replaced: Vec<Package> = self
                        .installed
                        .iter()
                        .filter(|p| p.name == pkg.name && p.arch == pkg.arch)
                        .cloned()
                        .collect();
                    self.installed
                        .retain(|p| !(p.name == pkg.name && p.arch == pkg.arch));
                    for old in &replaced {
                        rpm.progress(&old.nevra(), RpmAction::Cleanup, size, size, index + 1, total);
                    }

                    let mut new_pkg = pkg.clone();
                    new_pkg.origin = Origin::Installed(pkg.origin.repo_id().map(str::to_string));
                    trans_data.push(history_entry(
                        &new_pkg,
                        match kind {
                            ItemKind::Upgrade => "Update",
                            ItemKind::Downgrade => "Downgrade",
                            ItemKind::Reinstall => "Reinstall",
                            _ => "Install",
                        },
                        true,
                    ));
                    for old in replaced.iter().filter(|old| !old.same_nevra(pkg)) {
                        let state = if kind == ItemKind::Downgrade {
                            "Downgraded"
                        } else {
                            "Updated"
                        };
                        trans_data.push(history_entry(old, state, false));
                    }
                    self.installed.push(new_pkg);
                }
            }

            for obsolete in &item.obsoleted {
                rpm.progress(&obsolete.nevra(), RpmAction::Obsolete, size, size, index + 1, total);
                self.installed.retain(|p| !p.same_nevra(obsolete));
                trans_data.push(history_entry(obsolete, "Obsoleted", false));
            }
        }
        sort_packages(&mut self.installed);

        let mut system = self.system.lock();
        let tid = system.history.first().map(|t| t.tid + 1).unwrap_or(1);
        system.history.insert(
            0,
            HistoryTransaction {
                tid,
                begin: chrono::Utc::now().timestamp(),
                packages: trans_data,
            },
        );
        system.installed = self.installed.clone();
        drop(system);

        info!("Committed transaction {} with {} elements", tid, total);
        self.goal.clear();
        self.resolved = None;
        Ok(CommitOutcome {
            code: 0,
            messages: Vec::new(),
        })
    }

    fn history(&self) -> Vec<HistoryTransaction> {
        self.system.lock().history.clone()
    }

    fn close(&mut self) {
        self.goal.clear();
        self.resolved = None;
    }
}

fn history_entry(pkg: &Package, state: &str, installed: bool) -> HistoryPackage {
    HistoryPackage {
        package_id: pkg.package_id(),
        state: state.to_string(),
        installed,
    }
}

/// Turns goal requests into transaction items
struct Solver<'a> {
    engine: &'a MemoryEngine,
    items: Vec<TransactionItem>,
    errors: Vec<String>,
}

impl<'a> Solver<'a> {
    fn new(engine: &'a MemoryEngine) -> Self {
        Self {
            engine,
            items: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn solve(mut self, goal: &[GoalRequest]) -> SolverOutcome {
        for request in goal {
            self.apply(request);
        }
        self.attach_obsoletes();
        self.pull_requirements();
        self.erase_broken_dependents();

        if self.errors.is_empty() {
            SolverOutcome::Solved(self.items)
        } else {
            self.errors.sort();
            self.errors.dedup();
            SolverOutcome::Unresolved(self.errors)
        }
    }

    fn push(&mut self, kind: ItemKind, package: Package) {
        let queued = self
            .items
            .iter()
            .any(|i| i.package.same_nevra(&package) && i.package.origin == package.origin);
        if !queued {
            self.items.push(TransactionItem {
                kind,
                package,
                obsoleted: Vec::new(),
            });
        }
    }

    /// Install or upgrade, skipping when an equal or newer version is installed
    fn install(&mut self, pkg: &Package) {
        match self.engine.installed_like(pkg) {
            Some(inst) if pkg.evr() > inst.evr() => self.push(ItemKind::Upgrade, pkg.clone()),
            Some(_) => {}
            None => self.push(ItemKind::Install, pkg.clone()),
        }
    }

    fn newest_available(&self, name: &str, arch: Option<&str>) -> Option<Package> {
        self.engine
            .available
            .iter()
            .filter(|p| p.name == name && arch.is_none_or(|a| a == p.arch))
            .max_by(|a, b| a.evr().cmp(&b.evr()))
            .cloned()
    }

    fn apply(&mut self, request: &GoalRequest) {
        match request {
            GoalRequest::Package { package, action } => self.apply_package(package, *action),
            GoalRequest::Pattern { pattern, action } => match action {
                GoalAction::Install | GoalAction::Obsolete => {
                    let matching: Vec<Package> = self
                        .engine
                        .available
                        .iter()
                        .filter(|p| glob_match(pattern, &p.name))
                        .cloned()
                        .collect();
                    for pkg in newest_per_name_arch(matching) {
                        self.install(&pkg);
                    }
                }
                _ => {
                    let installed: Vec<Package> = self
                        .engine
                        .installed_named(pattern)
                        .into_iter()
                        .cloned()
                        .collect();
                    for pkg in installed {
                        self.apply_package(&pkg, *action);
                    }
                }
            },
            GoalRequest::LocalFile(path) => match local_package(path) {
                Ok(pkg) => self.install(&pkg),
                Err(e) => self.errors.push(e.to_string()),
            },
            GoalRequest::GroupInstall { group, types } => {
                let Some(group) = self.engine.group(group) else {
                    self.errors.push(format!("No group named {}", group));
                    return;
                };
                for (name, kind) in &group.packages {
                    if !types.contains(kind) {
                        continue;
                    }
                    if self.engine.installed.iter().any(|p| &p.name == name) {
                        continue;
                    }
                    match self.newest_available(name, None) {
                        Some(pkg) => self.install(&pkg),
                        None if *kind == GroupPackageType::Mandatory => {
                            warn!("Mandatory group package {} is not available", name);
                        }
                        None => {}
                    }
                }
            }
            GoalRequest::GroupRemove { group } => {
                let Some(group) = self.engine.group(group) else {
                    self.errors.push(format!("No group named {}", group));
                    return;
                };
                for (name, _) in &group.packages {
                    let installed: Vec<Package> = self
                        .engine
                        .installed
                        .iter()
                        .filter(|p| &p.name == name)
                        .cloned()
                        .collect();
                    for pkg in installed {
                        self.push(ItemKind::Erase, pkg);
                    }
                }
            }
        }
    }

    fn apply_package(&mut self, pkg: &Package, action: GoalAction) {
        let installed = self.engine.installed_like(pkg).cloned();
        match action {
            GoalAction::Install | GoalAction::Obsolete => {
                if !pkg.is_installed() {
                    self.install(pkg);
                }
            }
            GoalAction::Remove => {
                match self.engine.installed.iter().find(|p| p.same_nevra(pkg)) {
                    Some(inst) => self.push(ItemKind::Erase, inst.clone()),
                    None => self
                        .errors
                        .push(format!("Package {} is not installed", pkg.nevra())),
                }
            }
            GoalAction::Update => {
                let Some(inst) = installed else {
                    self.errors
                        .push(format!("Package {} is not installed", pkg.name));
                    return;
                };
                let target = if pkg.is_installed() {
                    self.newest_available(&pkg.name, Some(&pkg.arch))
                } else {
                    Some(pkg.clone())
                };
                if let Some(target) = target.filter(|t| t.evr() > inst.evr()) {
                    self.push(ItemKind::Upgrade, target);
                }
            }
            GoalAction::Reinstall => {
                let Some(inst) = installed.filter(|i| i.same_nevra(pkg)) else {
                    self.errors
                        .push(format!("Package {} is not installed", pkg.nevra()));
                    return;
                };
                match self.engine.available.iter().find(|a| a.same_nevra(&inst)) {
                    Some(avail) => self.push(ItemKind::Reinstall, avail.clone()),
                    None => self.errors.push(format!(
                        "Installed package {} not available",
                        inst.nevra()
                    )),
                }
            }
            GoalAction::Downgrade => {
                let Some(inst) = installed else {
                    self.errors
                        .push(format!("Package {} is not installed", pkg.name));
                    return;
                };
                let target = if pkg.is_installed() {
                    self.engine
                        .available
                        .iter()
                        .filter(|a| a.name == inst.name && a.arch == inst.arch)
                        .filter(|a| a.evr() < inst.evr())
                        .max_by(|a, b| a.evr().cmp(&b.evr()))
                        .cloned()
                } else {
                    Some(pkg.clone()).filter(|p| p.evr() < inst.evr())
                };
                match target {
                    Some(target) => self.push(ItemKind::Downgrade, target),
                    None => self.errors.push(format!(
                        "Package {} of lowest version already installed, cannot downgrade it",
                        inst.nevra()
                    )),
                }
            }
        }
    }

    fn is_leaving(&self, inst: &Package) -> bool {
        self.items.iter().any(|i| match i.kind {
            ItemKind::Erase => i.package.same_nevra(inst),
            _ => {
                (i.package.name == inst.name && i.package.arch == inst.arch)
                    || i.obsoleted.iter().any(|o| o.same_nevra(inst))
            }
        })
    }

    /// Packages present once the items are applied
    fn world(&self) -> Vec<&Package> {
        self.engine
            .installed
            .iter()
            .filter(|p| !self.is_leaving(p))
            .chain(
                self.items
                    .iter()
                    .filter(|i| i.kind != ItemKind::Erase)
                    .map(|i| &i.package),
            )
            .collect()
    }

    fn world_provides(&self, dep: &Dependency) -> bool {
        self.world().iter().any(|p| p.provides_capability(dep))
    }

    fn attach_obsoletes(&mut self) {
        for index in 0..self.items.len() {
            if self.items[index].kind == ItemKind::Erase {
                continue;
            }
            let pkg = self.items[index].package.clone();
            for obsolete in &pkg.obsoletes {
                let Ok(dep) = Dependency::parse(obsolete) else {
                    continue;
                };
                let victims: Vec<Package> = self
                    .engine
                    .installed
                    .iter()
                    .filter(|inst| inst.name != pkg.name && dep.matches(&inst.name, &inst.evr()))
                    .cloned()
                    .collect();
                for victim in victims {
                    if !self.items[index].obsoleted.iter().any(|o| o.same_nevra(&victim)) {
                        self.items[index].obsoleted.push(victim);
                    }
                }
            }
        }
    }

    fn pull_requirements(&mut self) {
        let mut cursor = 0;
        while cursor < self.items.len() {
            let item = self.items[cursor].clone();
            cursor += 1;
            if item.kind == ItemKind::Erase {
                continue;
            }
            for req in &item.package.requires {
                let dep = match Dependency::parse(req) {
                    Ok(dep) => dep,
                    Err(_) => {
                        self.errors.push(format!(
                            "Invalid requirement '{}' in {}",
                            req,
                            item.package.nevra()
                        ));
                        continue;
                    }
                };
                if self.world_provides(&dep) {
                    continue;
                }
                let provider = self
                    .engine
                    .available
                    .iter()
                    .filter(|p| p.provides_capability(&dep))
                    .max_by(|a, b| a.evr().cmp(&b.evr()))
                    .cloned();
                match provider {
                    Some(provider) => {
                        debug!("{} pulls in {}", item.package.nevra(), provider.nevra());
                        self.install(&provider);
                        // Only an older provider exists and installs never downgrade
                        if !self.world_provides(&dep) {
                            self.errors.push(format!(
                                "package {} requires {}, but none of the providers can be installed",
                                item.package.nevra(),
                                req.trim()
                            ));
                        }
                    }
                    None => self.errors.push(format!(
                        "nothing provides {} needed by {}",
                        req.trim(),
                        item.package.nevra()
                    )),
                }
            }
        }
    }

    fn erase_broken_dependents(&mut self) {
        loop {
            let broken: Vec<Package> = self
                .engine
                .installed
                .iter()
                .filter(|inst| !self.is_leaving(inst))
                .filter(|inst| {
                    inst.requires.iter().any(|req| match Dependency::parse(req) {
                        Ok(dep) => {
                            let was_met = self
                                .engine
                                .installed
                                .iter()
                                .any(|p| p.provides_capability(&dep));
                            was_met && !self.world_provides(&dep)
                        }
                        Err(_) => false,
                    })
                })
                .cloned()
                .collect();
            if broken.is_empty() {
                break;
            }
            for pkg in broken {
                debug!("Erasing dependent package {}", pkg.nevra());
                self.push(ItemKind::Erase, pkg);
            }
        }
    }
}
