// src/daemon/query.rs

//! Read-only queries against the package index
//!
//! Everything here takes an opened engine and returns the JSON value that
//! goes back to the client. Listings run through [`filter_packages`] so an
//! installed package never shows up twice.

use super::attributes::PackageView;
use crate::engine::{GroupPackageType, PackageEngine, PackageFilter, PackageSelector, Scope};
use crate::package::{Origin, Package, PackageRef};
use crate::{Error, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

/// Replace available objects that match an installed one
///
/// With `replace` the installed object takes the place of an available one
/// with the same name.arch and EVR; without it the available one is simply
/// dropped. Output is sorted by package id.
pub fn filter_packages(installed: &[Package], pkgs: Vec<Package>, replace: bool) -> Vec<Package> {
    let mut out: BTreeMap<String, Package> = BTreeMap::new();
    for pkg in pkgs {
        let twin = if pkg.is_installed() {
            None
        } else {
            installed.iter().find(|i| i.same_nevra(&pkg))
        };
        match twin {
            Some(inst) if replace => {
                out.insert(inst.package_id(), inst.clone());
            }
            Some(_) => {}
            None => {
                out.insert(pkg.package_id(), pkg);
            }
        }
    }
    out.into_values().collect()
}

fn rows(view: &PackageView<'_>, pkgs: &[Package], attrs: &[String]) -> Value {
    Value::Array(pkgs.iter().map(|p| view.row(p, attrs)).collect())
}

/// Packages selected by a named filter; unknown filters give an empty list
pub fn get_packages(engine: &dyn PackageEngine, filter: &str, attrs: &[String]) -> Value {
    let Some(filter) = PackageFilter::parse(filter) else {
        debug!("Unknown package filter {:?}", filter);
        return json!([]);
    };
    let view = PackageView::new(engine);
    let mut pkgs = engine.list(filter);
    if filter == PackageFilter::Available {
        pkgs = filter_packages(view.installed(), pkgs, false);
    }
    rows(&view, &pkgs, attrs)
}

/// Packages whose name matches a glob
pub fn packages_by_name(
    engine: &dyn PackageEngine,
    pattern: &str,
    attrs: &[String],
    newest_only: bool,
) -> Value {
    let view = PackageView::new(engine);
    let found = engine.find(&PackageSelector::named(pattern).newest_only(newest_only));
    let pkgs = filter_packages(view.installed(), found, true);
    rows(&view, &pkgs, attrs)
}

/// Keyword search over package fields
///
/// Each key matches the union of the given fields. Keys combine by
/// intersection with `match_all`, by union otherwise.
pub fn search(
    engine: &dyn PackageEngine,
    fields: &[String],
    keys: &[String],
    attrs: &[String],
    match_all: bool,
    newest_only: bool,
) -> Value {
    let mut matches: Option<BTreeMap<String, Package>> = None;
    for key in keys {
        let mut key_set = BTreeMap::new();
        for field in fields {
            for pkg in engine.search(field, key) {
                key_set.insert(pkg.package_id(), pkg);
            }
        }
        matches = Some(match matches {
            None => key_set,
            Some(mut acc) if match_all => {
                acc.retain(|id, _| key_set.contains_key(id));
                acc
            }
            Some(mut acc) => {
                acc.extend(key_set);
                acc
            }
        });
    }

    let mut pkgs: Vec<Package> = matches.unwrap_or_default().into_values().collect();
    if newest_only {
        pkgs = newest_per_name_arch(pkgs);
    }
    let view = PackageView::new(engine);
    let pkgs = filter_packages(view.installed(), pkgs, true);
    rows(&view, &pkgs, attrs)
}

fn newest_per_name_arch(pkgs: Vec<Package>) -> Vec<Package> {
    let mut newest: BTreeMap<(String, String), Package> = BTreeMap::new();
    for pkg in pkgs {
        let key = (pkg.name.clone(), pkg.arch.clone());
        let keep = newest.get(&key).is_none_or(|cur| pkg.evr() > cur.evr());
        if keep {
            newest.insert(key, pkg);
        }
    }
    newest.into_values().collect()
}

/// Look up the package object behind a wire reference
pub fn find_package(engine: &dyn PackageEngine, reference: &PackageRef) -> Option<Package> {
    let scope = if reference.origin.is_installed() {
        Scope::Installed
    } else {
        Scope::Available
    };
    let selector = PackageSelector {
        name: Some(glob::Pattern::escape(&reference.name)),
        epoch: Some(reference.epoch),
        version: Some(reference.version.clone()),
        release: Some(reference.release.clone()),
        arch: Some(reference.arch.clone()),
        scope,
        newest_only: false,
    };
    engine.find(&selector).into_iter().find(|p| {
        p.name == reference.name
            && match &reference.origin {
                Origin::Repo(id) => p.origin.repo_id() == Some(id.as_str()),
                _ => true,
            }
    })
}

/// One attribute of one package, `null` when either is unknown
pub fn get_attribute(engine: &dyn PackageEngine, package_id: &str, attr: &str) -> Value {
    let Ok(reference) = PackageRef::parse(package_id) else {
        return Value::Null;
    };
    match find_package(engine, &reference) {
        Some(pkg) => PackageView::new(engine).value_by_name(&pkg, attr),
        None => Value::Null,
    }
}

/// Categories with their groups:
/// `[[[cat_id, name, description], [[grp_id, name, description, installed], ...]], ...]`
pub fn groups(engine: &dyn PackageEngine) -> Value {
    let mut categories = engine.categories();
    categories.sort_by(|a, b| a.id.cmp(&b.id));
    let out: Vec<Value> = categories
        .into_iter()
        .map(|cat| {
            let mut groups = cat.groups;
            groups.sort_by(|a, b| a.id.cmp(&b.id));
            let groups: Vec<Value> = groups
                .into_iter()
                .map(|g| json!([g.id, g.name, g.description, g.installed]))
                .collect();
            json!([[cat.id, cat.name, cat.description], groups])
        })
        .collect();
    Value::Array(out)
}

/// Newest packages of a group; `all` adds the optional members
pub fn group_packages(
    engine: &dyn PackageEngine,
    group_id: &str,
    filter: &str,
    attrs: &[String],
) -> Value {
    let Some(group) = engine.group(group_id) else {
        return json!([]);
    };
    let wanted: &[GroupPackageType] = if filter == "all" {
        &[
            GroupPackageType::Mandatory,
            GroupPackageType::Default,
            GroupPackageType::Optional,
        ]
    } else {
        &[GroupPackageType::Mandatory, GroupPackageType::Default]
    };

    let mut found = Vec::new();
    for (name, kind) in &group.packages {
        if wanted.contains(kind) {
            found.extend(engine.find(&PackageSelector::named(glob::Pattern::escape(name)).newest_only(true)));
        }
    }
    let view = PackageView::new(engine);
    let pkgs = filter_packages(view.installed(), found, true);
    rows(&view, &pkgs, attrs)
}

/// Repository ids: enabled ones for `""`/`"enabled"`, otherwise a glob over all
pub fn repositories(engine: &dyn PackageEngine, filter: &str) -> Vec<String> {
    let repos = engine.repositories();
    if filter.is_empty() || filter == "enabled" {
        return repos.into_iter().filter(|r| r.enabled).map(|r| r.id).collect();
    }
    match glob::Pattern::new(filter) {
        Ok(pattern) => repos
            .into_iter()
            .filter(|r| pattern.matches(&r.id))
            .map(|r| r.id)
            .collect(),
        Err(_) => repos.into_iter().filter(|r| r.id == filter).map(|r| r.id).collect(),
    }
}

/// Repository settings as an object, `null` when unknown
pub fn get_repo(engine: &dyn PackageEngine, repo_id: &str) -> Result<Value> {
    match engine.repositories().into_iter().find(|r| r.id == repo_id) {
        Some(repo) => Ok(serde_json::to_value(repo)?),
        None => Ok(Value::Null),
    }
}

/// One config value, the whole map for `"*"`, `null` when unknown
pub fn get_config(engine: &dyn PackageEngine, setting: &str) -> Value {
    let config = engine.config();
    if setting == "*" {
        return Value::Object(config);
    }
    config.get(setting).cloned().unwrap_or(Value::Null)
}

/// Apply a JSON-encoded value to a config key and the enabled repositories
pub fn set_config(engine: &mut dyn PackageEngine, setting: &str, value: &str) -> Result<bool> {
    let value: Value = serde_json::from_str(value)
        .map_err(|e| Error::ParseError(format!("invalid value for {}: {}", setting, e)))?;
    Ok(engine.set_config(setting, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::Catalog;
    use crate::engine::memory::MemoryProvider;
    use crate::engine::{EngineProvider, MetadataObserver};

    struct Quiet;

    impl MetadataObserver for Quiet {
        fn progress(&mut self, _: &str, _: f64) {}
        fn end(&mut self, _: &str, _: bool) {}
    }

    const CATALOG: &str = r#"
[config]
recent = 7
gpgcheck = true

[[repo]]
id = "base"
name = "Base"

[[repo]]
id = "base-debug"
enabled = false

[[package]]
name = "editor"
version = "1.0"
release = "1"
installed = true
summary = "Text editor"

[[package]]
name = "editor"
version = "1.0"
release = "1"
repo = "base"
summary = "Text editor"

[[package]]
name = "editor-doc"
version = "1.0"
release = "1"
repo = "base"
summary = "Editor documentation"

[[package]]
name = "viewer"
version = "2.0"
release = "1"
repo = "base"
summary = "Document viewer"
description = "Views documents"

[[category]]
id = "apps"
name = "Applications"
groups = ["office"]

[[group]]
id = "office"
name = "Office"
mandatory = ["viewer"]
optional = ["editor-doc"]
"#;

    fn engine() -> Box<dyn PackageEngine> {
        let provider = MemoryProvider::new(Catalog::from_toml(CATALOG).unwrap());
        provider.open(None, &mut Quiet).unwrap()
    }

    fn ids(value: &Value) -> Vec<String> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_available_hides_installed_twin() {
        let engine = engine();
        let available = ids(&get_packages(engine.as_ref(), "available", &[]));
        assert_eq!(
            available,
            vec!["editor-doc,0,1.0,1,noarch,base", "viewer,0,2.0,1,noarch,base"]
        );
        assert_eq!(get_packages(engine.as_ref(), "bogus", &[]), json!([]));
    }

    #[test]
    fn test_by_name_prefers_installed() {
        let engine = engine();
        let found = ids(&packages_by_name(engine.as_ref(), "editor", &[], false));
        assert_eq!(found, vec!["editor,0,1.0,1,noarch,@System"]);
    }

    #[test]
    fn test_search_match_all() {
        let engine = engine();
        let fields = vec!["name".to_string(), "summary".to_string()];
        let any = search(
            engine.as_ref(),
            &fields,
            &["editor".to_string(), "viewer".to_string()],
            &[],
            false,
            true,
        );
        assert_eq!(ids(&any).len(), 3);

        let all = search(
            engine.as_ref(),
            &fields,
            &["editor".to_string(), "doc".to_string()],
            &[],
            true,
            true,
        );
        assert_eq!(ids(&all), vec!["editor-doc,0,1.0,1,noarch,base"]);
    }

    #[test]
    fn test_get_attribute() {
        let engine = engine();
        assert_eq!(
            get_attribute(engine.as_ref(), "viewer,0,2.0,1,noarch,base", "description"),
            json!("Views documents")
        );
        assert_eq!(
            get_attribute(engine.as_ref(), "viewer,0,2.0,1,noarch,base", "bogus"),
            Value::Null
        );
        assert_eq!(
            get_attribute(engine.as_ref(), "viewer,0,9.0,1,noarch,base", "summary"),
            Value::Null
        );
        assert_eq!(get_attribute(engine.as_ref(), "garbage", "summary"), Value::Null);
    }

    #[test]
    fn test_groups_and_members() {
        let engine = engine();
        assert_eq!(
            groups(engine.as_ref()),
            json!([[["apps", "Applications", ""], [["office", "Office", "", false]]]])
        );
        assert_eq!(
            ids(&group_packages(engine.as_ref(), "office", "default", &[])),
            vec!["viewer,0,2.0,1,noarch,base"]
        );
        assert_eq!(
            ids(&group_packages(engine.as_ref(), "office", "all", &[])).len(),
            2
        );
    }

    #[test]
    fn test_repositories_and_config() {
        let mut engine = engine();
        assert_eq!(repositories(engine.as_ref(), ""), vec!["base"]);
        assert_eq!(repositories(engine.as_ref(), "base*"), vec!["base", "base-debug"]);
        assert_eq!(get_repo(engine.as_ref(), "nope").unwrap(), Value::Null);
        assert_eq!(get_repo(engine.as_ref(), "base").unwrap()["name"], json!("Base"));

        assert_eq!(get_config(engine.as_ref(), "recent"), json!(7));
        assert_eq!(get_config(engine.as_ref(), "missing"), Value::Null);
        assert!(get_config(engine.as_ref(), "*").is_object());

        assert!(set_config(engine.as_mut(), "gpgcheck", "false").unwrap());
        assert_eq!(get_config(engine.as_ref(), "gpgcheck"), json!(false));
        assert!(!set_config(engine.as_mut(), "missing", "1").unwrap());
        assert!(set_config(engine.as_mut(), "gpgcheck", "{not json").is_err());
    }
}
