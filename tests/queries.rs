// tests/queries.rs

//! Read-only operations: listings, attributes, search, groups, repositories
//! and configuration.

mod common;

use common::*;
use dnfdaemon::Error;
use dnfdaemon::daemon::API_VERSION;
use serde_json::{Value, json};

fn strings(attrs: &[&str]) -> Vec<String> {
    attrs.iter().map(|s| s.to_string()).collect()
}

fn ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|row| match row {
            Value::String(id) => id.clone(),
            Value::Array(cols) => cols[0].as_str().unwrap().to_string(),
            other => panic!("unexpected row {}", other),
        })
        .collect()
}

#[test]
fn test_get_packages_filters() {
    let mut h = locked_system_service();

    let installed = h.service.get_packages(CLIENT_A, "installed", &[]).unwrap();
    assert_eq!(
        ids(&installed),
        vec![BASH_INSTALLED, "glibc,0,2.38,1,x86_64,@System"]
    );

    // The available twin of an installed package is not listed
    let available = h.service.get_packages(CLIENT_A, "available", &[]).unwrap();
    assert_eq!(
        ids(&available),
        vec![
            "bash,0,5.2.37,1,x86_64,updates",
            FLAKY,
            "nano,0,7.2,1,x86_64,repo1",
            PKG_X,
            PKG_Y,
            SIGNED,
        ]
    );

    let updates = h.service.get_packages(CLIENT_A, "updates", &[]).unwrap();
    assert_eq!(ids(&updates), vec!["bash,0,5.2.37,1,x86_64,updates"]);

    let unknown = h.service.get_packages(CLIENT_A, "everything", &[]).unwrap();
    assert_eq!(unknown, json!([]));
}

#[test]
fn test_rows_carry_requested_attributes() {
    let mut h = locked_system_service();
    let rows = h
        .service
        .get_packages_by_name(CLIENT_A, "pkgX", &strings(&["summary", "size", "bogus"]), false)
        .unwrap();
    assert_eq!(rows, json!([[PKG_X, "Example package X", 1024, null]]));
}

#[test]
fn test_get_packages_by_name_prefers_installed() {
    let mut h = locked_system_service();
    let found = h
        .service
        .get_packages_by_name(CLIENT_A, "bash", &[], false)
        .unwrap();
    let found = ids(&found);
    assert_eq!(found.len(), 2);
    assert!(found.contains(&BASH_INSTALLED.to_string()));
    assert!(found.contains(&"bash,0,5.2.37,1,x86_64,updates".to_string()));
    assert!(!found.contains(&"bash,0,5.2.26,1,x86_64,repo1".to_string()));
}

#[test]
fn test_get_attribute() {
    let mut h = locked_system_service();
    assert_eq!(
        h.service.get_attribute(CLIENT_A, PKG_X, "summary").unwrap(),
        json!("Example package X")
    );
    assert_eq!(
        h.service.get_attribute(CLIENT_A, PKG_X, "action").unwrap(),
        json!("install")
    );
    assert_eq!(
        h.service
            .get_attribute(CLIENT_A, "bash,0,5.2.37,1,x86_64,updates", "action")
            .unwrap(),
        json!("update")
    );
    assert_eq!(
        h.service
            .get_attribute(CLIENT_A, BASH_INSTALLED, "action")
            .unwrap(),
        json!("remove")
    );
    assert_eq!(
        h.service
            .get_attribute(CLIENT_A, "bash,0,5.2.37,1,x86_64,updates", "downgrades")
            .unwrap(),
        json!(["bash,0,5.2.26,1,x86_64,repo1"])
    );

    // Unknown attribute or package is null, not an error
    assert_eq!(
        h.service.get_attribute(CLIENT_A, PKG_X, "colour").unwrap(),
        Value::Null
    );
    assert_eq!(
        h.service
            .get_attribute(CLIENT_A, "ghost,0,1,1,noarch,repo1", "summary")
            .unwrap(),
        Value::Null
    );
}

#[test]
fn test_search() {
    let mut h = locked_system_service();
    let fields = strings(&["name", "summary"]);

    let found = h
        .service
        .search(CLIENT_A, &fields, &strings(&["editor"]), &[], false, true, false)
        .unwrap();
    assert_eq!(ids(&found), vec!["nano,0,7.2,1,x86_64,repo1"]);

    let any = h
        .service
        .search(CLIENT_A, &fields, &strings(&["example", "editor"]), &[], false, true, false)
        .unwrap();
    assert_eq!(ids(&any).len(), 3);

    let all = h
        .service
        .search(CLIENT_A, &fields, &strings(&["example", "editor"]), &[], true, true, false)
        .unwrap();
    assert_eq!(all, json!([]));
}

#[test]
fn test_groups() {
    let mut h = locked_system_service();
    let groups = h.service.get_groups(CLIENT_A).unwrap();
    assert_eq!(
        groups,
        json!([[
            ["apps", "Applications", ""],
            [["editors", "Editors", "Sometimes called text editors", false]]
        ]])
    );

    let members = h
        .service
        .get_group_packages(CLIENT_A, "editors", "default", &[])
        .unwrap();
    assert_eq!(members, json!(["nano,0,7.2,1,x86_64,repo1"]));

    // Optional members only show up with `all`, and only when available
    h.service
        .set_enabled_repos(CLIENT_A, &strings(&["repo1", "testing"]))
        .unwrap();
    let members = h
        .service
        .get_group_packages(CLIENT_A, "editors", "all", &[])
        .unwrap();
    assert_eq!(
        ids(&members),
        vec!["nano,0,7.2,1,x86_64,repo1", "vim-enhanced,0,9.1,1,x86_64,testing"]
    );

    let missing = h
        .service
        .get_group_packages(CLIENT_A, "no-such-group", "all", &[])
        .unwrap();
    assert_eq!(missing, json!([]));
}

#[test]
fn test_repositories() {
    let mut h = locked_system_service();
    assert_eq!(
        h.service.get_repositories(CLIENT_A, "").unwrap(),
        strings(&["repo1", "updates"])
    );
    assert_eq!(
        h.service.get_repositories(CLIENT_A, "*").unwrap(),
        strings(&["repo1", "updates", "testing"])
    );
    assert_eq!(
        h.service.get_repositories(CLIENT_A, "test*").unwrap(),
        strings(&["testing"])
    );

    let repo = h.service.get_repo(CLIENT_A, "repo1").unwrap();
    assert_eq!(repo["id"], json!("repo1"));
    assert_eq!(repo["name"], json!("Main repository"));
    assert_eq!(repo["enabled"], json!(true));
    assert_eq!(h.service.get_repo(CLIENT_A, "nope").unwrap(), Value::Null);
}

#[test]
fn test_set_enabled_repos_rebuilds_index() {
    let mut h = locked_system_service();
    h.service.add_transaction(CLIENT_A, PKG_X, "install").unwrap();

    h.service
        .set_enabled_repos(CLIENT_A, &strings(&["testing"]))
        .unwrap();
    assert!(h.service.is_loaded());
    assert_eq!(h.service.pending_actions(), 0);
    assert_eq!(
        h.service.get_repositories(CLIENT_A, "").unwrap(),
        strings(&["testing"])
    );
    let available = h.service.get_packages(CLIENT_A, "available", &[]).unwrap();
    assert_eq!(ids(&available), vec!["vim-enhanced,0,9.1,1,x86_64,testing"]);
}

#[test]
fn test_expire_cache() {
    let mut h = locked_system_service();
    h.service.get_packages(CLIENT_A, "installed", &[]).unwrap();
    assert!(h.service.expire_cache(CLIENT_A).unwrap());
    assert!(h.service.is_loaded());
}

#[test]
fn test_config() {
    let mut h = locked_system_service();
    assert_eq!(h.service.get_config(CLIENT_A, "best").unwrap(), json!(true));
    assert_eq!(
        h.service.get_config(CLIENT_A, "*").unwrap(),
        json!({"best": true, "installonly_limit": 3})
    );
    assert_eq!(h.service.get_config(CLIENT_A, "nope").unwrap(), Value::Null);

    assert!(h.service.set_config(CLIENT_A, "best", "false").unwrap());
    assert_eq!(h.service.get_config(CLIENT_A, "best").unwrap(), json!(false));
    assert!(!h.service.set_config(CLIENT_A, "nope", "1").unwrap());

    // A malformed value is a write failure and drops the handle
    let err = h
        .service
        .set_config(CLIENT_A, "best", "{not json")
        .unwrap_err();
    assert!(matches!(err, Error::ParseError(_)));
    assert!(!h.service.is_loaded());
}

#[test]
fn test_history_is_empty_before_any_run() {
    let mut h = locked_system_service();
    assert_eq!(
        h.service.get_history_by_days(CLIENT_A, 0, 30).unwrap(),
        json!([])
    );
    assert_eq!(h.service.get_history_packages(CLIENT_A, 7).unwrap(), json!([]));
}

#[test]
fn test_version() {
    let h = session_service();
    assert_eq!(h.service.get_version(), API_VERSION);
}
