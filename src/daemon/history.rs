// src/daemon/history.rs

//! Transaction history queries
//!
//! History comes from the engine newest first. Transactions are reported to
//! clients as `[tid, iso_time]` pairs in local time.

use crate::engine::{HistoryTransaction, PackageEngine};
use crate::package::PackageRef;
use chrono::{DateTime, Local, TimeZone};
use serde_json::{Value, json};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn local_time(timestamp: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(timestamp, 0).single()
}

fn id_time_list(transactions: &[&HistoryTransaction]) -> Value {
    Value::Array(
        transactions
            .iter()
            .map(|t| {
                let iso = local_time(t.begin)
                    .map(|tm| tm.format(ISO_FORMAT).to_string())
                    .unwrap_or_default();
                json!([t.tid, iso])
            })
            .collect(),
    )
}

/// Transactions between `start` and `end` days ago, inclusive
pub fn by_days(engine: &dyn PackageEngine, start: i32, end: i32) -> Value {
    by_days_at(&engine.history(), start, end, Local::now())
}

fn by_days_at(history: &[HistoryTransaction], start: i32, end: i32, now: DateTime<Local>) -> Value {
    let mut selected = Vec::new();
    for trans in history {
        let Some(tm) = local_time(trans.begin) else {
            continue;
        };
        let age = (now - tm).num_days();
        if age < i64::from(start) {
            continue;
        }
        // Newest first, so everything after this is older still
        if age > i64::from(end) {
            break;
        }
        selected.push(trans);
    }
    id_time_list(&selected)
}

/// Transactions touching a package whose name matches one of `patterns`
pub fn search(engine: &dyn PackageEngine, patterns: &[String]) -> Value {
    let patterns: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    let history = engine.history();
    let selected: Vec<&HistoryTransaction> = history
        .iter()
        .filter(|trans| {
            trans.packages.iter().any(|hp| {
                let name = package_name(&hp.package_id);
                patterns.iter().any(|p| p.matches(name))
            })
        })
        .collect();
    id_time_list(&selected)
}

fn package_name(package_id: &str) -> &str {
    package_id.split(',').next().unwrap_or(package_id)
}

/// `[[package_id, state, installed], ...]` for one transaction
pub fn packages(engine: &dyn PackageEngine, tid: i32) -> Value {
    let history = engine.history();
    let Some(trans) = history.iter().find(|t| t.tid == i64::from(tid)) else {
        return json!([]);
    };
    Value::Array(
        trans
            .packages
            .iter()
            .map(|hp| {
                // Normalize through the reference type when the id is well formed
                let id = PackageRef::parse(&hp.package_id)
                    .map(|r| r.to_string())
                    .unwrap_or_else(|_| hp.package_id.clone());
                json!([id, hp.state, hp.installed])
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HistoryPackage;
    use chrono::Duration;

    fn trans(tid: i64, begin: DateTime<Local>, names: &[&str]) -> HistoryTransaction {
        HistoryTransaction {
            tid,
            begin: begin.timestamp(),
            packages: names
                .iter()
                .map(|n| HistoryPackage {
                    package_id: format!("{},0,1.0,1,noarch,@System", n),
                    state: "Install".to_string(),
                    installed: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_by_days_window() {
        let now = Local::now();
        let history = vec![
            trans(4, now - Duration::hours(2), &["a"]),
            trans(3, now - Duration::days(3), &["b"]),
            trans(2, now - Duration::days(10), &["c"]),
            trans(1, now - Duration::days(40), &["d"]),
        ];

        let value = by_days_at(&history, 1, 15, now);
        let tids: Vec<i64> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| pair[0].as_i64().unwrap())
            .collect();
        assert_eq!(tids, vec![3, 2]);

        let iso = value[0][1].as_str().unwrap();
        assert_eq!(iso.len(), "2024-01-01T00:00:00".len());
        assert!(iso.contains('T'));
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("bash,0,5.2,1,x86_64,@System"), "bash");
        assert_eq!(package_name("plain"), "plain");
    }
}
