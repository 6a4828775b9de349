// src/daemon/transaction.rs

//! Pending transaction and its resolution
//!
//! The accumulator records what the client asked for, hands each request to
//! the engine goal, and caches the resolved plan until the pending set
//! changes. Resolution failures are data: they come back to the client as
//! `[false, messages]`, never as a bus error.

use super::events::{EventObserver, TransactionPhase};
use super::query::find_package;
use crate::engine::{
    GoalAction, GoalRequest, GroupPackageType, ItemKind, MarkError, PackageEngine, SolverOutcome,
    TransactionItem,
};
use crate::package::PackageRef;
use crate::{Error, Result};
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Operation requested for one pending entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Install,
    Remove,
    Update,
    Reinstall,
    Downgrade,
    Obsolete,
    GroupInstall,
    GroupRemove,
    LocalInstall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
            Self::Obsolete => "obsolete",
            Self::GroupInstall => "group-install",
            Self::GroupRemove => "group-remove",
            Self::LocalInstall => "localinstall",
        }
    }

    fn goal_action(&self) -> Option<GoalAction> {
        match self {
            Self::Install => Some(GoalAction::Install),
            Self::Remove => Some(GoalAction::Remove),
            Self::Update => Some(GoalAction::Update),
            Self::Reinstall => Some(GoalAction::Reinstall),
            Self::Downgrade => Some(GoalAction::Downgrade),
            Self::Obsolete => Some(GoalAction::Obsolete),
            Self::GroupInstall | Self::GroupRemove | Self::LocalInstall => None,
        }
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "install" => Ok(Self::Install),
            "remove" => Ok(Self::Remove),
            "update" => Ok(Self::Update),
            "reinstall" => Ok(Self::Reinstall),
            "downgrade" => Ok(Self::Downgrade),
            "obsolete" => Ok(Self::Obsolete),
            "group-install" => Ok(Self::GroupInstall),
            "group-remove" => Ok(Self::GroupRemove),
            "localinstall" | "local-install" => Ok(Self::LocalInstall),
            _ => Err(Error::ParseError(format!("unknown transaction action '{}'", s))),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Member types pulled in by a group install
const GROUP_INSTALL_TYPES: [GroupPackageType; 2] =
    [GroupPackageType::Mandatory, GroupPackageType::Default];

/// One recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Package id, pattern, group id or local path
    pub target: String,
    pub action: ActionKind,
}

/// Client-facing operations that take space separated patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Install,
    Remove,
    Update,
    Reinstall,
    Downgrade,
    GroupInstall,
    GroupRemove,
}

impl PatternOp {
    fn action(&self) -> ActionKind {
        match self {
            Self::Install => ActionKind::Install,
            Self::Remove => ActionKind::Remove,
            Self::Update => ActionKind::Update,
            Self::Reinstall => ActionKind::Reinstall,
            Self::Downgrade => ActionKind::Downgrade,
            Self::GroupInstall => ActionKind::GroupInstall,
            Self::GroupRemove => ActionKind::GroupRemove,
        }
    }
}

/// Plan group labels, in the order they are reported
const PLAN_ORDER: [(ItemKind, &str); 5] = [
    (ItemKind::Install, "install"),
    (ItemKind::Upgrade, "update"),
    (ItemKind::Erase, "remove"),
    (ItemKind::Reinstall, "reinstall"),
    (ItemKind::Downgrade, "downgrade"),
];

/// Result of resolving the pending set
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPlan {
    /// Something to do
    Plan(Vec<TransactionItem>),
    /// Solver problems
    Conflicts(Vec<String>),
    /// Resolved, but empty
    NothingToDo,
}

impl ResolvedPlan {
    pub fn from_outcome(outcome: SolverOutcome) -> Self {
        match outcome {
            SolverOutcome::Solved(items) if items.is_empty() => Self::NothingToDo,
            SolverOutcome::Solved(items) => Self::Plan(items),
            SolverOutcome::Unresolved(messages) => Self::Conflicts(messages),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Plan(_))
    }

    pub fn items(&self) -> &[TransactionItem] {
        match self {
            Self::Plan(items) => items,
            _ => &[],
        }
    }

    /// Packages that have to be fetched before applying
    pub fn downloads(&self) -> Vec<crate::package::Package> {
        self.items()
            .iter()
            .filter(|item| item.kind.needs_download())
            .map(|item| item.package.clone())
            .collect()
    }

    /// `[[action, [[package_id, size, [obsoleted_id, ...]], ...]], ...]`
    pub fn groups(&self) -> Value {
        let mut out = Vec::new();
        for (kind, label) in PLAN_ORDER {
            let mut entries: Vec<(String, u64, Vec<String>)> = self
                .items()
                .iter()
                .filter(|item| item.kind == kind)
                .map(|item| {
                    let mut obsoleted: Vec<String> =
                        item.obsoleted.iter().map(|p| p.package_id()).collect();
                    obsoleted.sort();
                    (item.package.package_id(), item.package.size, obsoleted)
                })
                .collect();
            if entries.is_empty() {
                continue;
            }
            entries.sort();
            let entries: Vec<Value> = entries
                .into_iter()
                .map(|(id, size, obsoleted)| json!([id, size, obsoleted]))
                .collect();
            out.push(json!([label, entries]));
        }
        Value::Array(out)
    }

    /// `[ok, plan_or_messages]`
    pub fn to_json(&self) -> Value {
        match self {
            Self::Plan(_) => json!([true, self.groups()]),
            Self::Conflicts(messages) => json!([false, messages]),
            Self::NothingToDo => json!([false, []]),
        }
    }
}

/// Pending actions plus the cached resolution
#[derive(Debug, Default)]
pub struct TransactionAccumulator {
    pending: Vec<PendingAction>,
    plan: Option<ResolvedPlan>,
}

impl TransactionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[PendingAction] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget everything; the engine goal has to be dropped separately
    pub fn reset(&mut self) {
        self.pending.clear();
        self.plan = None;
    }

    /// Drop pending actions and the engine goal
    pub fn clear(&mut self, engine: &mut dyn PackageEngine) {
        debug!("Clearing {} pending actions", self.pending.len());
        self.reset();
        engine.reset_goal();
    }

    fn record(&mut self, target: &str, action: ActionKind) {
        self.pending.push(PendingAction {
            target: target.to_string(),
            action,
        });
        self.plan = None;
    }

    /// Resolve the pending set, reusing the cached plan when nothing changed
    pub fn resolve(&mut self, engine: &mut dyn PackageEngine) -> &ResolvedPlan {
        self.plan
            .get_or_insert_with(|| ResolvedPlan::from_outcome(engine.resolve()))
    }

    /// Add a single package (or local file, or group) and resolve
    ///
    /// Returns `[ok, messages]`: `[true, []]` when the pending set resolves
    /// to a plan, `[false, problems]` otherwise.
    pub fn add(
        &mut self,
        engine: &mut dyn PackageEngine,
        events: &dyn EventObserver,
        target: &str,
        action: &str,
    ) -> Result<Value> {
        let action: ActionKind = action.parse()?;
        let request = match action {
            ActionKind::LocalInstall => GoalRequest::LocalFile(PathBuf::from(target)),
            ActionKind::GroupInstall => GoalRequest::GroupInstall {
                group: target.to_string(),
                types: GROUP_INSTALL_TYPES.to_vec(),
            },
            ActionKind::GroupRemove => GoalRequest::GroupRemove {
                group: target.to_string(),
            },
            _ => {
                let reference = PackageRef::parse(target)?;
                let Some(package) = find_package(&*engine, &reference) else {
                    let msg = format!("Cannot find package object for : {}", target);
                    warn!("{}", msg);
                    events.error_message(&msg);
                    return Ok(json!([false, [msg]]));
                };
                let Some(goal_action) = action.goal_action() else {
                    return Err(Error::ParseError(format!("unsupported action {}", action)));
                };
                GoalRequest::Package {
                    package,
                    action: goal_action,
                }
            }
        };

        match engine.mark(&request) {
            Ok(()) => {}
            Err(MarkError::NotInstalled(what)) => {
                let msg = format!("package not installed : {}", what);
                warn!("{}", msg);
                events.error_message(&msg);
                return Ok(json!([false, []]));
            }
            Err(e) => return Ok(json!([false, [e.to_string()]])),
        }

        info!("Added {} {} to the transaction", action, target);
        self.record(target, action);
        let result = match self.resolve(engine) {
            ResolvedPlan::Plan(_) => json!([true, []]),
            ResolvedPlan::Conflicts(messages) => json!([false, messages]),
            ResolvedPlan::NothingToDo => json!([false, []]),
        };
        Ok(result)
    }

    /// Current resolution as `[ok, plan_or_messages]`
    pub fn get(&mut self, engine: &mut dyn PackageEngine) -> Value {
        self.resolve(engine).to_json()
    }

    /// Resolve inside `start-build`/`end-build` events
    pub fn build(&mut self, engine: &mut dyn PackageEngine, events: &dyn EventObserver) -> Value {
        events.transaction_phase(TransactionPhase::StartBuild, Value::Null);
        let value = self.resolve(engine).to_json();
        events.transaction_phase(TransactionPhase::EndBuild, Value::Null);
        value
    }

    /// Apply space separated patterns one at a time, then build
    ///
    /// Patterns that match nothing, or need an installed package that is
    /// not there, are skipped.
    pub fn apply_patterns(
        &mut self,
        engine: &mut dyn PackageEngine,
        events: &dyn EventObserver,
        op: PatternOp,
        patterns: &str,
    ) -> Value {
        for pattern in patterns.split(' ').filter(|p| !p.is_empty()) {
            let request = match op {
                PatternOp::Install if pattern.ends_with(".rpm") => {
                    GoalRequest::LocalFile(PathBuf::from(pattern))
                }
                PatternOp::GroupInstall | PatternOp::GroupRemove => {
                    if engine.group(pattern).is_none() {
                        debug!("No group matches {}", pattern);
                        continue;
                    }
                    if op == PatternOp::GroupInstall {
                        GoalRequest::GroupInstall {
                            group: pattern.to_string(),
                            types: GROUP_INSTALL_TYPES.to_vec(),
                        }
                    } else {
                        GoalRequest::GroupRemove {
                            group: pattern.to_string(),
                        }
                    }
                }
                _ => match op.action().goal_action() {
                    Some(action) => GoalRequest::Pattern {
                        pattern: pattern.to_string(),
                        action,
                    },
                    None => continue,
                },
            };

            let action = match &request {
                GoalRequest::LocalFile(_) => ActionKind::LocalInstall,
                _ => op.action(),
            };
            match engine.mark(&request) {
                Ok(()) => self.record(pattern, action),
                Err(MarkError::NoMatch(_)) | Err(MarkError::NotInstalled(_)) => {
                    debug!("Ignoring {} for {}: nothing to act on", action, pattern);
                }
                Err(e) => {
                    warn!("Cannot {} {}: {}", action, pattern, e);
                    return json!([false, [e.to_string()]]);
                }
            }
        }
        self.build(engine, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::events::DaemonEvent;
    use crate::engine::catalog::Catalog;
    use crate::engine::memory::MemoryProvider;
    use crate::engine::{EngineProvider, MetadataObserver};
    use tokio::sync::mpsc;

    struct Quiet;

    impl MetadataObserver for Quiet {
        fn progress(&mut self, _: &str, _: f64) {}
        fn end(&mut self, _: &str, _: bool) {}
    }

    const CATALOG: &str = r#"
[[repo]]
id = "repo1"

[[package]]
name = "pkgX"
version = "1.0"
release = "1"
repo = "repo1"
size = 1024

[[package]]
name = "pkgY"
version = "1.0"
release = "1"
repo = "repo1"
size = 2048
requires = ["libmissing"]

[[package]]
name = "old"
version = "1.0"
release = "1"
installed = true

[[group]]
id = "tools"
name = "Tools"
mandatory = ["pkgX"]
"#;

    fn engine() -> Box<dyn PackageEngine> {
        let provider = MemoryProvider::new(Catalog::from_toml(CATALOG).unwrap());
        provider.open(None, &mut Quiet).unwrap()
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("install".parse::<ActionKind>().unwrap(), ActionKind::Install);
        assert_eq!(
            "local-install".parse::<ActionKind>().unwrap(),
            ActionKind::LocalInstall
        );
        assert_eq!(
            "group-remove".parse::<ActionKind>().unwrap(),
            ActionKind::GroupRemove
        );
        assert!("frobnicate".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_add_and_build_plan() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let added = acc
            .add(engine.as_mut(), &tx, "pkgX,0,1.0,1,noarch,repo1", "install")
            .unwrap();
        assert_eq!(added, json!([true, []]));
        assert_eq!(acc.pending().len(), 1);

        let plan = acc.build(engine.as_mut(), &tx);
        assert_eq!(
            plan,
            json!([true, [["install", [["pkgX,0,1.0,1,noarch,repo1", 1024, []]]]]])
        );

        let phases: Vec<TransactionPhase> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                DaemonEvent::TransactionEvent { phase, .. } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![TransactionPhase::StartBuild, TransactionPhase::EndBuild]
        );
    }

    #[test]
    fn test_unresolved_dependency_is_data() {
        let (tx, _rx) = mpsc::unbounded_channel::<DaemonEvent>();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let added = acc
            .add(engine.as_mut(), &tx, "pkgY,0,1.0,1,noarch,repo1", "install")
            .unwrap();
        assert_eq!(added[0], json!(false));
        let messages = added[1].as_array().unwrap();
        assert!(messages[0].as_str().unwrap().contains("libmissing"));
    }

    #[test]
    fn test_unknown_package_emits_error_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let added = acc
            .add(engine.as_mut(), &tx, "ghost,0,1.0,1,noarch,repo1", "install")
            .unwrap();
        assert_eq!(added[0], json!(false));
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::ErrorMessage { .. })));
        assert!(acc.is_empty());

        assert!(acc.add(engine.as_mut(), &tx, "not-a-ref", "install").is_err());
        assert!(
            acc.add(engine.as_mut(), &tx, "pkgX,0,1.0,1,noarch,repo1", "explode")
                .is_err()
        );
    }

    #[test]
    fn test_nothing_to_do() {
        let (tx, _rx) = mpsc::unbounded_channel::<DaemonEvent>();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let added = acc
            .add(engine.as_mut(), &tx, "old,0,1.0,1,noarch,@System", "update")
            .unwrap();
        assert_eq!(added, json!([false, []]));
        assert_eq!(acc.get(engine.as_mut()), json!([false, []]));
    }

    #[test]
    fn test_patterns_skip_unmatched() {
        let (tx, _rx) = mpsc::unbounded_channel::<DaemonEvent>();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let result = acc.apply_patterns(engine.as_mut(), &tx, PatternOp::Install, "nosuch pkgX");
        assert_eq!(result[0], json!(true));
        assert_eq!(acc.pending().len(), 1);

        acc.clear(engine.as_mut());
        assert!(acc.is_empty());
        let result = acc.apply_patterns(engine.as_mut(), &tx, PatternOp::Remove, "notinstalled");
        assert_eq!(result, json!([false, []]));
    }

    #[test]
    fn test_group_install() {
        let (tx, _rx) = mpsc::unbounded_channel::<DaemonEvent>();
        let mut engine = engine();
        let mut acc = TransactionAccumulator::new();

        let result = acc.apply_patterns(engine.as_mut(), &tx, PatternOp::GroupInstall, "tools nogroup");
        assert_eq!(
            result,
            json!([true, [["install", [["pkgX,0,1.0,1,noarch,repo1", 1024, []]]]]])
        );
    }

    #[test]
    fn test_plan_group_order() {
        use crate::package::{Origin, Package};

        let pkg = |name: &str, origin: Origin| Package::new(name, 0, "1.0", "1", "noarch", origin);
        let plan = ResolvedPlan::Plan(vec![
            TransactionItem {
                kind: ItemKind::Erase,
                package: pkg("gone", Origin::Installed(None)),
                obsoleted: vec![],
            },
            TransactionItem {
                kind: ItemKind::Install,
                package: pkg("zeta", Origin::Repo("r".into())),
                obsoleted: vec![],
            },
            TransactionItem {
                kind: ItemKind::Install,
                package: pkg("alpha", Origin::Repo("r".into())),
                obsoleted: vec![],
            },
        ]);
        let groups = plan.groups();
        assert_eq!(groups[0][0], json!("install"));
        assert_eq!(groups[0][1][0][0], json!("alpha,0,1.0,1,noarch,r"));
        assert_eq!(groups[1][0], json!("remove"));
        assert_eq!(plan.downloads().len(), 2);
    }
}
