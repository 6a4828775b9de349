// src/daemon/dbus.rs

//! D-Bus interface `org.baseurl.Dnf`
//!
//! Thin adapter between the bus and [`DaemonService`]. Every method takes
//! the caller's unique name from the message header, moves the work onto
//! the blocking pool and locks the service there, so a long download or
//! commit never stalls the bus connection. Package data travels as JSON
//! strings.
//!
//! Events produced while a handler runs go through an unbounded channel to
//! [`forward_events`], which emits them as signals in arrival order.

use super::events::DaemonEvent;
use super::service::{API_VERSION, DaemonService, to_wire};
use super::transaction::PatternOp;
use super::BusKind;
use crate::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use zbus::message::Header;
use zbus::object_server::SignalContext;

/// Object path the interface is served at
pub const OBJECT_PATH: &str = "/";

/// Errors as seen by bus clients
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.baseurl.Dnf")]
pub enum BusError {
    #[zbus(error)]
    ZBus(zbus::Error),
    LockedError(String),
    AccessDeniedError(String),
    TransactionError(String),
}

impl From<Error> for BusError {
    fn from(err: Error) -> Self {
        debug!("Replying with {}: {}", err.bus_name(), err);
        match err {
            Error::LockedError(msg) => BusError::LockedError(msg),
            Error::AccessDeniedError(msg) => BusError::AccessDeniedError(msg),
            other => BusError::TransactionError(other.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, BusError>;

fn caller(hdr: &Header<'_>) -> String {
    hdr.sender().map(|s| s.to_string()).unwrap_or_default()
}

/// Object served at [`OBJECT_PATH`]
pub struct DnfInterface {
    service: Arc<Mutex<DaemonService>>,
    shutdown: Arc<Notify>,
}

impl DnfInterface {
    pub fn new(service: Arc<Mutex<DaemonService>>, shutdown: Arc<Notify>) -> Self {
        Self { service, shutdown }
    }

    /// Run `f` against the locked service on the blocking pool
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DaemonService) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = service.lock();
            f(&mut guard)
        })
        .await;
        match joined {
            Ok(result) => result.map_err(BusError::from),
            Err(e) => Err(BusError::TransactionError(format!("Request handler failed: {}", e))),
        }
    }

    async fn call_json<F>(&self, f: F) -> Result<String>
    where
        F: FnOnce(&mut DaemonService) -> crate::Result<serde_json::Value> + Send + 'static,
    {
        self.call(f).await.map(|value| to_wire(&value))
    }

    async fn patterns(&self, hdr: &Header<'_>, op: PatternOp, patterns: String) -> Result<String> {
        let caller = caller(hdr);
        self.call_json(move |svc| svc.apply_patterns(&caller, op, &patterns))
            .await
    }
}

#[zbus::interface(name = "org.baseurl.Dnf")]
impl DnfInterface {
    // Session control

    async fn get_version(&self) -> i32 {
        API_VERSION
    }

    async fn lock(&self, #[zbus(header)] hdr: Header<'_>) -> Result<bool> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.lock(&caller)).await
    }

    async fn unlock(&self, #[zbus(header)] hdr: Header<'_>) -> Result<bool> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.unlock(&caller)).await
    }

    async fn set_watchdog_state(&self, #[zbus(header)] hdr: Header<'_>, state: bool) -> Result<bool> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.set_watchdog_state(&caller, state))
            .await
    }

    async fn exit(&self, #[zbus(header)] hdr: Header<'_>) -> Result<bool> {
        let caller = caller(&hdr);
        let quitting = self.call(move |svc| svc.exit(&caller)).await?;
        if quitting {
            self.shutdown.notify_one();
        }
        Ok(quitting)
    }

    // Repositories and configuration

    async fn get_repositories(&self, #[zbus(header)] hdr: Header<'_>, filter: String) -> Result<Vec<String>> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.get_repositories(&caller, &filter))
            .await
    }

    async fn set_enabled_repos(&self, #[zbus(header)] hdr: Header<'_>, repo_ids: Vec<String>) -> Result<()> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.set_enabled_repos(&caller, &repo_ids))
            .await
    }

    async fn get_repo(&self, #[zbus(header)] hdr: Header<'_>, repo_id: String) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_repo(&caller, &repo_id))
            .await
    }

    async fn expire_cache(&self, #[zbus(header)] hdr: Header<'_>) -> Result<bool> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.expire_cache(&caller)).await
    }

    async fn get_config(&self, #[zbus(header)] hdr: Header<'_>, setting: String) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_config(&caller, &setting))
            .await
    }

    async fn set_config(&self, #[zbus(header)] hdr: Header<'_>, setting: String, value: String) -> Result<bool> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.set_config(&caller, &setting, &value))
            .await
    }

    // Queries

    async fn get_packages(&self, #[zbus(header)] hdr: Header<'_>, filter: String, attrs: Vec<String>) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_packages(&caller, &filter, &attrs))
            .await
    }

    async fn get_packages_by_name(
        &self,
        #[zbus(header)] hdr: Header<'_>,
        pattern: String,
        attrs: Vec<String>,
        newest_only: bool,
    ) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_packages_by_name(&caller, &pattern, &attrs, newest_only))
            .await
    }

    async fn get_attribute(&self, #[zbus(header)] hdr: Header<'_>, package_id: String, attr: String) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_attribute(&caller, &package_id, &attr))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn search(
        &self,
        #[zbus(header)] hdr: Header<'_>,
        fields: Vec<String>,
        keys: Vec<String>,
        attrs: Vec<String>,
        match_all: bool,
        newest_only: bool,
        tags: bool,
    ) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| {
            svc.search(&caller, &fields, &keys, &attrs, match_all, newest_only, tags)
        })
        .await
    }

    async fn get_groups(&self, #[zbus(header)] hdr: Header<'_>) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_groups(&caller)).await
    }

    async fn get_group_packages(
        &self,
        #[zbus(header)] hdr: Header<'_>,
        group_id: String,
        filter: String,
        attrs: Vec<String>,
    ) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_group_packages(&caller, &group_id, &filter, &attrs))
            .await
    }

    // Transactions

    async fn add_transaction(&self, #[zbus(header)] hdr: Header<'_>, package_id: String, action: String) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.add_transaction(&caller, &package_id, &action))
            .await
    }

    async fn clear_transaction(&self, #[zbus(header)] hdr: Header<'_>) -> Result<()> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.clear_transaction(&caller)).await
    }

    async fn get_transaction(&self, #[zbus(header)] hdr: Header<'_>) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_transaction(&caller)).await
    }

    async fn build_transaction(&self, #[zbus(header)] hdr: Header<'_>) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.build_transaction(&caller)).await
    }

    async fn run_transaction(&self, #[zbus(header)] hdr: Header<'_>, max_errors: i32) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.run_transaction(&caller, max_errors))
            .await
    }

    async fn install(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::Install, cmds).await
    }

    async fn remove(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::Remove, cmds).await
    }

    async fn update(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::Update, cmds).await
    }

    async fn reinstall(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::Reinstall, cmds).await
    }

    async fn downgrade(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::Downgrade, cmds).await
    }

    async fn group_install(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::GroupInstall, cmds).await
    }

    async fn group_remove(&self, #[zbus(header)] hdr: Header<'_>, cmds: String) -> Result<String> {
        self.patterns(&hdr, PatternOp::GroupRemove, cmds).await
    }

    // History

    async fn get_history_by_days(&self, #[zbus(header)] hdr: Header<'_>, start_days: i32, end_days: i32) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_history_by_days(&caller, start_days, end_days))
            .await
    }

    async fn history_search(&self, #[zbus(header)] hdr: Header<'_>, patterns: Vec<String>) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.history_search(&caller, &patterns))
            .await
    }

    async fn get_history_packages(&self, #[zbus(header)] hdr: Header<'_>, tid: i32) -> Result<String> {
        let caller = caller(&hdr);
        self.call_json(move |svc| svc.get_history_packages(&caller, tid))
            .await
    }

    // GPG

    #[zbus(name = "ConfirmGPGImport")]
    async fn confirm_gpg_import(&self, #[zbus(header)] hdr: Header<'_>, key_id: String, confirmed: bool) -> Result<()> {
        let caller = caller(&hdr);
        self.call(move |svc| svc.confirm_gpg_import(&caller, &key_id, confirmed))
            .await
    }

    // Signals

    #[zbus(signal)]
    async fn error_message(ctxt: &SignalContext<'_>, message: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn download_start(ctxt: &SignalContext<'_>, num_files: i32, num_bytes: u64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn download_progress(
        ctxt: &SignalContext<'_>,
        name: &str,
        frac: f64,
        total_frac: f64,
        total_files: i32,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn download_end(ctxt: &SignalContext<'_>, name: &str, status: i32, message: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn repo_meta_data_progress(ctxt: &SignalContext<'_>, name: &str, frac: f64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn transaction_event(ctxt: &SignalContext<'_>, event: &str, data: &str) -> zbus::Result<()>;

    #[zbus(signal, name = "RPMProgress")]
    async fn rpm_progress(
        ctxt: &SignalContext<'_>,
        package: &str,
        action: &str,
        te_current: u64,
        te_total: u64,
        ts_current: i32,
        ts_total: i32,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "GPGImport")]
    async fn gpg_import(
        ctxt: &SignalContext<'_>,
        package_id: &str,
        user_id: &str,
        key_id: &str,
        key_url: &str,
        timestamp: i64,
    ) -> zbus::Result<()>;
}

async fn emit(ctxt: &SignalContext<'_>, event: DaemonEvent) -> zbus::Result<()> {
    match event {
        DaemonEvent::ErrorMessage { message } => DnfInterface::error_message(ctxt, &message).await,
        DaemonEvent::DownloadStart {
            num_files,
            num_bytes,
        } => DnfInterface::download_start(ctxt, num_files, num_bytes).await,
        DaemonEvent::DownloadProgress {
            name,
            frac,
            total_frac,
            total_files,
        } => DnfInterface::download_progress(ctxt, &name, frac, total_frac, total_files).await,
        DaemonEvent::DownloadEnd {
            name,
            status,
            message,
        } => DnfInterface::download_end(ctxt, &name, status, &message).await,
        DaemonEvent::RepoMetaDataProgress { name, frac } => {
            DnfInterface::repo_meta_data_progress(ctxt, &name, frac).await
        }
        DaemonEvent::TransactionEvent { phase, data } => {
            DnfInterface::transaction_event(ctxt, phase.as_str(), &data).await
        }
        DaemonEvent::RpmProgress {
            package,
            action,
            te_current,
            te_total,
            ts_current,
            ts_total,
        } => {
            DnfInterface::rpm_progress(
                ctxt, &package, &action, te_current, te_total, ts_current, ts_total,
            )
            .await
        }
        DaemonEvent::GpgImport {
            package_id,
            user_id,
            key_id,
            key_url,
            timestamp,
        } => {
            DnfInterface::gpg_import(ctxt, &package_id, &user_id, &key_id, &key_url, timestamp)
                .await
        }
    }
}

/// Emit queued events as signals until every sender is gone
pub async fn forward_events(connection: zbus::Connection, mut events: mpsc::UnboundedReceiver<DaemonEvent>) {
    let ctxt = match SignalContext::new(&connection, OBJECT_PATH) {
        Ok(ctxt) => ctxt,
        Err(e) => {
            warn!("Cannot emit signals: {}", e);
            return;
        }
    };
    while let Some(event) = events.recv().await {
        if let Err(e) = emit(&ctxt, event).await {
            warn!("Failed to emit signal: {}", e);
        }
    }
    debug!("Event channel closed");
}

/// Connect to `bus`, serve the interface and claim the well-known name
pub async fn serve(
    bus: BusKind,
    service: Arc<Mutex<DaemonService>>,
    shutdown: Arc<Notify>,
) -> zbus::Result<zbus::Connection> {
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let connection = builder
        .name(bus.bus_name())?
        .serve_at(OBJECT_PATH, DnfInterface::new(service, shutdown))?
        .build()
        .await?;
    info!("Serving {} at {}", bus.bus_name(), OBJECT_PATH);
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::DBusError;

    #[test]
    fn test_errors_keep_their_bus_names() {
        let locked = BusError::from(Error::LockedError("locked".into()));
        assert_eq!(locked.name().as_str(), "org.baseurl.Dnf.LockedError");

        let denied = BusError::from(Error::AccessDeniedError("no".into()));
        assert_eq!(denied.name().as_str(), "org.baseurl.Dnf.AccessDeniedError");

        let parse = BusError::from(Error::ParseError("bad ref".into()));
        assert_eq!(parse.name().as_str(), "org.baseurl.Dnf.TransactionError");
        assert_eq!(parse.description(), Some("Parse error: bad ref"));
    }

    #[test]
    fn test_method_results_are_bus_errors() {
        fn refused() -> Result<bool> {
            Err(Error::LockedError(crate::daemon::LOCKED_MESSAGE.into()).into())
        }
        assert!(matches!(refused(), Err(BusError::LockedError(_))));
    }
}
