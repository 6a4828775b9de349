// tests/common/mod.rs

//! Shared fixtures for integration tests: a small catalog and service
//! builders wired to an event channel.

#![allow(dead_code)]

use dnfdaemon::daemon::{
    DaemonConfig, DaemonEvent, DaemonService, PermissionGate, TransactionPhase, TrustAll,
};
use dnfdaemon::engine::catalog::Catalog;
use dnfdaemon::engine::memory::MemoryProvider;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const CLIENT_A: &str = ":1.42";
pub const CLIENT_B: &str = ":1.43";

pub const PKG_X: &str = "pkgX,0,1.0,1,noarch,repo1";
pub const PKG_Y: &str = "pkgY,0,1.0,1,noarch,repo1";
pub const SIGNED: &str = "signed,0,2.0,1,x86_64,repo1";
pub const FLAKY: &str = "flaky,0,1.0,1,noarch,repo1";
pub const BASH_INSTALLED: &str = "bash,0,5.2.26,1,x86_64,@System";

/// Installed bash and glibc, an update for bash, a few available packages
pub const CATALOG: &str = r#"
[config]
installonly_limit = 3
best = true

[[repo]]
id = "repo1"
name = "Main repository"

[[repo]]
id = "updates"
name = "Updates"

[[repo]]
id = "testing"
name = "Testing"
enabled = false

[[package]]
name = "glibc"
version = "2.38"
release = "1"
arch = "x86_64"
installed = true
provides = ["libc.so.6"]

[[package]]
name = "bash"
version = "5.2.26"
release = "1"
arch = "x86_64"
installed = true
summary = "The GNU Bourne Again shell"
requires = ["glibc >= 2.38"]

[[package]]
name = "bash"
version = "5.2.26"
release = "1"
arch = "x86_64"
repo = "repo1"
summary = "The GNU Bourne Again shell"
size = 1800
requires = ["glibc >= 2.38"]

[[package]]
name = "bash"
version = "5.2.37"
release = "1"
arch = "x86_64"
repo = "updates"
summary = "The GNU Bourne Again shell"
size = 1900
requires = ["glibc >= 2.38"]

[[package]]
name = "pkgX"
version = "1.0"
release = "1"
repo = "repo1"
summary = "Example package X"
size = 1024

[[package]]
name = "pkgY"
version = "1.0"
release = "1"
repo = "repo1"
summary = "Example package Y"
size = 2048
requires = ["missing-dep >= 1.0"]

[[package]]
name = "signed"
version = "2.0"
release = "1"
arch = "x86_64"
repo = "repo1"
size = 512
gpg_key = "5A03B4DD8254ECA02"

[[package]]
name = "flaky"
version = "1.0"
release = "1"
repo = "repo1"
size = 300
fail_download = true

[[package]]
name = "nano"
version = "7.2"
release = "1"
arch = "x86_64"
repo = "repo1"
summary = "A small text editor"
size = 600

[[package]]
name = "vim-enhanced"
version = "9.1"
release = "1"
arch = "x86_64"
repo = "testing"
summary = "A version of the VIM editor"

[[category]]
id = "apps"
name = "Applications"
groups = ["editors"]

[[group]]
id = "editors"
name = "Editors"
description = "Sometimes called text editors"
mandatory = ["nano"]
optional = ["vim-enhanced"]

[[key]]
id = "5A03B4DD8254ECA02"
user_id = "Fedora (43) <fedora-43-primary@fedoraproject.org>"
url = "file:///etc/pki/rpm-gpg/RPM-GPG-KEY-fedora-43"
timestamp = 1722470400
"#;

/// Service with its event receiver
pub struct Harness {
    pub service: DaemonService,
    pub events: mpsc::UnboundedReceiver<DaemonEvent>,
    pub provider: Arc<MemoryProvider>,
}

impl Harness {
    /// Everything emitted since the last call
    pub fn drain(&mut self) -> Vec<DaemonEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Transaction phases emitted since the last call
    pub fn phases(&mut self) -> Vec<TransactionPhase> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                DaemonEvent::TransactionEvent { phase, .. } => Some(phase),
                _ => None,
            })
            .collect()
    }
}

fn build(gate: PermissionGate, config: DaemonConfig) -> Harness {
    let catalog = Catalog::from_toml(CATALOG).expect("fixture catalog");
    let provider = Arc::new(MemoryProvider::new(catalog));
    let (tx, rx) = mpsc::unbounded_channel::<DaemonEvent>();
    let service = DaemonService::new(config, gate, provider.clone(), Arc::new(tx));
    Harness {
        service,
        events: rx,
        provider,
    }
}

/// System variant that grants every caller
pub fn system_service() -> Harness {
    build(PermissionGate::system(Box::new(TrustAll)), DaemonConfig::default())
}

/// System variant with custom configuration
pub fn system_service_with(config: DaemonConfig) -> Harness {
    build(PermissionGate::system(Box::new(TrustAll)), config)
}

/// Read-only session variant
pub fn session_service() -> Harness {
    build(PermissionGate::session(), DaemonConfig::default())
}

/// System variant already locked by [`CLIENT_A`]
pub fn locked_system_service() -> Harness {
    let mut harness = system_service();
    assert!(harness.service.lock(CLIENT_A).unwrap());
    harness
}
