// src/daemon/auth.rs

//! Authorization for bus callers
//!
//! Provides:
//! - Permission classes (read / write) and their PolicyKit action ids
//! - The [`Authorizer`] seam towards the authorization service
//! - A PolicyKit client over the system bus (feature `daemon`)
//! - The per-process [`PermissionGate`] with its grant cache
//! - Audit logging
//!
//! # Security Model
//!
//! - **System daemon**: every caller needs a grant from the authorization
//!   service for the class of the method it calls. Grants are cached per
//!   caller for the life of the process.
//! - **Session daemon**: runs as the user, asks nobody, and refuses
//!   write-class methods outright.

use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{info, warn};

/// Permission class of a remote method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionClass {
    /// Queries and session control
    Read,
    /// Anything that changes the system or its configuration
    Write,
}

impl PermissionClass {
    /// PolicyKit action id for this class
    pub fn polkit_action(&self) -> &'static str {
        match self {
            PermissionClass::Read => "org.baseurl.DnfSystem.read",
            PermissionClass::Write => "org.baseurl.DnfSystem.write",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionClass::Read => "read",
            PermissionClass::Write => "write",
        }
    }
}

/// Authorization service seam
pub trait Authorizer: Send {
    /// Ask whether `caller` may perform `action`
    fn check(&self, caller: &str, action: &str) -> Result<bool>;
}

/// Grants everything (system daemon with PolicyKit disabled)
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustAll;

impl Authorizer for TrustAll {
    fn check(&self, _caller: &str, _action: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(feature = "daemon")]
mod polkit {
    use super::Authorizer;
    use crate::{Error, Result};
    use std::collections::HashMap;
    use zbus::zvariant::Value;

    #[zbus::proxy(
        interface = "org.freedesktop.PolicyKit1.Authority",
        default_service = "org.freedesktop.PolicyKit1",
        default_path = "/org/freedesktop/PolicyKit1/Authority"
    )]
    trait Authority {
        fn check_authorization(
            &self,
            subject: &(&str, HashMap<&str, Value<'_>>),
            action_id: &str,
            details: HashMap<&str, &str>,
            flags: u32,
            cancellation_id: &str,
        ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
    }

    /// Let the agent interact with the user to obtain authorization
    const ALLOW_USER_INTERACTION: u32 = 1;

    /// PolicyKit client using the blocking zbus API
    pub struct PolkitAuthorizer {
        connection: zbus::blocking::Connection,
    }

    impl PolkitAuthorizer {
        pub fn new() -> Result<Self> {
            let connection = zbus::blocking::Connection::system()
                .map_err(|e| Error::AccessDeniedError(format!("Cannot reach PolicyKit: {}", e)))?;
            Ok(Self { connection })
        }
    }

    impl Authorizer for PolkitAuthorizer {
        fn check(&self, caller: &str, action: &str) -> Result<bool> {
            let proxy = AuthorityProxyBlocking::new(&self.connection)
                .map_err(|e| Error::AccessDeniedError(format!("PolicyKit proxy: {}", e)))?;
            let subject_details = HashMap::from([("name", Value::from(caller))]);
            let subject = ("system-bus-name", subject_details);
            let (authorized, _challenge, _details) = proxy
                .check_authorization(
                    &subject,
                    action,
                    HashMap::new(),
                    ALLOW_USER_INTERACTION,
                    "",
                )
                .map_err(|e| Error::AccessDeniedError(format!("PolicyKit check failed: {}", e)))?;
            Ok(authorized)
        }
    }
}

#[cfg(feature = "daemon")]
pub use polkit::PolkitAuthorizer;

/// Per-process permission gate
pub struct PermissionGate {
    authorizer: Option<Box<dyn Authorizer>>,
    granted: HashSet<(String, PermissionClass)>,
    audit: AuditLogger,
}

impl PermissionGate {
    /// Gate for the session daemon: no authorization, no writes
    pub fn session() -> Self {
        Self {
            authorizer: None,
            granted: HashSet::new(),
            audit: AuditLogger::new(),
        }
    }

    /// Gate for the system daemon
    pub fn system(authorizer: Box<dyn Authorizer>) -> Self {
        Self {
            authorizer: Some(authorizer),
            granted: HashSet::new(),
            audit: AuditLogger::new(),
        }
    }

    /// Keep at most `max` audit entries in memory
    pub fn with_audit_capacity(mut self, max: usize) -> Self {
        self.audit = std::mem::take(&mut self.audit).with_max_entries(max);
        self
    }

    /// Whether write-class methods can be granted at all
    pub fn allows_system_writes(&self) -> bool {
        self.authorizer.is_some()
    }

    /// Check `caller` for `class`, asking the authorizer on first use
    pub fn check(&mut self, caller: &str, class: PermissionClass) -> Result<()> {
        let Some(authorizer) = self.authorizer.as_ref() else {
            return match class {
                PermissionClass::Read => Ok(()),
                PermissionClass::Write => {
                    self.audit
                        .log_check(caller, class, false, Some("session service"));
                    Err(Error::AccessDeniedError(
                        "Not supported by the session service".to_string(),
                    ))
                }
            };
        };

        let key = (caller.to_string(), class);
        if self.granted.contains(&key) {
            return Ok(());
        }

        let allowed = match authorizer.check(caller, class.polkit_action()) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("Authorization check for {} failed: {}", caller, e);
                false
            }
        };
        self.audit.log_check(caller, class, allowed, None);

        if allowed {
            self.granted.insert(key);
            Ok(())
        } else {
            Err(Error::AccessDeniedError(format!(
                "{} is not authorized for {}",
                caller,
                class.polkit_action()
            )))
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}

/// Audit log entry
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Unique bus name of the caller
    pub caller: String,
    pub class: PermissionClass,
    pub allowed: bool,
    pub details: Option<String>,
}

impl AuditEntry {
    pub fn new(caller: impl Into<String>, class: PermissionClass, allowed: bool) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            caller: caller.into(),
            class,
            allowed,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Format as log message
    pub fn to_log_message(&self) -> String {
        let allowed_str = if self.allowed { "ALLOWED" } else { "DENIED" };
        let details_str = self.details.as_deref().unwrap_or("");

        format!(
            "[{}] {} {} caller={} action={} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            allowed_str,
            self.class.as_str(),
            self.caller,
            self.class.polkit_action(),
            details_str
        )
    }
}

/// In-memory audit trail mirrored to the log
pub struct AuditLogger {
    entries: Vec<AuditEntry>,
    max_entries: usize,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: 1000,
        }
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn log(&mut self, entry: AuditEntry) {
        let msg = entry.to_log_message();
        if entry.allowed {
            info!("AUDIT: {}", msg);
        } else {
            warn!("AUDIT: {}", msg);
        }

        self.entries.push(entry);
        if self.entries.len() > self.max_entries {
            let drain_count = self.entries.len() - self.max_entries;
            self.entries.drain(0..drain_count);
        }
    }

    fn log_check(
        &mut self,
        caller: &str,
        class: PermissionClass,
        allowed: bool,
        details: Option<&str>,
    ) {
        let mut entry = AuditEntry::new(caller, class, allowed);
        if let Some(d) = details {
            entry = entry.with_details(d);
        }
        self.log(entry);
    }

    /// The last `count` entries
    pub fn recent_entries(&self, count: usize) -> &[AuditEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }
}
