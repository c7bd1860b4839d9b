//! Binding an existing interface into a container's network namespace.
//!
//! A bind runs strictly in order and stops at the first failure:
//!
//! ```text
//! Resolving -> Aliasing -> Moving -> Addressing -> Bound
//! ```
//!
//! - Resolving: container -> init pid via the runtime; must be running
//! - Aliasing: `<netns dir>/<pid>` -> `/proc/<pid>/ns/net`
//! - Moving: host link lookup (one retry after a fixed backoff), then move
//! - Addressing: address add + link up inside the namespace (optional)
//!
//! Nothing is rolled back on failure. Calls for the same container must be
//! serialized by the caller; calls for different containers touch disjoint
//! aliases and may run concurrently.

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::alias::NamespaceAliasStore;
use super::ip::{LinkError, LinkOps, NamespaceConfigurator};
use crate::endpoint::ContainerEndpointContext;
use crate::runtime::{ContainerInspector, InspectError};

/// Default wait before the second interface lookup.
pub const DEFAULT_LINK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default number of interface lookups (first try plus one retry).
pub const DEFAULT_LINK_LOOKUP_ATTEMPTS: u32 = 2;

/// Fixed-delay retry policy for the interface lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total lookups, including the first.
    pub max_attempts: u32,
    /// Sleep between lookups.
    pub delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Default attempts with no sleep.
    pub fn immediate() -> Self {
        Self::new(DEFAULT_LINK_LOOKUP_ATTEMPTS, Duration::ZERO)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_LOOKUP_ATTEMPTS, DEFAULT_LINK_RETRY_DELAY)
    }
}

/// Stage of a bind operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPhase {
    Resolving,
    Aliasing,
    Moving,
    Addressing,
    Bound,
}

impl BindPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Aliasing => "aliasing",
            Self::Moving => "moving",
            Self::Addressing => "addressing",
            Self::Bound => "bound",
        }
    }
}

impl std::fmt::Display for BindPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-step of the addressing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStep {
    AssignAddress,
    LinkUp,
}

impl std::fmt::Display for AddressStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AssignAddress => f.write_str("assign address"),
            Self::LinkUp => f.write_str("link up"),
        }
    }
}

/// Errors from a bind operation.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("couldn't obtain info for container '{container}': {reason}")]
    ContainerNotFound { container: String, reason: String },

    #[error("container '{0}' not running")]
    ContainerNotRunning(String),

    #[error("failed to create namespace alias {}: {source}", path.display())]
    AliasCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interface '{interface}' not found after {attempts} lookups")]
    InterfaceNotFound { interface: String, attempts: u32 },

    #[error("failed to move interface '{interface}' into namespace of pid {pid}: {source}")]
    NamespaceMoveFailed {
        interface: String,
        pid: u32,
        #[source]
        source: LinkError,
    },

    #[error("subnet length unspecified for address {0}")]
    MissingSubnetLength(IpAddr),

    #[error("failed to {step} on interface '{interface}': {source}")]
    AddressConfigurationFailed {
        step: AddressStep,
        interface: String,
        #[source]
        source: LinkError,
    },
}

impl BindError {
    /// Phase the bind was in when it failed.
    pub fn phase(&self) -> BindPhase {
        match self {
            Self::ContainerNotFound { .. } | Self::ContainerNotRunning(_) => BindPhase::Resolving,
            Self::AliasCreationFailed { .. } => BindPhase::Aliasing,
            Self::InterfaceNotFound { .. } | Self::NamespaceMoveFailed { .. } => BindPhase::Moving,
            Self::MissingSubnetLength(_) | Self::AddressConfigurationFailed { .. } => {
                BindPhase::Addressing
            }
        }
    }
}

/// A bound namespace: the container's pid and the alias created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    pid: u32,
    alias_path: PathBuf,
}

impl NamespaceHandle {
    pub fn new(pid: u32, alias_path: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            alias_path: alias_path.into(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn alias_path(&self) -> &Path {
        &self.alias_path
    }
}

/// Moves interfaces into container namespaces and addresses them.
pub struct NamespaceBinder {
    inspector: Arc<dyn ContainerInspector>,
    aliases: Arc<dyn NamespaceAliasStore>,
    links: Arc<dyn LinkOps>,
    configurator: Arc<dyn NamespaceConfigurator>,
    backoff: BackoffPolicy,
}

impl NamespaceBinder {
    pub fn new(
        inspector: Arc<dyn ContainerInspector>,
        aliases: Arc<dyn NamespaceAliasStore>,
        links: Arc<dyn LinkOps>,
        configurator: Arc<dyn NamespaceConfigurator>,
    ) -> Self {
        Self {
            inspector,
            aliases,
            links,
            configurator,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Override the interface lookup retry policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Bind `ctx.interface` into the container's namespace.
    pub fn bind(&self, ctx: &ContainerEndpointContext) -> Result<NamespaceHandle, BindError> {
        let result = self.run_bind(ctx);
        if let Err(e) = &result {
            warn!(
                container = %ctx.lookup_key(),
                interface = %ctx.interface,
                phase = %e.phase(),
                error = %e,
                "Bind failed"
            );
        }
        result
    }

    fn run_bind(&self, ctx: &ContainerEndpointContext) -> Result<NamespaceHandle, BindError> {
        let pid = self.resolve(ctx)?;
        let handle = NamespaceHandle::new(pid, self.create_alias(pid)?);
        self.move_link(&ctx.interface, pid)?;
        self.configure(ctx, &handle)?;

        info!(
            container = %ctx.lookup_key(),
            interface = %ctx.interface,
            pid,
            phase = %BindPhase::Bound,
            "Interface bound into container namespace"
        );

        Ok(handle)
    }

    /// Remove the alias for a bound namespace. Never fails.
    pub fn unbind(&self, handle: &NamespaceHandle) {
        match self.aliases.remove(handle.pid) {
            Ok(()) => debug!(pid = handle.pid, "Namespace alias released"),
            Err(e) => warn!(
                pid = handle.pid,
                alias = %handle.alias_path.display(),
                error = %e,
                "Failed to remove namespace alias"
            ),
        }
    }

    fn resolve(&self, ctx: &ContainerEndpointContext) -> Result<u32, BindError> {
        let key = ctx.lookup_key();
        debug!(container = %key, phase = %BindPhase::Resolving, "Resolving container pid");

        let info = self.inspector.inspect(key).map_err(|e| match e {
            InspectError::NotRunning(name) => BindError::ContainerNotRunning(name),
            other => BindError::ContainerNotFound {
                container: key.to_string(),
                reason: other.to_string(),
            },
        })?;

        if !info.running {
            return Err(BindError::ContainerNotRunning(key.to_string()));
        }

        Ok(info.pid)
    }

    fn create_alias(&self, pid: u32) -> Result<PathBuf, BindError> {
        let path = self.aliases.alias_path(pid);
        debug!(pid, alias = %path.display(), phase = %BindPhase::Aliasing, "Creating namespace alias");

        let failed = |source| BindError::AliasCreationFailed {
            path: path.clone(),
            source,
        };

        self.aliases.ensure_directory().map_err(failed)?;
        self.aliases.remove(pid).map_err(failed)?;
        self.aliases.create(pid).map_err(failed)
    }

    fn move_link(&self, interface: &str, pid: u32) -> Result<(), BindError> {
        debug!(interface = %interface, pid, phase = %BindPhase::Moving, "Moving interface");

        self.wait_for_link(interface, pid)?;
        self.links
            .move_to_namespace(interface, pid)
            .map_err(|source| BindError::NamespaceMoveFailed {
                interface: interface.to_string(),
                pid,
                source,
            })
    }

    /// Interface creation elsewhere may lag behind the attach request, so a
    /// missing link is retried per the backoff policy.
    fn wait_for_link(&self, interface: &str, pid: u32) -> Result<(), BindError> {
        let attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.links.lookup(interface) {
                Ok(()) => return Ok(()),
                Err(LinkError::NotFound(_)) if attempt < attempts => {
                    debug!(
                        interface = %interface,
                        attempt,
                        delay_ms = self.backoff.delay.as_millis() as u64,
                        "Interface not found yet, retrying"
                    );
                    thread::sleep(self.backoff.delay);
                    attempt += 1;
                }
                Err(LinkError::NotFound(_)) => {
                    return Err(BindError::InterfaceNotFound {
                        interface: interface.to_string(),
                        attempts,
                    });
                }
                Err(source) => {
                    return Err(BindError::NamespaceMoveFailed {
                        interface: interface.to_string(),
                        pid,
                        source,
                    });
                }
            }
        }
    }

    fn configure(
        &self,
        ctx: &ContainerEndpointContext,
        ns: &NamespaceHandle,
    ) -> Result<(), BindError> {
        let Some(address) = ctx.ip_address else {
            debug!(interface = %ctx.interface, "No address requested, skipping configuration");
            return Ok(());
        };

        if ctx.subnet_len == 0 {
            return Err(BindError::MissingSubnetLength(address));
        }

        info!(
            interface = %ctx.interface,
            address = %address,
            subnet_len = ctx.subnet_len,
            pid = ns.pid(),
            alias = %ns.alias_path().display(),
            phase = %BindPhase::Addressing,
            "Configuring interface address"
        );

        let failed = |step| {
            let interface = ctx.interface.clone();
            move |source| BindError::AddressConfigurationFailed {
                step,
                interface,
                source,
            }
        };

        self.configurator
            .configure_address(ns, &ctx.interface, address, ctx.subnet_len)
            .map_err(failed(AddressStep::AssignAddress))?;
        self.configurator
            .bring_up(ns, &ctx.interface)
            .map_err(failed(AddressStep::LinkUp))?;

        debug!(interface = %ctx.interface, "Configured address and brought interface up");
        Ok(())
    }
}
