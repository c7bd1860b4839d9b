//! Container network namespace setup.
//!
//! This module moves pre-created interfaces into running containers and
//! configures their addresses.
//!
//! Architecture:
//! - `alias`: `<netns dir>/<pid>` symlinks that name a container's namespace
//! - `ip`: host link lookup/move, and in-namespace configuration via `nsenter` + `ip`
//! - `binder`: the ordered bind sequence built on the two above

mod alias;
mod binder;
mod ip;

pub use alias::{FsAliasStore, NamespaceAliasStore, DEFAULT_NETNS_DIR, DEFAULT_PROC_ROOT};
pub use binder::{
    AddressStep, BackoffPolicy, BindError, BindPhase, NamespaceBinder, NamespaceHandle,
    DEFAULT_LINK_LOOKUP_ATTEMPTS, DEFAULT_LINK_RETRY_DELAY,
};
pub use ip::{IpTool, LinkError, LinkOps, NamespaceConfigurator};
