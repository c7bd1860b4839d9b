//! Link and namespace operations via iproute2.
//!
//! Two narrow seams are exposed so the binder can be exercised without root:
//! - [`LinkOps`]: host-side lookup and namespace move of a link
//! - [`NamespaceConfigurator`]: address/link-up inside a process's namespace
//!
//! [`IpTool`] implements both by running the `ip` binary. Namespace-scoped
//! commands run under `nsenter --net=<alias>`, so they reach the namespace
//! through the alias the binder created, wherever the alias directory is.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use super::binder::NamespaceHandle;

/// Errors from link/namespace operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The kernel has no link by that name (in the namespace queried).
    #[error("link '{0}' not found")]
    NotFound(String),

    #[error("{command} failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("no global IPv4 address configured on this host")]
    NoGlobalAddress,

    #[error("command execution failed: {0}")]
    Io(#[from] io::Error),
}

/// Host-side link operations.
pub trait LinkOps: Send + Sync {
    /// Look a link up by name. Must return [`LinkError::NotFound`] when the
    /// link does not exist.
    fn lookup(&self, name: &str) -> Result<(), LinkError>;

    /// Move the link into the network namespace of `pid`.
    fn move_to_namespace(&self, name: &str, pid: u32) -> Result<(), LinkError>;
}

/// Operations scoped to a bound namespace.
///
/// The namespace is reached through `ns.alias_path()`, which exists for the
/// duration of these calls.
pub trait NamespaceConfigurator: Send + Sync {
    /// Assign `address/prefix_len` to `interface`.
    fn configure_address(
        &self,
        ns: &NamespaceHandle,
        interface: &str,
        address: IpAddr,
        prefix_len: u8,
    ) -> Result<(), LinkError>;

    /// Bring `interface` administratively up.
    fn bring_up(&self, ns: &NamespaceHandle, interface: &str) -> Result<(), LinkError>;
}

/// `ip` command wrapper.
#[derive(Debug, Clone)]
pub struct IpTool {
    /// Path to the `ip` binary.
    binary: PathBuf,

    /// Path to the `nsenter` binary.
    nsenter: PathBuf,
}

impl IpTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            nsenter: PathBuf::from("nsenter"),
        }
    }

    /// Use a specific `nsenter` binary for namespace-scoped commands.
    pub fn with_nsenter(mut self, nsenter: impl Into<PathBuf>) -> Self {
        self.nsenter = nsenter.into();
        self
    }

    /// Run `ip` with arguments, returning stdout on success.
    fn run_ip(&self, args: &[&str]) -> Result<String, LinkError> {
        run_command(&self.binary, args)
    }

    /// Run an `ip` subcommand inside the namespace behind `alias`.
    fn run_in_namespace(&self, alias: &Path, args: &[&str]) -> Result<(), LinkError> {
        let net = format!("--net={}", alias.display());
        let binary = self.binary.to_string_lossy();
        let mut full = vec![net.as_str(), &*binary];
        full.extend_from_slice(args);
        run_command(&self.nsenter, &full).map(|_| ())
    }

    /// First global-scope IPv4 address on the host.
    pub fn local_ipv4(&self) -> Result<Ipv4Addr, LinkError> {
        let out = self.run_ip(&["-o", "-4", "addr", "show", "scope", "global"])?;
        parse_first_inet(&out).ok_or(LinkError::NoGlobalAddress)
    }
}

impl Default for IpTool {
    fn default() -> Self {
        Self::new("/sbin/ip")
    }
}

impl LinkOps for IpTool {
    fn lookup(&self, name: &str) -> Result<(), LinkError> {
        match self.run_ip(&["-o", "link", "show", "dev", name]) {
            Ok(_) => Ok(()),
            Err(LinkError::CommandFailed { output, .. }) if is_missing_link(&output) => {
                Err(LinkError::NotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn move_to_namespace(&self, name: &str, pid: u32) -> Result<(), LinkError> {
        debug!(interface = %name, pid, "Moving link into namespace");
        self.run_ip(&["link", "set", "dev", name, "netns", &pid.to_string()])
            .map(|_| ())
    }
}

impl NamespaceConfigurator for IpTool {
    fn configure_address(
        &self,
        ns: &NamespaceHandle,
        interface: &str,
        address: IpAddr,
        prefix_len: u8,
    ) -> Result<(), LinkError> {
        let cidr = format!("{}/{}", address, prefix_len);
        self.run_in_namespace(ns.alias_path(), &["addr", "add", &cidr, "dev", interface])
    }

    fn bring_up(&self, ns: &NamespaceHandle, interface: &str) -> Result<(), LinkError> {
        self.run_in_namespace(ns.alias_path(), &["link", "set", interface, "up"])
    }
}

/// Run a command, returning stdout on success.
fn run_command(program: &Path, args: &[&str]) -> Result<String, LinkError> {
    let output = Command::new(program).args(args).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        return Err(LinkError::CommandFailed {
            command: format!("{} {}", name, args.join(" ")),
            output: format!("{} {}", stderr.trim(), stdout.trim())
                .trim()
                .to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// iproute2 reports a missing device as `Device "x" does not exist.`
fn is_missing_link(output: &str) -> bool {
    output.contains("does not exist") || output.contains("Cannot find device")
}

/// Extract the first `inet a.b.c.d/n` address from `ip -o -4 addr` output.
fn parse_first_inet(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| *w == "inet")?;
        let cidr = words.next()?;
        let addr = cidr.split('/').next()?;
        addr.parse().ok()
    })
}
