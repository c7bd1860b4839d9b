//! Configuration for the node agent.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use netplug_networking::{
    TagKind, TagLimits, TagRangeSet, VLAN_DEFAULT_MAX, VXLAN_DEFAULT_MAX,
};

use crate::endpoint::ContainerEndpointContext;
use crate::network::{
    BackoffPolicy, DEFAULT_LINK_LOOKUP_ATTEMPTS, DEFAULT_NETNS_DIR, DEFAULT_PROC_ROOT,
};

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding namespace aliases.
    pub netns_dir: PathBuf,

    /// procfs mount the aliases point into.
    pub proc_root: PathBuf,

    /// Path to the `ip` binary.
    pub ip_binary: PathBuf,

    /// Path to the `nsenter` binary used for in-namespace commands.
    pub nsenter_binary: PathBuf,

    /// Path to the `docker` binary.
    pub docker_binary: PathBuf,

    /// Docker daemon endpoint, if not the CLI default.
    pub docker_host: Option<String>,

    /// Wait before retrying a missing interface, in milliseconds.
    pub link_retry_delay_ms: u64,

    /// Highest usable VLAN id.
    pub vlan_max: u32,

    /// Highest usable VXLAN id.
    pub vxlan_max: u32,

    /// VLAN ranges handed to the allocator (e.g. "5-100, 101-200").
    pub vlan_ranges: Option<String>,

    /// VXLAN range handed to the allocator (e.g. "10000-16000").
    pub vxlan_range: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let netns_dir = std::env::var("NETPLUG_NETNS_DIR")
            .unwrap_or_else(|_| DEFAULT_NETNS_DIR.to_string())
            .into();

        let proc_root = std::env::var("NETPLUG_PROC_ROOT")
            .unwrap_or_else(|_| DEFAULT_PROC_ROOT.to_string())
            .into();

        let ip_binary = std::env::var("NETPLUG_IP_BINARY")
            .unwrap_or_else(|_| "/sbin/ip".to_string())
            .into();

        let nsenter_binary = std::env::var("NETPLUG_NSENTER_BINARY")
            .unwrap_or_else(|_| "nsenter".to_string())
            .into();

        let docker_binary = std::env::var("NETPLUG_DOCKER_BINARY")
            .unwrap_or_else(|_| "docker".to_string())
            .into();

        let docker_host = std::env::var("NETPLUG_DOCKER_HOST")
            .ok()
            .filter(|s| !s.is_empty());

        let link_retry_delay_ms = env_parse("NETPLUG_LINK_RETRY_DELAY_MS")?.unwrap_or(1000);
        let vlan_max = env_parse("NETPLUG_VLAN_MAX")?.unwrap_or(VLAN_DEFAULT_MAX);
        let vxlan_max = env_parse("NETPLUG_VXLAN_MAX")?.unwrap_or(VXLAN_DEFAULT_MAX);

        let vlan_ranges = std::env::var("NETPLUG_VLAN_RANGES").ok();
        let vxlan_range = std::env::var("NETPLUG_VXLAN_RANGE").ok();

        let log_level =
            std::env::var("NETPLUG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            netns_dir,
            proc_root,
            ip_binary,
            nsenter_binary,
            docker_binary,
            docker_host,
            link_retry_delay_ms,
            vlan_max,
            vxlan_max,
            vlan_ranges,
            vxlan_range,
            log_level,
        })
    }

    /// Interface lookup retry policy.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            DEFAULT_LINK_LOOKUP_ATTEMPTS,
            Duration::from_millis(self.link_retry_delay_ms),
        )
    }

    /// Tag ceilings for range parsing.
    pub fn tag_limits(&self) -> TagLimits {
        TagLimits {
            vlan_max: self.vlan_max,
            vxlan_max: self.vxlan_max,
        }
    }

    /// Parse the configured tag ranges against the configured ceilings.
    pub fn tag_ranges(&self) -> Result<Vec<TagRangeSet>> {
        let limits = self.tag_limits();
        [
            (self.vlan_ranges.as_deref(), TagKind::Vlan),
            (self.vxlan_range.as_deref(), TagKind::Vxlan),
        ]
        .into_iter()
        .filter_map(|(spec, kind)| spec.map(|spec| (spec, kind)))
        .map(|(spec, kind)| {
            TagRangeSet::parse_with_limits(spec, kind, &limits)
                .with_context(|| format!("invalid {} range '{}'", kind, spec))
        })
        .collect()
    }
}

/// Lifecycle operation requested of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointCommand {
    Attach,
    Detach,
}

impl std::str::FromStr for EndpointCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attach" => Ok(Self::Attach),
            "detach" => Ok(Self::Detach),
            other => Err(anyhow!("unknown endpoint command: {}", other)),
        }
    }
}

/// One endpoint request read from the environment.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub command: EndpointCommand,
    pub context: ContainerEndpointContext,
}

impl EndpointRequest {
    /// Read the request from `NETPLUG_*` variables.
    pub fn from_env() -> Result<Self> {
        let command = std::env::var("NETPLUG_COMMAND")
            .context("NETPLUG_COMMAND not set")?
            .parse()?;

        let container = std::env::var("NETPLUG_CONTAINER").unwrap_or_default();
        let attach_uuid = std::env::var("NETPLUG_ATTACH_UUID")
            .ok()
            .filter(|s| !s.is_empty());
        if container.is_empty() && attach_uuid.is_none() {
            bail!("one of NETPLUG_CONTAINER or NETPLUG_ATTACH_UUID must be set");
        }

        let interface = std::env::var("NETPLUG_INTERFACE").context("NETPLUG_INTERFACE not set")?;

        let ip_address: Option<IpAddr> = env_parse("NETPLUG_IP_ADDRESS")?;
        let subnet_len: u8 = env_parse("NETPLUG_SUBNET_LEN")?.unwrap_or(0);

        Ok(Self {
            command,
            context: ContainerEndpointContext {
                container,
                attach_uuid,
                interface,
                ip_address,
                subnet_len,
            },
        })
    }
}

/// Parse an optional variable; empty counts as unset.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}='{}': {}", key, s, e)),
        _ => Ok(None),
    }
}
