//! netplug Node Agent
//!
//! Attaches or detaches one container endpoint per invocation. The request
//! comes from `NETPLUG_*` environment variables, see `config`.
//!
//! ## Flow
//!
//! - **Config**: host paths, tool binaries, retry delay, tag ceilings and ranges
//! - **Runtime**: Docker inspection resolves the container's pid
//! - **Binder**: alias, move, address inside the container namespace
//! - **Lifecycle**: runs the bind and releases the alias

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netplug_node_agent::config::{Config, EndpointCommand, EndpointRequest};
use netplug_node_agent::network::{FsAliasStore, IpTool};
use netplug_node_agent::{DockerInspector, EndpointLifecycle, NamespaceBinder};

fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        netns_dir = %config.netns_dir.display(),
        ip_binary = %config.ip_binary.display(),
        nsenter_binary = %config.nsenter_binary.display(),
        docker_binary = %config.docker_binary.display(),
        link_retry_delay_ms = config.link_retry_delay_ms,
        "Configuration loaded"
    );

    for set in config.tag_ranges()? {
        info!(
            kind = %set.kind(),
            ranges = set.ranges().len(),
            tags = set.total_tags(),
            "Tag ranges validated"
        );
    }

    let request = EndpointRequest::from_env()?;

    let ip = Arc::new(IpTool::new(&config.ip_binary).with_nsenter(&config.nsenter_binary));
    match ip.local_ipv4() {
        Ok(addr) => debug!(local_ip = %addr, "Host address"),
        Err(e) => warn!(error = %e, "Could not determine host address"),
    }

    let mut inspector = DockerInspector::new(&config.docker_binary);
    if let Some(host) = &config.docker_host {
        inspector = inspector.with_host(host.as_str());
    }

    let binder = NamespaceBinder::new(
        Arc::new(inspector),
        Arc::new(FsAliasStore::new(&config.netns_dir, &config.proc_root)),
        ip.clone(),
        ip,
    )
    .with_backoff(config.backoff());
    let lifecycle = EndpointLifecycle::new(Arc::new(binder));

    let ctx = &request.context;
    let result = match request.command {
        EndpointCommand::Attach => lifecycle.attach_endpoint(ctx),
        EndpointCommand::Detach => lifecycle.detach_endpoint(ctx),
    };
    result.with_context(|| {
        format!(
            "{:?} of {} for container {} failed",
            request.command,
            ctx.interface,
            ctx.lookup_key()
        )
    })?;

    info!(command = ?request.command, "Endpoint request complete");
    Ok(())
}
