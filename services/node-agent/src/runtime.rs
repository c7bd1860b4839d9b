//! Container runtime inspection.
//!
//! The agent never mutates container state; it only asks the runtime for the
//! init process id and running state of a container so that an interface can
//! be moved into that process's network namespace.
//!
//! A Docker-backed implementation shells out to `docker inspect`. A mock
//! implementation is provided for testing and development.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Snapshot of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Full container ID.
    pub id: String,

    /// Container name, without the runtime's leading `/`.
    pub name: String,

    /// Init process id (0 when not running).
    pub pid: u32,

    /// Whether the container is running.
    pub running: bool,
}

/// Errors from runtime inspection.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("container '{container}' not found: {reason}")]
    NotFound { container: String, reason: String },

    #[error("container '{0}' is not running")]
    NotRunning(String),

    #[error("invalid inspect response: {0}")]
    InvalidResponse(String),

    #[error("command execution failed: {0}")]
    CommandFailed(#[from] std::io::Error),
}

/// Read-only view of the container runtime.
pub trait ContainerInspector: Send + Sync {
    /// Inspect a container by name, ID, or attach handle.
    fn inspect(&self, name_or_id: &str) -> Result<ContainerInfo, InspectError>;
}

/// Resolve a running container's ID from its name.
pub fn container_id(inspector: &dyn ContainerInspector, name: &str) -> Result<String, InspectError> {
    let info = inspector.inspect(name)?;
    if !info.running {
        return Err(InspectError::NotRunning(name.to_string()));
    }
    Ok(info.id)
}

/// Resolve a running container's name from its ID.
pub fn container_name(inspector: &dyn ContainerInspector, id: &str) -> Result<String, InspectError> {
    let info = inspector.inspect(id)?;
    if !info.running {
        return Err(InspectError::NotRunning(id.to_string()));
    }
    Ok(info.name)
}

// =============================================================================
// Docker
// =============================================================================

/// Subset of `docker inspect` output the agent needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerContainer {
    id: String,
    name: String,
    state: DockerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerState {
    running: bool,
    pid: u32,
}

/// Inspector backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerInspector {
    /// Path to the docker binary.
    binary: PathBuf,

    /// Daemon endpoint (`-H`), if not the CLI default.
    host: Option<String>,
}

impl DockerInspector {
    /// Create a new inspector.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            host: None,
        }
    }

    /// Use a specific daemon endpoint (e.g. `unix:///var/run/docker.sock`).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn parse_output(name_or_id: &str, stdout: &[u8]) -> Result<ContainerInfo, InspectError> {
        let mut containers: Vec<DockerContainer> = serde_json::from_slice(stdout)
            .map_err(|e| InspectError::InvalidResponse(e.to_string()))?;

        let Some(container) = containers.pop() else {
            return Err(InspectError::NotFound {
                container: name_or_id.to_string(),
                reason: "empty inspect result".to_string(),
            });
        };

        Ok(ContainerInfo {
            id: container.id,
            name: container.name.trim_start_matches('/').to_string(),
            pid: container.state.pid,
            running: container.state.running,
        })
    }
}

impl ContainerInspector for DockerInspector {
    fn inspect(&self, name_or_id: &str) -> Result<ContainerInfo, InspectError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("-H").arg(host);
        }
        let output = cmd
            .args(["inspect", "--type", "container", name_or_id])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                container = %name_or_id,
                error = %stderr.trim(),
                "Unable to get container info"
            );
            return Err(InspectError::NotFound {
                container: name_or_id.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        let info = Self::parse_output(name_or_id, &output.stdout)?;
        debug!(
            container = %name_or_id,
            id = %info.id,
            pid = info.pid,
            running = info.running,
            "Inspected container"
        );
        Ok(info)
    }
}

// =============================================================================
// Mock
// =============================================================================

/// In-memory inspector for testing and development.
#[derive(Debug, Default)]
pub struct MockInspector {
    /// Containers keyed by every name/ID/handle they answer to.
    containers: Mutex<HashMap<String, ContainerInfo>>,

    /// Keys passed to `inspect`, in call order.
    calls: Mutex<Vec<String>>,
}

impl MockInspector {
    /// Create an empty mock inspector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container under a lookup key.
    pub fn insert(&self, key: &str, info: ContainerInfo) {
        if let Ok(mut containers) = self.containers.lock() {
            containers.insert(key.to_string(), info);
        }
    }

    /// Register a running container under its name and ID.
    pub fn with_running(self, name: &str, id: &str, pid: u32) -> Self {
        let info = ContainerInfo {
            id: id.to_string(),
            name: name.to_string(),
            pid,
            running: true,
        };
        self.insert(name, info.clone());
        self.insert(id, info);
        self
    }

    /// Register a stopped container under its name and ID.
    pub fn with_stopped(self, name: &str, id: &str) -> Self {
        let info = ContainerInfo {
            id: id.to_string(),
            name: name.to_string(),
            pid: 0,
            running: false,
        };
        self.insert(name, info.clone());
        self.insert(id, info);
        self
    }

    /// Keys that have been inspected so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ContainerInspector for MockInspector {
    fn inspect(&self, name_or_id: &str) -> Result<ContainerInfo, InspectError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name_or_id.to_string());
        }

        debug!(container = %name_or_id, "[MOCK] Inspecting container");

        self.containers
            .lock()
            .ok()
            .and_then(|c| c.get(name_or_id).cloned())
            .ok_or_else(|| InspectError::NotFound {
                container: name_or_id.to_string(),
                reason: "no such container".to_string(),
            })
    }
}
