//! netplug Node Agent Library
//!
//! The node agent runs on each container host and wires pre-created virtual
//! interfaces into running containers' network namespaces.
//!
//! ## Architecture
//!
//! ```text
//! EndpointLifecycle
//! └── NamespaceBinder
//!     ├── ContainerInspector     (runtime: container -> pid)
//!     ├── NamespaceAliasStore    (netns alias symlinks)
//!     ├── LinkOps                (host link lookup / move)
//!     └── NamespaceConfigurator  (address + link up in the namespace)
//! ```
//!
//! ## Modules
//!
//! - `endpoint`: attach/detach orchestration
//! - `network`: namespace binding and its OS seams
//! - `runtime`: container runtime inspection (Docker, mock)
//! - `config`: environment configuration

pub mod config;
pub mod endpoint;
pub mod network;
pub mod runtime;

// Re-export commonly used types
pub use endpoint::{ContainerEndpointContext, EndpointLifecycle};
pub use network::{BindError, NamespaceBinder, NamespaceHandle};
pub use runtime::{ContainerInspector, DockerInspector, MockInspector};
