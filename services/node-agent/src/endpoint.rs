//! Endpoint attach/detach.
//!
//! An endpoint is one pre-created interface, plus an optional address, bound
//! into one container's network namespace.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::info;

use crate::network::{BindError, NamespaceBinder};

/// Caller-supplied description of one attach or detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEndpointContext {
    /// Container name.
    pub container: String,

    /// Runtime attach handle; takes precedence over the name when set.
    pub attach_uuid: Option<String>,

    /// Name of the interface to move, as it exists on the host.
    pub interface: String,

    /// Address to assign inside the container, if any.
    pub ip_address: Option<IpAddr>,

    /// Prefix length for `ip_address`.
    pub subnet_len: u8,
}

impl ContainerEndpointContext {
    /// Create a context with no address.
    pub fn new(container: &str, interface: &str) -> Self {
        Self {
            container: container.to_string(),
            attach_uuid: None,
            interface: interface.to_string(),
            ip_address: None,
            subnet_len: 0,
        }
    }

    /// Set the address and prefix length.
    pub fn with_address(mut self, address: IpAddr, subnet_len: u8) -> Self {
        self.ip_address = Some(address);
        self.subnet_len = subnet_len;
        self
    }

    /// Set the runtime attach handle.
    pub fn with_attach_uuid(mut self, uuid: &str) -> Self {
        self.attach_uuid = Some(uuid.to_string());
        self
    }

    /// Key used to inspect the container: attach handle if set, else name.
    pub fn lookup_key(&self) -> &str {
        match self.attach_uuid.as_deref() {
            Some(uuid) if !uuid.is_empty() => uuid,
            _ => &self.container,
        }
    }
}

/// Attach/detach of container endpoints.
pub struct EndpointLifecycle {
    binder: Arc<NamespaceBinder>,
}

impl EndpointLifecycle {
    pub fn new(binder: Arc<NamespaceBinder>) -> Self {
        Self { binder }
    }

    /// Move the interface into the container and configure it.
    ///
    /// The namespace alias is released once the interface is configured.
    /// Errors from the bind are returned as-is, with no rollback.
    pub fn attach_endpoint(&self, ctx: &ContainerEndpointContext) -> Result<(), BindError> {
        info!(
            container = %ctx.lookup_key(),
            interface = %ctx.interface,
            "Attaching endpoint"
        );

        let handle = self.binder.bind(ctx)?;

        // ACL/QoS programming for the endpoint goes here once supported.

        self.binder.unbind(&handle);
        Ok(())
    }

    /// Detach an endpoint.
    ///
    /// The interface is reclaimed with the container's namespace when the
    /// endpoint is deleted, so there is nothing to undo here yet.
    pub fn detach_endpoint(&self, ctx: &ContainerEndpointContext) -> Result<(), BindError> {
        info!(
            container = %ctx.lookup_key(),
            interface = %ctx.interface,
            "Detaching endpoint"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_key_prefers_attach_uuid() {
        let ctx = ContainerEndpointContext::new("web", "veth0");
        assert_eq!(ctx.lookup_key(), "web");

        let ctx = ctx.with_attach_uuid("3b1f");
        assert_eq!(ctx.lookup_key(), "3b1f");
    }

    #[test]
    fn test_empty_attach_uuid_falls_back_to_name() {
        let ctx = ContainerEndpointContext::new("web", "veth0").with_attach_uuid("");
        assert_eq!(ctx.lookup_key(), "web");
    }

    #[test]
    fn test_with_address() {
        let ctx = ContainerEndpointContext::new("web", "veth0")
            .with_address("11.2.1.5".parse().unwrap(), 24);
        assert_eq!(ctx.ip_address, Some("11.2.1.5".parse().unwrap()));
        assert_eq!(ctx.subnet_len, 24);
    }
}
