//! Integration tests for endpoint attach.
//!
//! These tests drive the full bind sequence against:
//! 1. MockInspector for container -> pid resolution
//! 2. FsAliasStore over a temp directory
//! 3. A recording fake for link and in-namespace operations
//!
//! No root or real namespaces are needed.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use netplug_node_agent::network::{
    AddressStep, BackoffPolicy, BindError, BindPhase, FsAliasStore, LinkError, LinkOps,
    NamespaceConfigurator, NamespaceHandle,
};
use netplug_node_agent::{
    ContainerEndpointContext, EndpointLifecycle, MockInspector, NamespaceBinder,
};
use tempfile::TempDir;

const PID: u32 = 4242;

/// Records every link/namespace call and fails on demand.
#[derive(Default)]
struct FakeLinks {
    events: Mutex<Vec<String>>,
    /// Lookups answered with NotFound before the link "appears".
    missing_lookups: AtomicU32,
    lookup_error: bool,
    fail_move: bool,
    fail_step: Option<AddressStep>,
    /// Alias paths handed to in-namespace calls, and whether each existed.
    aliases_seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeLinks {
    fn missing_for(lookups: u32) -> Self {
        Self {
            missing_lookups: AtomicU32::new(lookups),
            ..Default::default()
        }
    }

    fn failing_at(step: AddressStep) -> Self {
        Self {
            fail_step: Some(step),
            ..Default::default()
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn saw_alias(&self, ns: &NamespaceHandle) {
        let path = ns.alias_path().to_path_buf();
        let present = fs::symlink_metadata(&path).is_ok();
        self.aliases_seen.lock().unwrap().push((path, present));
    }

    fn aliases_seen(&self) -> Vec<(PathBuf, bool)> {
        self.aliases_seen.lock().unwrap().clone()
    }

    fn failure(command: &str) -> LinkError {
        LinkError::CommandFailed {
            command: command.to_string(),
            output: "RTNETLINK answers: Operation not permitted".to_string(),
        }
    }
}

impl LinkOps for FakeLinks {
    fn lookup(&self, name: &str) -> Result<(), LinkError> {
        self.record(format!("lookup {name}"));
        if self.lookup_error {
            return Err(Self::failure("ip link show"));
        }
        let missing = self.missing_lookups.load(Ordering::SeqCst);
        if missing > 0 {
            self.missing_lookups.store(missing - 1, Ordering::SeqCst);
            return Err(LinkError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn move_to_namespace(&self, name: &str, pid: u32) -> Result<(), LinkError> {
        self.record(format!("move {name} {pid}"));
        if self.fail_move {
            return Err(Self::failure("ip link set netns"));
        }
        Ok(())
    }
}

impl NamespaceConfigurator for FakeLinks {
    fn configure_address(
        &self,
        ns: &NamespaceHandle,
        interface: &str,
        address: IpAddr,
        prefix_len: u8,
    ) -> Result<(), LinkError> {
        self.saw_alias(ns);
        self.record(format!("addr {} {interface} {address}/{prefix_len}", ns.pid()));
        if self.fail_step == Some(AddressStep::AssignAddress) {
            return Err(Self::failure("ip addr add"));
        }
        Ok(())
    }

    fn bring_up(&self, ns: &NamespaceHandle, interface: &str) -> Result<(), LinkError> {
        self.saw_alias(ns);
        self.record(format!("up {} {interface}", ns.pid()));
        if self.fail_step == Some(AddressStep::LinkUp) {
            return Err(Self::failure("ip link set up"));
        }
        Ok(())
    }
}

struct Harness {
    root: TempDir,
    inspector: Arc<MockInspector>,
    links: Arc<FakeLinks>,
    binder: Arc<NamespaceBinder>,
}

impl Harness {
    fn new(inspector: MockInspector, links: FakeLinks) -> Self {
        Self::with_netns_dir(inspector, links, |root| root.join("netns"))
    }

    fn with_netns_dir(
        inspector: MockInspector,
        links: FakeLinks,
        netns_dir: impl FnOnce(&Path) -> PathBuf,
    ) -> Self {
        let root = TempDir::new().unwrap();
        let inspector = Arc::new(inspector);
        let links = Arc::new(links);
        let aliases = FsAliasStore::new(netns_dir(root.path()), root.path().join("proc"));

        let binder = NamespaceBinder::new(
            inspector.clone(),
            Arc::new(aliases),
            links.clone(),
            links.clone(),
        )
        .with_backoff(BackoffPolicy::immediate());

        Self {
            root,
            inspector,
            links,
            binder: Arc::new(binder),
        }
    }

    fn lifecycle(&self) -> EndpointLifecycle {
        EndpointLifecycle::new(self.binder.clone())
    }

    fn netns_dir(&self) -> PathBuf {
        self.root.path().join("netns")
    }

    fn alias(&self) -> PathBuf {
        self.netns_dir().join(PID.to_string())
    }
}

fn running() -> MockInspector {
    MockInspector::new().with_running("web", "c0ffee", PID)
}

fn addressed_ctx() -> ContainerEndpointContext {
    ContainerEndpointContext::new("web", "veth42").with_address("11.2.1.5".parse().unwrap(), 24)
}

#[test]
fn test_attach_runs_steps_in_order() {
    let h = Harness::new(running(), FakeLinks::default());

    h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap();

    assert_eq!(
        h.links.events(),
        vec![
            "lookup veth42".to_string(),
            format!("move veth42 {PID}"),
            format!("addr {PID} veth42 11.2.1.5/24"),
            format!("up {PID} veth42"),
        ]
    );
}

#[test]
fn test_configurator_receives_bound_alias() {
    let h = Harness::with_netns_dir(running(), FakeLinks::default(), |root| {
        root.join("custom").join("netns")
    });
    let expected = h.root.path().join(format!("custom/netns/{PID}"));

    h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap();

    // Both in-namespace calls go through the live alias in the configured dir
    assert_eq!(
        h.links.aliases_seen(),
        vec![(expected.clone(), true), (expected.clone(), true)]
    );
    assert!(fs::symlink_metadata(&expected).is_err());
}

#[test]
fn test_attach_releases_alias() {
    let h = Harness::new(running(), FakeLinks::default());

    h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap();

    assert!(h.netns_dir().is_dir());
    assert!(fs::symlink_metadata(h.alias()).is_err());
}

#[test]
fn test_bind_leaves_alias_until_unbind() {
    let h = Harness::new(running(), FakeLinks::default());

    let handle = h.binder.bind(&addressed_ctx()).unwrap();
    assert_eq!(handle.pid(), PID);
    assert_eq!(handle.alias_path(), h.alias());
    assert_eq!(
        fs::read_link(h.alias()).unwrap(),
        h.root.path().join(format!("proc/{PID}/ns/net"))
    );

    h.binder.unbind(&handle);
    assert!(fs::symlink_metadata(h.alias()).is_err());

    // Missing alias is not an error
    h.binder.unbind(&handle);
}

#[test]
fn test_stale_alias_replaced() {
    let h = Harness::new(running(), FakeLinks::default());
    fs::create_dir_all(h.netns_dir()).unwrap();
    fs::write(h.alias(), b"stale").unwrap();

    let handle = h.binder.bind(&addressed_ctx()).unwrap();

    assert!(fs::symlink_metadata(handle.alias_path())
        .unwrap()
        .file_type()
        .is_symlink());
}

#[test]
fn test_attach_without_address_skips_configuration() {
    let h = Harness::new(running(), FakeLinks::default());
    let ctx = ContainerEndpointContext::new("web", "veth42");

    h.lifecycle().attach_endpoint(&ctx).unwrap();

    assert_eq!(
        h.links.events(),
        vec!["lookup veth42".to_string(), format!("move veth42 {PID}")]
    );
}

#[test]
fn test_attach_uuid_takes_precedence() {
    let h = Harness::new(running(), FakeLinks::default());
    let ctx = addressed_ctx().with_attach_uuid("c0ffee");

    h.lifecycle().attach_endpoint(&ctx).unwrap();

    assert_eq!(h.inspector.calls(), vec!["c0ffee".to_string()]);
}

#[test]
fn test_unknown_container() {
    let h = Harness::new(MockInspector::new(), FakeLinks::default());

    let err = h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap_err();

    assert!(matches!(err, BindError::ContainerNotFound { .. }));
    assert!(!h.netns_dir().exists());
    assert!(h.links.events().is_empty());
}

#[test]
fn test_not_running_container_creates_nothing() {
    let h = Harness::new(
        MockInspector::new().with_stopped("web", "c0ffee"),
        FakeLinks::default(),
    );

    let err = h.binder.bind(&addressed_ctx()).unwrap_err();

    assert!(matches!(err, BindError::ContainerNotRunning(_)));
    assert_eq!(err.phase(), BindPhase::Resolving);
    assert!(!h.netns_dir().exists());
    assert!(h.links.events().is_empty());
}

#[test]
fn test_alias_directory_failure() {
    let h = Harness::with_netns_dir(running(), FakeLinks::default(), |root| {
        let file = root.join("not-a-dir");
        fs::write(&file, b"").unwrap();
        file.join("netns")
    });

    let err = h.binder.bind(&addressed_ctx()).unwrap_err();

    assert!(matches!(err, BindError::AliasCreationFailed { .. }));
    assert!(h.links.events().is_empty());
}

#[test]
fn test_interface_appears_after_backoff() {
    let h = Harness::new(running(), FakeLinks::missing_for(1));

    h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap();

    let events = h.links.events();
    assert_eq!(&events[..3], &[
        "lookup veth42".to_string(),
        "lookup veth42".to_string(),
        format!("move veth42 {PID}"),
    ]);
}

#[test]
fn test_interface_never_appears() {
    let h = Harness::new(running(), FakeLinks::missing_for(u32::MAX));

    let err = h.binder.bind(&addressed_ctx()).unwrap_err();

    match err {
        BindError::InterfaceNotFound {
            interface,
            attempts,
        } => {
            assert_eq!(interface, "veth42");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        h.links.events(),
        vec!["lookup veth42".to_string(), "lookup veth42".to_string()]
    );
}

#[test]
fn test_backoff_delay_is_honoured() {
    let root = TempDir::new().unwrap();
    let links = Arc::new(FakeLinks::missing_for(1));
    let binder = NamespaceBinder::new(
        Arc::new(running()),
        Arc::new(FsAliasStore::new(root.path().join("netns"), root.path().join("proc"))),
        links.clone(),
        links,
    )
    .with_backoff(BackoffPolicy::new(2, Duration::from_millis(50)));

    let start = Instant::now();
    binder.bind(&addressed_ctx()).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_lookup_failure_is_not_retried() {
    let links = FakeLinks {
        lookup_error: true,
        ..Default::default()
    };
    let h = Harness::new(running(), links);

    let err = h.binder.bind(&addressed_ctx()).unwrap_err();

    assert!(matches!(err, BindError::NamespaceMoveFailed { .. }));
    assert_eq!(h.links.events(), vec!["lookup veth42".to_string()]);
}

#[test]
fn test_move_failure_aborts() {
    let links = FakeLinks {
        fail_move: true,
        ..Default::default()
    };
    let h = Harness::new(running(), links);

    let err = h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap_err();

    assert!(matches!(err, BindError::NamespaceMoveFailed { pid: PID, .. }));
    assert_eq!(h.links.events().len(), 2);
}

#[test]
fn test_missing_subnet_length() {
    let h = Harness::new(running(), FakeLinks::default());
    let ctx = ContainerEndpointContext::new("web", "veth42")
        .with_address("11.2.1.5".parse().unwrap(), 0);

    let err = h.binder.bind(&ctx).unwrap_err();

    assert!(matches!(err, BindError::MissingSubnetLength(_)));
    assert_eq!(err.phase(), BindPhase::Addressing);
    assert!(!h.links.events().iter().any(|e| e.starts_with("addr")));
}

#[test]
fn test_address_assignment_failure() {
    let h = Harness::new(running(), FakeLinks::failing_at(AddressStep::AssignAddress));

    let err = h.binder.bind(&addressed_ctx()).unwrap_err();

    assert!(matches!(
        err,
        BindError::AddressConfigurationFailed {
            step: AddressStep::AssignAddress,
            ..
        }
    ));
    assert!(!h.links.events().iter().any(|e| e.starts_with("up")));
}

#[test]
fn test_link_up_failure() {
    let h = Harness::new(running(), FakeLinks::failing_at(AddressStep::LinkUp));

    let err = h.lifecycle().attach_endpoint(&addressed_ctx()).unwrap_err();

    assert!(matches!(
        err,
        BindError::AddressConfigurationFailed {
            step: AddressStep::LinkUp,
            ..
        }
    ));
    // No rollback: the alias from the failed bind is left behind
    assert!(fs::symlink_metadata(h.alias()).is_ok());
}

#[test]
fn test_detach_is_noop() {
    let h = Harness::new(running(), FakeLinks::default());

    h.lifecycle().detach_endpoint(&addressed_ctx()).unwrap();

    assert!(h.inspector.calls().is_empty());
    assert!(h.links.events().is_empty());
    assert!(!h.netns_dir().exists());
}
