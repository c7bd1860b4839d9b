//! Namespace alias directory.
//!
//! In-namespace commands enter a network namespace through a path under the
//! alias directory rather than through the process directly. An alias is a
//! symlink `<dir>/<pid>` pointing at `<proc>/<pid>/ns/net`. Aliases are
//! transient: created just before addressing and removed right after.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Default alias directory, shared with iproute2's named namespaces.
pub const DEFAULT_NETNS_DIR: &str = "/var/run/netns";

/// Default procfs mount.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Storage for namespace aliases keyed by process id.
pub trait NamespaceAliasStore: Send + Sync {
    /// Create the alias directory if missing. Existing directory is fine.
    fn ensure_directory(&self) -> io::Result<()>;

    /// Create the alias for `pid`, returning its path.
    fn create(&self, pid: u32) -> io::Result<PathBuf>;

    /// Remove the alias for `pid`. A missing alias is fine.
    fn remove(&self, pid: u32) -> io::Result<()>;

    /// Path the alias for `pid` lives at.
    fn alias_path(&self, pid: u32) -> PathBuf;
}

/// Symlink-based alias store on the host filesystem.
#[derive(Debug, Clone)]
pub struct FsAliasStore {
    /// Directory holding the aliases.
    dir: PathBuf,

    /// procfs root the aliases point into.
    proc_root: PathBuf,
}

impl FsAliasStore {
    /// Create a store over `dir`, pointing aliases into `proc_root`.
    pub fn new(dir: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            proc_root: proc_root.into(),
        }
    }

    /// Alias directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Kernel namespace path for a process.
    pub fn namespace_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("ns").join("net")
    }
}

impl Default for FsAliasStore {
    fn default() -> Self {
        Self::new(DEFAULT_NETNS_DIR, DEFAULT_PROC_ROOT)
    }
}

impl NamespaceAliasStore for FsAliasStore {
    fn ensure_directory(&self) -> io::Result<()> {
        match fs::create_dir(&self.dir) {
            Ok(()) => {
                set_private(&self.dir)?;
                debug!(dir = %self.dir.display(), "Created namespace alias directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn create(&self, pid: u32) -> io::Result<PathBuf> {
        let alias = self.alias_path(pid);
        let target = self.namespace_path(pid);
        std::os::unix::fs::symlink(&target, &alias)?;
        debug!(
            alias = %alias.display(),
            target = %target.display(),
            "Created namespace alias"
        );
        Ok(alias)
    }

    fn remove(&self, pid: u32) -> io::Result<()> {
        let alias = self.alias_path(pid);
        match fs::remove_file(&alias) {
            Ok(()) => {
                debug!(alias = %alias.display(), "Removed namespace alias");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn alias_path(&self, pid: u32) -> PathBuf {
        self.dir.join(pid.to_string())
    }
}

fn set_private(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}
