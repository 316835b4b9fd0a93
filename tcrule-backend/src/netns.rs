//! Network namespace utilities using native Linux syscalls.
//!
//! Interface enumeration for a named namespace runs on a dedicated thread
//! that switches into the namespace with `setns`, so the async runtime's
//! worker threads never change namespace. `tc` invocations do not need this:
//! they are wrapped in `ip netns exec` by the context instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use tcrule_backend::netns::{list_interfaces, NamespacePath};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let names = list_interfaces(NamespacePath::Named("lab".to_string())).await?;
//! println!("{:?}", names);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during namespace operations.
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// Failed to open namespace file
    #[error("Failed to open namespace file {path}: {source}")]
    OpenNamespace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to enter namespace via setns
    #[error("Failed to enter namespace {path}: {source}")]
    EnterNamespace {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// Named namespace not found
    #[error("Network namespace '{0}' not found in /var/run/netns/")]
    NamedNamespaceNotFound(String),

    /// Operation failed inside namespace
    #[error("Operation failed inside namespace: {0}")]
    OperationFailed(String),
}

/// Specifies how to locate a network namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespacePath {
    /// The namespace of the calling process (no switch needed)
    Default,

    /// A named namespace as created by `ip netns add` (found in /var/run/netns/)
    Named(String),
}

impl NamespacePath {
    pub fn from_option(name: Option<&str>) -> Self {
        match name {
            Some(name) => NamespacePath::Named(name.to_string()),
            None => NamespacePath::Default,
        }
    }

    /// Resolves the namespace to a file path. `None` for the default namespace.
    pub fn resolve(&self) -> Result<Option<PathBuf>, NamespaceError> {
        match self {
            NamespacePath::Default => Ok(None),
            NamespacePath::Named(name) => {
                let path = PathBuf::from(format!("/var/run/netns/{}", name));
                if path.exists() {
                    Ok(Some(path))
                } else {
                    Err(NamespaceError::NamedNamespaceNotFound(name.clone()))
                }
            }
        }
    }
}

/// Runs a synchronous closure in a specified network namespace.
///
/// A fresh thread is spawned for named namespaces and dropped afterwards,
/// so a failed switch back can never leak into a pooled thread.
#[instrument(skip(f), fields(namespace = ?namespace))]
pub async fn run_in_namespace<F, T>(namespace: NamespacePath, f: F) -> Result<T, NamespaceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let Some(ns_path) = namespace.resolve()? else {
        debug!("Running in default namespace, no switch needed");
        return tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| NamespaceError::OperationFailed(e.to_string()));
    };

    debug!("Switching to namespace: {:?}", ns_path);

    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let result = run_in_namespace_sync(&ns_path, f);
        let _ = tx.send(result);
    });

    rx.await
        .map_err(|_| NamespaceError::OperationFailed("namespace thread panicked".to_string()))?
}

/// Synchronous namespace switch on the current thread. Only call this from
/// a dedicated thread.
#[instrument(skip(f), fields(ns_path = %ns_path.display()))]
pub fn run_in_namespace_sync<F, T>(ns_path: &Path, f: F) -> Result<T, NamespaceError>
where
    F: FnOnce() -> T,
{
    let current_ns =
        File::open("/proc/self/ns/net").map_err(|e| NamespaceError::OpenNamespace {
            path: PathBuf::from("/proc/self/ns/net"),
            source: e,
        })?;

    let target_ns = File::open(ns_path).map_err(|e| NamespaceError::OpenNamespace {
        path: ns_path.to_path_buf(),
        source: e,
    })?;

    setns(target_ns.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
        NamespaceError::EnterNamespace {
            path: ns_path.to_path_buf(),
            source: e,
        }
    })?;

    debug!("Entered namespace {:?}", ns_path);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    if let Err(e) = setns(current_ns.as_fd(), CloneFlags::CLONE_NEWNET) {
        warn!(
            "Failed to return to original namespace: {}. Thread may be in wrong namespace!",
            e
        );
    } else {
        debug!("Returned to original namespace");
    }

    match result {
        Ok(value) => Ok(value),
        Err(panic_payload) => std::panic::resume_unwind(panic_payload),
    }
}

/// Lists every network device name in a namespace, loopback included.
#[instrument(skip_all, fields(namespace = ?namespace))]
pub async fn list_interfaces(namespace: NamespacePath) -> Result<Vec<String>, NamespaceError> {
    run_in_namespace(namespace, || {
        nix::net::if_::if_nameindex()
            .map(|interfaces| {
                interfaces
                    .iter()
                    .map(|iface| iface.name().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
            })
            .map_err(|e| e.to_string())
    })
    .await?
    .map_err(NamespaceError::OperationFailed)
}
