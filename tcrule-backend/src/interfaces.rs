//! Interface Management Module
//!
//! Enumerates network devices for the engine. The full list is used to
//! validate an explicit interface argument; iteration skips loopback.

use std::future::Future;
use std::pin::Pin;

use tcrule_shared::LOOPBACK;
use tcrule_shared::errors::{BackendResult, TcruleError};

use crate::netns::{self, NamespacePath};

pub type ListFuture<'a> = Pin<Box<dyn Future<Output = BackendResult<Vec<String>>> + Send + 'a>>;

/// Source of device names, loopback included.
pub trait InterfaceLister: Send + Sync {
    fn list(&self) -> ListFuture<'_>;
}

/// Lists devices through `if_nameindex(3)`, optionally inside a named namespace.
#[derive(Debug, Clone)]
pub struct SystemInterfaceLister {
    namespace: NamespacePath,
}

impl SystemInterfaceLister {
    pub fn new(namespace: NamespacePath) -> Self {
        Self { namespace }
    }
}

impl Default for SystemInterfaceLister {
    fn default() -> Self {
        Self::new(NamespacePath::Default)
    }
}

impl InterfaceLister for SystemInterfaceLister {
    fn list(&self) -> ListFuture<'_> {
        Box::pin(async move {
            netns::list_interfaces(self.namespace.clone())
                .await
                .map_err(|e| TcruleError::InterfaceDiscovery {
                    message: e.to_string(),
                })
        })
    }
}

/// Drop loopback, keeping the original order.
pub fn without_loopback(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| name.as_str() != LOOPBACK)
        .cloned()
        .collect()
}
