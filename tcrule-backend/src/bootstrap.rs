//! Root Qdisc Bootstrapper.
//!
//! Every managed device needs the 16-band priority root before a shaping
//! qdisc can hang off one of its bands. Installing it is idempotent: a
//! device that already has it is left alone, anything else at the root is
//! replaced.

use tcrule_shared::Qdisc;
use tcrule_shared::errors::BackendResult;
use tracing::{info, instrument};

use crate::commands::TcCommand;
use crate::commands::builder::{ROOT_BANDS, ROOT_HANDLE};
use crate::context::TcContext;

/// Whether `interface` already carries the bootstrap root.
pub fn has_root(qdiscs: &[Qdisc], interface: &str) -> bool {
    qdiscs.iter().any(|q| {
        q.is_on(interface)
            && q.is_priority()
            && q.is_root()
            && q.handle.as_deref() == Some(ROOT_HANDLE)
            && q.bands() == Some(ROOT_BANDS)
    })
}

/// Install the root on every listed device that lacks it. Returns the
/// devices that were touched.
#[instrument(skip(ctx, qdiscs), fields(namespace = ?ctx.namespace()))]
pub async fn ensure_roots(
    ctx: &TcContext,
    qdiscs: &[Qdisc],
    interfaces: &[String],
) -> BackendResult<Vec<String>> {
    let mut installed = Vec::new();
    for interface in interfaces {
        if has_root(qdiscs, interface) {
            continue;
        }
        ctx.run(&TcCommand::bootstrap_root(interface)?).await?;
        info!("Installed {}-band priority root on {}", ROOT_BANDS, interface);
        installed.push(interface.clone());
    }
    Ok(installed)
}
