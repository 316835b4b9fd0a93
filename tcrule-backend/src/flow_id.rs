//! Flow-id allocation.
//!
//! A flow id names a band of the root priority qdisc, `1:<minor>`, with the
//! minor written in hex the way `tc` prints class ids. Minors 1-3 are the
//! bands unclassified traffic lands in, so allocation starts at 4. The
//! shaping qdisc under flow `1:<n>` gets handle `<n>0:`.

use tcrule_shared::Rule;
use tcrule_shared::errors::{BackendResult, TcruleError};

use crate::commands::builder::ROOT_BANDS;

pub const FLOW_MAJOR: &str = "1";
pub const FIRST_MINOR: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowAllocation {
    pub flow_id: String,
    pub qdisc_handle: String,
}

impl FlowAllocation {
    pub fn for_minor(minor: u32) -> Self {
        Self {
            flow_id: format!("{}:{:x}", FLOW_MAJOR, minor),
            qdisc_handle: format!("{:x}0:", minor),
        }
    }
}

/// `1:a` -> 10. Anything not shaped `<major>:<minor>` is ignored.
pub fn parse_minor(flow_id: &str) -> Option<u32> {
    let (major, minor) = flow_id.split_once(':')?;
    if major.is_empty() || minor.is_empty() || minor.contains(':') {
        return None;
    }
    u32::from_str_radix(minor, 16).ok()
}

/// One past the highest minor any known rule uses, never below 4.
pub fn next_minor(rules: &[Rule]) -> u32 {
    rules
        .iter()
        .filter_map(|r| r.flow_id.as_deref().and_then(parse_minor))
        .map(|minor| minor.saturating_add(1))
        .fold(FIRST_MINOR, u32::max)
}

/// Allocate a fresh flow on `interface`. Fails once the minor would fall
/// outside the root's bands.
pub fn allocate(rules: &[Rule], interface: &str) -> BackendResult<FlowAllocation> {
    let minor = next_minor(rules);
    let allocation = FlowAllocation::for_minor(minor);
    if minor > ROOT_BANDS {
        return Err(TcruleError::FlowIdsExhausted {
            interface: interface.to_string(),
            flow_id: allocation.flow_id,
            bands: ROOT_BANDS,
        });
    }
    Ok(allocation)
}
