//! `tc -j` output decoding.

use tcrule_shared::{Filter, Qdisc};

/// Empty output is an empty list; some iproute2 builds print nothing
/// instead of `[]` when a device has no filters.
pub fn parse_qdiscs(text: &str) -> Result<Vec<Qdisc>, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text)
}

pub fn parse_filters(interface: &str, text: &str) -> Result<Vec<Filter>, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut filters: Vec<Filter> = serde_json::from_str(text)?;
    for filter in &mut filters {
        filter.interface = interface.to_string();
    }
    Ok(filters)
}
