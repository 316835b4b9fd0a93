//! Turns raw u32 key entries into [`MatchPredicates`].
//!
//! Offsets are bytes into the IPv4 header: 12 is the source address, 16 the
//! destination address, and 20 the first transport word (source port in the
//! upper half, destination port in the lower half). Other offsets carry no
//! predicate we model and are ignored. Malformed hex only drops the entry
//! it appears in.

use tcrule_shared::filter::{OFFSET_DST_IP, OFFSET_PORTS, OFFSET_SRC_IP};
use tcrule_shared::{Filter, FilterMatch, IpMatch, MatchPredicates};
use tracing::debug;

const HALF_MASK: u32 = 0xffff;

/// Decode every entry of a filter into its `predicates`, in place.
pub fn decode_filter(filter: &mut Filter) {
    if let Some(options) = filter.options.as_mut() {
        options.predicates = decode_matches(&options.matches);
    }
}

pub fn decode_matches(matches: &[FilterMatch]) -> MatchPredicates {
    let mut predicates = MatchPredicates::default();
    for entry in matches {
        let Some((value, mask)) = parse_key(entry) else {
            debug!(
                "Skipping malformed match {}/{} at {}",
                entry.value, entry.mask, entry.off
            );
            continue;
        };
        apply(&mut predicates, entry.off, value, mask);
    }
    predicates
}

fn apply(predicates: &mut MatchPredicates, off: u32, value: u32, mask: u32) {
    match off {
        OFFSET_SRC_IP => predicates.src_ip = Some(IpMatch::from_key(value, mask)),
        OFFSET_DST_IP => predicates.dst_ip = Some(IpMatch::from_key(value, mask)),
        OFFSET_PORTS => {
            if mask >> 16 == HALF_MASK {
                predicates.src_port = Some((value >> 16) as u16);
            }
            if mask & HALF_MASK == HALF_MASK {
                predicates.dst_port = Some((value & HALF_MASK) as u16);
            }
        }
        _ => {}
    }
}

/// Left-pad to 32 bits and parse. Anything longer than eight digits, or not
/// hex, is rejected.
fn parse_key(entry: &FilterMatch) -> Option<(u32, u32)> {
    Some((parse_word(&entry.value)?, parse_word(&entry.mask)?))
}

fn parse_word(hex: &str) -> Option<u32> {
    if hex.len() > 8 {
        return None;
    }
    let padded = format!("{:0>8}", hex);
    if !padded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(&padded, 16).ok()
}
