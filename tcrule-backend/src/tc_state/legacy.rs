//! Plain-text `tc qdisc show` / `tc filter show` parsing for iproute2
//! releases without `-j`.
//!
//! Both grammars are positional. Anything that does not fit is skipped
//! rather than reported, so a partially understood line still yields
//! whatever fields were recognised.

use std::sync::LazyLock;

use regex::Regex;
use tcrule_shared::{
    Filter, FilterMatch, NetemCorrupt, NetemDelay, NetemLossRandom, NetemRate, Qdisc, QdiscOptions,
};
use tracing::trace;

/// `match 0a000005/ffffffff at 16`
static MATCH_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*match\s+([0-9a-fA-F]+)/([0-9a-fA-F]*)\s+at\s+(\d+)").ok()
});

/// First token index after `qdisc KIND HANDLE dev NAME root|parent ...`
/// at which option pairs may appear for a child qdisc.
const CHILD_OPTIONS_START: usize = 7;

/// Parse every `qdisc ...` line. Other lines are ignored.
pub fn parse_qdiscs(text: &str) -> Vec<Qdisc> {
    text.lines().filter_map(parse_qdisc_line).collect()
}

fn parse_qdisc_line(line: &str) -> Option<Qdisc> {
    let items: Vec<&str> = line.split_whitespace().collect();
    if items.len() < 2 || items[0] != "qdisc" {
        return None;
    }

    let mut qdisc = Qdisc {
        kind: Some(items[1].to_string()),
        handle: items.get(2).map(|h| h.to_string()),
        ..Default::default()
    };

    if items.get(3) != Some(&"dev") {
        return Some(qdisc);
    }
    let Some(dev) = items.get(4) else {
        return Some(qdisc);
    };
    qdisc.dev = Some(dev.to_string());

    match items.get(5) {
        Some(&"root") => {
            qdisc.root = Some(true);
            parse_root_options(&mut qdisc, &items[6..]);
        }
        Some(&"parent") => {
            let Some(parent) = items.get(6) else {
                return Some(qdisc);
            };
            qdisc.parent = Some(parent.to_string());
            if items.len() > CHILD_OPTIONS_START {
                parse_netem_options(&mut qdisc, &items[CHILD_OPTIONS_START..]);
            }
        }
        _ => {}
    }

    Some(qdisc)
}

/// `refcnt N [bands N priomap P...]`, then whatever netem options a root
/// netem carries.
fn parse_root_options(qdisc: &mut Qdisc, tokens: &[&str]) {
    let mut rest = tokens;
    if let ["refcnt", count, tail @ ..] = rest {
        qdisc.refcnt = count.parse().ok();
        rest = tail;
    }
    if let ["bands", bands, tail @ ..] = rest {
        let options = qdisc.options.get_or_insert_with(QdiscOptions::default);
        options.bands = bands.parse().ok();
        rest = tail;
        if let ["priomap", tail @ ..] = rest {
            let priomap: Vec<u32> = tail.iter().map_while(|p| p.parse().ok()).collect();
            rest = &tail[priomap.len()..];
            options.priomap = Some(priomap);
        }
    }
    if !rest.is_empty() {
        parse_netem_options(qdisc, rest);
    }
}

/// Scan adjacent (name, value) pairs. Unknown names advance one token so a
/// multi-token option (`delay 100ms 10ms`) does not shift the pairing.
fn parse_netem_options(qdisc: &mut Qdisc, tokens: &[&str]) {
    let options = qdisc.options.get_or_insert_with(QdiscOptions::default);
    let mut i = 0;
    while i + 1 < tokens.len() {
        let (name, value) = (tokens[i], tokens[i + 1]);
        let known = match name {
            "limit" => {
                options.limit = value.parse().ok();
                true
            }
            "loss" => {
                options.loss_random = parse_percent(value).map(|loss| NetemLossRandom {
                    loss,
                    correlation: 0.0,
                });
                true
            }
            "corrupt" => {
                options.corrupt = parse_percent(value).map(|corrupt| NetemCorrupt {
                    corrupt,
                    correlation: 0.0,
                });
                true
            }
            "delay" => {
                options.delay = parse_delay_seconds(value).map(|delay| NetemDelay {
                    delay,
                    ..Default::default()
                });
                true
            }
            "rate" => {
                options.rate = parse_rate_bytes(value).map(|rate| NetemRate {
                    rate,
                    ..Default::default()
                });
                true
            }
            _ => false,
        };
        i += if known { 2 } else { 1 };
    }
}

/// `10%` -> 0.1
pub fn parse_percent(value: &str) -> Option<f64> {
    let percent: f64 = value.strip_suffix('%').unwrap_or(value).parse().ok()?;
    Some(percent / 100.0)
}

/// `400us`, `100ms`, `1s` -> seconds
pub fn parse_delay_seconds(value: &str) -> Option<f64> {
    let (number, divisor) = if let Some(n) = value.strip_suffix("us") {
        (n, 1_000_000.0)
    } else if let Some(n) = value.strip_suffix("ms") {
        (n, 1_000.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1.0)
    } else {
        (value, 1.0)
    };
    let parsed: f64 = number.parse().ok()?;
    Some(parsed / divisor)
}

/// `1Mbit` -> 131072 bytes/sec. Units are binary.
pub fn parse_rate_bytes(value: &str) -> Option<u64> {
    const UNITS: [(&str, f64); 4] = [
        ("Gbit", (1u64 << 30) as f64 / 8.0),
        ("Mbit", (1u64 << 20) as f64 / 8.0),
        ("Kbit", (1u64 << 10) as f64 / 8.0),
        ("bit", 1.0 / 8.0),
    ];
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, m)| value.strip_suffix(suffix).map(|n| (n, *m)))
        .unwrap_or((value, 1.0));
    let parsed: f64 = number.parse().ok()?;
    let bytes = (parsed * multiplier).round();
    if bytes.is_finite() && bytes >= 0.0 {
        Some(bytes as u64)
    } else {
        None
    }
}

/// Parse `tc filter show dev <interface>` text. A line that does not start
/// with whitespace begins a new record; indented `match` lines belong to
/// the record above them.
pub fn parse_filters(interface: &str, text: &str) -> Vec<Filter> {
    let mut filters = Vec::new();
    let mut current: Option<Filter> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            if let Some(done) = current.take() {
                filters.push(done);
            }
            let mut filter = Filter::new(interface);
            parse_filter_header(&mut filter, line);
            current = Some(filter);
            continue;
        }
        let (Some(filter), Some(entry)) = (current.as_mut(), parse_match_line(line)) else {
            trace!("Skipping filter continuation line: {}", line.trim());
            continue;
        };
        filter.options_mut().matches.push(entry);
    }

    if let Some(done) = current {
        filters.push(done);
    }
    filters
}

/// `filter parent 1: protocol ip pref 3 u32 chain 0 fh 800::800 order 2048
/// key ht 800 bkt 0 flowid 1:4 not_in_hw`
fn parse_filter_header(filter: &mut Filter, line: &str) {
    let items: Vec<&str> = line.split_whitespace().collect();
    let mut rest: &[&str] = match items.as_slice() {
        ["filter", tail @ ..] => tail,
        _ => return,
    };

    while !rest.is_empty() {
        rest = match rest {
            ["parent", parent, tail @ ..] => {
                filter.parent = Some(parent.to_string());
                tail
            }
            ["protocol", protocol, tail @ ..] => {
                filter.protocol = Some(protocol.to_string());
                tail
            }
            ["pref", pref, kind, tail @ ..] => {
                filter.pref = pref.parse().ok();
                filter.kind = Some(kind.to_string());
                tail
            }
            ["pref", pref] => {
                filter.pref = pref.parse().ok();
                &[]
            }
            ["chain", chain, tail @ ..] => {
                filter.chain = chain.parse().ok();
                tail
            }
            ["fh", fh, tail @ ..] => {
                filter.options_mut().fh = Some(fh.to_string());
                tail
            }
            ["ht", "divisor", divisor, tail @ ..] => {
                filter.options_mut().ht_divisor = divisor.parse().ok();
                tail
            }
            ["order", order, tail @ ..] => {
                filter.options_mut().order = order.parse().ok();
                tail
            }
            ["key", "ht", key_ht, tail @ ..] => {
                filter.options_mut().key_ht = Some(key_ht.to_string());
                tail
            }
            ["bkt", bkt, tail @ ..] => {
                filter.options_mut().bkt = Some(bkt.to_string());
                tail
            }
            ["flowid", flowid, tail @ ..] => {
                filter.options_mut().flowid = Some(flowid.to_string());
                tail
            }
            ["not_in_hw", tail @ ..] => {
                filter.options_mut().not_in_hw = Some(true);
                tail
            }
            [_, tail @ ..] => tail,
            [] => &[],
        };
    }
}

fn parse_match_line(line: &str) -> Option<FilterMatch> {
    let regex = MATCH_LINE.as_ref()?;
    let caps = regex.captures(line)?;
    let off = caps.get(3)?.as_str().parse().ok()?;
    Some(FilterMatch::new(
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        off,
    ))
}
