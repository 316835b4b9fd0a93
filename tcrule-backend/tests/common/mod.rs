//! In-memory stand-in for `tc` shared by the integration tests.
//!
//! `FakeTc` keeps a tiny model of the kernel (a priority root per device,
//! netem children, u32 classifiers) and answers exactly the invocations the
//! engine issues, printing state either as `tc -j` JSON (duplicate `"match"`
//! keys included) or as the legacy text grammar.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tcrule_backend::context::TcContext;
use tcrule_backend::interfaces::{InterfaceLister, ListFuture};
use tcrule_backend::rule_engine::RuleEngine;
use tcrule_backend::runner::{CommandOutput, CommandRunner, RunFuture};
use tcrule_shared::IpMatch;

const FIRST_NODE: u32 = 0x800;

/// How state is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// A modern iproute2: `-j` gives JSON.
    Json,
    /// An old iproute2 that accepts `-j` and prints text anyway.
    LegacyIgnoresJson,
    /// An old iproute2 that refuses `-j`.
    LegacyRejectsJson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeNetem {
    pub handle: String,
    pub parent: String,
    pub delay_us: Option<u64>,
    pub rate_bytes: Option<u64>,
    pub loss_pct: Option<f64>,
    pub corrupt_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeMatch {
    pub value: u32,
    pub mask: u32,
    pub off: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeFilter {
    pub node: u32,
    pub pref: u32,
    pub flowid: String,
    pub matches: Vec<FakeMatch>,
}

impl FakeFilter {
    pub fn handle(&self) -> String {
        format!("800::{:x}", self.node)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeDevice {
    pub name: String,
    pub prio_bands: Option<u32>,
    pub children: Vec<FakeNetem>,
    pub filters: Vec<FakeFilter>,
    /// The u32 hash table survives its last classifier.
    pub u32_installed: bool,
    next_node: u32,
}

impl FakeDevice {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prio_bands: None,
            children: Vec::new(),
            filters: Vec::new(),
            u32_installed: false,
            next_node: FIRST_NODE,
        }
    }

    fn clear_root(&mut self) {
        self.prio_bands = None;
        self.children.clear();
        self.filters.clear();
        self.u32_installed = false;
        self.next_node = FIRST_NODE;
    }
}

pub struct FakeTc {
    mode: OutputMode,
    devices: Mutex<Vec<FakeDevice>>,
    failing: Mutex<Vec<String>>,
    pub executed_commands: Arc<Mutex<Vec<String>>>,
}

impl FakeTc {
    pub fn new(mode: OutputMode, interfaces: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            mode,
            devices: Mutex::new(interfaces.iter().map(|name| FakeDevice::new(name)).collect()),
            failing: Mutex::new(Vec::new()),
            executed_commands: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// `lo`, `eth0` and `eth1`.
    pub fn standard(mode: OutputMode) -> Arc<Self> {
        Self::new(mode, &["lo", "eth0", "eth1"])
    }

    pub fn engine(self: &Arc<Self>) -> RuleEngine {
        RuleEngine::new(self.context())
    }

    pub fn context(self: &Arc<Self>) -> TcContext {
        TcContext::new(self.clone(), self.clone())
    }

    /// Make every invocation whose tc arguments start with `prefix` exit 2.
    pub fn fail_on(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.executed_commands.lock().unwrap().clone()
    }

    /// Everything except listings.
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.contains(" show"))
            .collect()
    }

    pub fn clear_log(&self) {
        self.executed_commands.lock().unwrap().clear();
    }

    pub fn device(&self, name: &str) -> FakeDevice {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no fake device {name}"))
    }

    /// Install state directly, bypassing the engine.
    pub fn install_root(&self, dev: &str, bands: u32) {
        self.with_device(dev, |d| d.prio_bands = Some(bands));
    }

    pub fn install_netem(&self, dev: &str, netem: FakeNetem) {
        self.with_device(dev, |d| d.children.push(netem));
    }

    /// Change the delay of the netem under `parent`, as another tool would.
    pub fn set_netem_delay_us(&self, dev: &str, parent: &str, delay_us: u64) {
        self.with_device(dev, |d| {
            let netem = d
                .children
                .iter_mut()
                .find(|c| c.parent == parent)
                .unwrap_or_else(|| panic!("no netem under {parent} on {dev}"));
            netem.delay_us = Some(delay_us);
        });
    }

    fn with_device(&self, dev: &str, f: impl FnOnce(&mut FakeDevice)) {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.name == dev)
            .unwrap_or_else(|| panic!("no fake device {dev}"));
        f(device);
    }

    fn execute(&self, args: &[String]) -> CommandOutput {
        let joined = args.join(" ");
        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| joined.starts_with(prefix.as_str()))
        {
            return CommandOutput::failed(2, "RTNETLINK answers: Operation not permitted");
        }

        let mut words: Vec<&str> = args.iter().map(String::as_str).collect();
        let json_flag = words.first() == Some(&"-j");
        if json_flag {
            words.remove(0);
            if self.mode == OutputMode::LegacyRejectsJson {
                return CommandOutput::failed(255, "Option \"-j\" is unknown, try \"tc -help\".");
            }
        }
        let structured = json_flag && self.mode == OutputMode::Json;

        let mut devices = self.devices.lock().unwrap();
        match words.as_slice() {
            ["qdisc", "show"] => CommandOutput::ok(render_qdiscs(&devices, structured)),
            ["filter", "show", "dev", dev] => match find(&mut devices, dev) {
                Some(device) => CommandOutput::ok(render_filters(device, structured)),
                None => no_device(dev),
            },
            [
                "qdisc", "replace", "dev", dev, "root", "handle", "1:", "prio", "bands", bands,
                "priomap", ..,
            ] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                device.prio_bands = bands.parse().ok();
                CommandOutput::ok("")
            }
            [
                "qdisc", "replace", "dev", dev, "parent", parent, "handle", handle, "netem",
                options @ ..,
            ] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                replace_netem(device, parent, handle, options)
            }
            ["qdisc", "del", "dev", dev, "parent", parent, "handle", handle] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                let before = device.children.len();
                device
                    .children
                    .retain(|c| !(c.parent == *parent && c.handle == *handle));
                if device.children.len() == before {
                    return CommandOutput::failed(2, "Error: Invalid handle.");
                }
                CommandOutput::ok("")
            }
            ["qdisc", "del", "dev", dev, "root"] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                if device.prio_bands.is_none() {
                    return CommandOutput::failed(
                        2,
                        "Error: Cannot delete qdisc with handle of zero.",
                    );
                }
                device.clear_root();
                CommandOutput::ok("")
            }
            [
                "filter", "add", "dev", dev, "protocol", "ip", "parent", _, "prio", pref, "u32",
                rest @ ..,
            ] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                add_filter(device, pref, rest)
            }
            [
                "filter", "replace", "dev", dev, "protocol", "ip", "parent", _, "prio", _, "handle",
                handle, "u32", "flowid", flowid,
            ] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                match device.filters.iter_mut().find(|f| f.handle() == *handle) {
                    Some(filter) => {
                        filter.flowid = flowid.to_string();
                        CommandOutput::ok("")
                    }
                    None => filter_not_found(),
                }
            }
            [
                "filter", "del", "dev", dev, "protocol", "ip", "parent", _, "prio", _, "handle",
                handle, "u32",
            ] => {
                let Some(device) = find(&mut devices, dev) else {
                    return no_device(dev);
                };
                let before = device.filters.len();
                device.filters.retain(|f| f.handle() != *handle);
                if device.filters.len() == before {
                    return filter_not_found();
                }
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, "Command line is not complete. Try option \"help\""),
        }
    }
}

impl CommandRunner for FakeTc {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a> {
        Box::pin(async move {
            self.executed_commands
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            // ip netns exec <ns> <tc> ...
            let tc_args = match (program, args) {
                ("ip", [netns, exec, _, _, rest @ ..]) if netns == "netns" && exec == "exec" => {
                    rest
                }
                _ => args,
            };
            Ok(self.execute(tc_args))
        })
    }
}

impl InterfaceLister for FakeTc {
    fn list(&self) -> ListFuture<'_> {
        Box::pin(async move {
            Ok(self
                .devices
                .lock()
                .unwrap()
                .iter()
                .map(|d| d.name.clone())
                .collect())
        })
    }
}

fn find<'a>(devices: &'a mut [FakeDevice], dev: &str) -> Option<&'a mut FakeDevice> {
    devices.iter_mut().find(|d| d.name == dev)
}

fn no_device(dev: &str) -> CommandOutput {
    CommandOutput::failed(1, format!("Cannot find device \"{}\"", dev))
}

fn filter_not_found() -> CommandOutput {
    CommandOutput::failed(2, "Error: Filter with specified priority/protocol not found.")
}

fn replace_netem(
    device: &mut FakeDevice,
    parent: &str,
    handle: &str,
    options: &[&str],
) -> CommandOutput {
    let Some(bands) = device.prio_bands else {
        return CommandOutput::failed(2, "Error: Failed to find specified qdisc.");
    };
    let minor = parent
        .strip_prefix("1:")
        .and_then(|m| u32::from_str_radix(m, 16).ok());
    if !matches!(minor, Some(m) if m >= 1 && m <= bands) {
        return CommandOutput::failed(2, "Error: Specified class not found.");
    }

    let mut netem = FakeNetem {
        handle: handle.to_string(),
        parent: parent.to_string(),
        delay_us: None,
        rate_bytes: None,
        loss_pct: None,
        corrupt_pct: None,
    };
    let mut rest = options;
    while !rest.is_empty() {
        rest = match rest {
            ["delay", value, tail @ ..] => {
                netem.delay_us = value
                    .strip_suffix("ms")
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|ms| ms * 1000);
                tail
            }
            ["rate", value, tail @ ..] => {
                netem.rate_bytes = value.strip_suffix("bps").and_then(|v| v.parse().ok());
                tail
            }
            ["loss", value, tail @ ..] => {
                netem.loss_pct = value.strip_suffix('%').and_then(|v| v.parse().ok());
                tail
            }
            _ => return CommandOutput::failed(1, format!("Illegal \"{}\"", rest.join(" "))),
        };
    }

    match device.children.iter_mut().find(|c| c.parent == parent) {
        Some(existing) => *existing = netem,
        None => device.children.push(netem),
    }
    CommandOutput::ok("")
}

fn add_filter(device: &mut FakeDevice, pref: &str, rest: &[&str]) -> CommandOutput {
    if device.prio_bands.is_none() {
        return CommandOutput::failed(2, "Error: Parent Qdisc doesn't exists.");
    }
    let mut matches = Vec::new();
    let mut flowid = None;
    let mut rest = rest;
    while !rest.is_empty() {
        rest = match rest {
            ["match", "ip", dir @ ("src" | "dst"), addr, tail @ ..] => {
                let Ok(ip) = addr.parse::<IpMatch>() else {
                    return CommandOutput::failed(1, format!("Illegal \"match\" {}", addr));
                };
                let (value, mask) = ip.to_key();
                let off = if *dir == "src" { 12 } else { 16 };
                matches.push(FakeMatch { value, mask, off });
                tail
            }
            ["match", "ip", dir @ ("sport" | "dport"), port, "0xffff", tail @ ..] => {
                let Ok(port) = port.parse::<u32>() else {
                    return CommandOutput::failed(1, format!("Illegal \"match\" {}", port));
                };
                let entry = if *dir == "sport" {
                    FakeMatch {
                        value: port << 16,
                        mask: 0xffff_0000,
                        off: 20,
                    }
                } else {
                    FakeMatch {
                        value: port,
                        mask: 0x0000_ffff,
                        off: 20,
                    }
                };
                matches.push(entry);
                tail
            }
            ["match", "u32", "0", "0", tail @ ..] => {
                matches.push(FakeMatch {
                    value: 0,
                    mask: 0,
                    off: 0,
                });
                tail
            }
            ["flowid", id, tail @ ..] => {
                flowid = Some(id.to_string());
                tail
            }
            _ => return CommandOutput::failed(1, format!("Illegal \"{}\"", rest.join(" "))),
        };
    }
    let Some(flowid) = flowid else {
        return CommandOutput::failed(1, "flowid is required");
    };

    device.filters.push(FakeFilter {
        node: device.next_node,
        pref: pref.parse().unwrap_or(3),
        flowid,
        matches,
    });
    device.next_node += 1;
    device.u32_installed = true;
    CommandOutput::ok("")
}

fn render_qdiscs(devices: &[FakeDevice], structured: bool) -> String {
    if structured {
        let mut entries = Vec::new();
        for device in devices {
            match device.prio_bands {
                Some(bands) => {
                    entries.push(json!({
                        "kind": "prio", "handle": "1:", "dev": device.name, "root": true,
                        "refcnt": 2,
                        "options": {"bands": bands, "priomap": vec![2; 16], "multiqueue": false}
                    }));
                    for child in &device.children {
                        entries.push(json!({
                            "kind": "netem", "handle": child.handle, "dev": device.name,
                            "parent": child.parent, "options": netem_json(child)
                        }));
                    }
                }
                None => entries.push(json!({
                    "kind": default_kind(&device.name), "handle": "0:", "dev": device.name,
                    "root": true, "refcnt": 2, "options": {}
                })),
            }
        }
        return Value::Array(entries).to_string();
    }

    let mut text = String::new();
    for device in devices {
        match device.prio_bands {
            Some(bands) => {
                text.push_str(&format!(
                    "qdisc prio 1: dev {} root refcnt 2 bands {} priomap 2 2 2 2 2 2 2 2 2 2 2 2 2 2 2 2\n",
                    device.name, bands
                ));
                for child in &device.children {
                    text.push_str(&format!(
                        "qdisc netem {} dev {} parent {} limit 1000{}\n",
                        child.handle,
                        device.name,
                        child.parent,
                        netem_text(child)
                    ));
                }
            }
            None => text.push_str(&format!(
                "qdisc {} 0: dev {} root refcnt 2\n",
                default_kind(&device.name),
                device.name
            )),
        }
    }
    text
}

fn default_kind(dev: &str) -> &'static str {
    if dev == "lo" { "noqueue" } else { "fq_codel" }
}

fn netem_json(netem: &FakeNetem) -> Value {
    let mut options = Map::new();
    options.insert("limit".to_string(), json!(1000));
    if let Some(us) = netem.delay_us {
        options.insert(
            "delay".to_string(),
            json!({"delay": us as f64 / 1_000_000.0, "jitter": 0, "correlation": 0}),
        );
    }
    if let Some(pct) = netem.loss_pct {
        options.insert(
            "loss-random".to_string(),
            json!({"loss": pct / 100.0, "correlation": 0}),
        );
    }
    if let Some(pct) = netem.corrupt_pct {
        options.insert(
            "corrupt".to_string(),
            json!({"corrupt": pct / 100.0, "correlation": 0}),
        );
    }
    if let Some(rate) = netem.rate_bytes {
        options.insert(
            "rate".to_string(),
            json!({"rate": rate, "packetoverhead": 0, "cellsize": 0, "celloverhead": 0}),
        );
    }
    options.insert("ecn".to_string(), json!(false));
    options.insert("gap".to_string(), json!(0));
    Value::Object(options)
}

fn netem_text(netem: &FakeNetem) -> String {
    let mut text = String::new();
    if let Some(us) = netem.delay_us {
        text.push_str(&format!(" delay {}", format_delay(us)));
    }
    if let Some(pct) = netem.loss_pct {
        text.push_str(&format!(" loss {}%", pct));
    }
    if let Some(pct) = netem.corrupt_pct {
        text.push_str(&format!(" corrupt {}%", pct));
    }
    if let Some(rate) = netem.rate_bytes {
        text.push_str(&format!(" rate {}", format_rate(rate)));
    }
    text
}

/// tc prints microseconds below one millisecond and seconds from one second.
pub fn format_delay(us: u64) -> String {
    if us >= 1_000_000 {
        format!("{}s", us as f64 / 1_000_000.0)
    } else if us >= 1000 {
        format!("{}ms", us as f64 / 1000.0)
    } else {
        format!("{}us", us)
    }
}

/// Largest binary bit unit that divides the rate exactly.
pub fn format_rate(bytes: u64) -> String {
    let bits = bytes * 8;
    for (unit, size) in [("Gbit", 1u64 << 30), ("Mbit", 1 << 20), ("Kbit", 1 << 10)] {
        if bits >= size && bits % size == 0 {
            return format!("{}{}", bits / size, unit);
        }
    }
    format!("{}bit", bits)
}

fn render_filters(device: &FakeDevice, structured: bool) -> String {
    if !device.u32_installed {
        return if structured { "[]".to_string() } else { String::new() };
    }

    if structured {
        let base = r#""parent":"1:","protocol":"ip","pref":3,"kind":"u32","chain":0"#;
        let mut records = vec![
            format!("{{{}}}", base),
            format!(r#"{{{},"options":{{"fh":"800:","ht_divisor":1}}}}"#, base),
        ];
        for filter in &device.filters {
            // one "match" key per entry, repeated, as iproute2 prints them
            let matches: String = filter
                .matches
                .iter()
                .map(|m| {
                    format!(
                        r#","match":{{"value":"{:x}","mask":"{:x}","offmask":"","off":{}}}"#,
                        m.value, m.mask, m.off
                    )
                })
                .collect();
            records.push(format!(
                r#"{{"parent":"1:","protocol":"ip","pref":{},"kind":"u32","chain":0,"options":{{"fh":"{}","order":{},"key_ht":"800","bkt":"0","flowid":"{}","not_in_hw":true{}}}}}"#,
                filter.pref,
                filter.handle(),
                filter.node,
                filter.flowid,
                matches
            ));
        }
        return format!("[{}]", records.join(","));
    }

    let mut text = String::from(
        "filter parent 1: protocol ip pref 3 u32 chain 0 \n\
         filter parent 1: protocol ip pref 3 u32 chain 0 fh 800: ht divisor 1 \n",
    );
    for filter in &device.filters {
        text.push_str(&format!(
            "filter parent 1: protocol ip pref {} u32 chain 0 fh {} order {} key ht 800 bkt 0 flowid {} not_in_hw \n",
            filter.pref,
            filter.handle(),
            filter.node,
            filter.flowid
        ));
        for m in &filter.matches {
            text.push_str(&format!("  match {:08x}/{:08x} at {}\n", m.value, m.mask, m.off));
        }
    }
    text
}
