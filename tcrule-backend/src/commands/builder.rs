//! Builder for the `tc` argument lists the engine issues.
//!
//! A [`TcCommand`] is only an argument vector plus enough structure to log
//! it; where and how it runs (binary path, namespace wrapping) is the
//! context's business.

use std::fmt;

use tcrule_shared::errors::TcValidationError;
use tcrule_shared::{LossPct, MatchPredicates, ShapingProfile};

/// Protocol every classifier is installed for.
pub const FILTER_PROTOCOL: &str = "ip";
/// Parent and preference for new classifiers.
pub const DEFAULT_FILTER_PARENT: &str = "1:0";
pub const DEFAULT_FILTER_PREF: u32 = 3;
/// Handle of the bootstrap priority root.
pub const ROOT_HANDLE: &str = "1:";
pub const ROOT_BANDS: u32 = 16;
/// Band every priority maps to; bands 1-3 stay reserved for unclassified traffic.
pub const ROOT_PRIOMAP_BAND: u32 = 2;

/// Object a `tc` command operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcObject {
    Qdisc,
    Filter,
}

impl fmt::Display for TcObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcObject::Qdisc => write!(f, "qdisc"),
            TcObject::Filter => write!(f, "filter"),
        }
    }
}

/// TC command operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcOperation {
    Add,
    Replace,
    Delete,
    Show,
}

impl fmt::Display for TcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcOperation::Add => write!(f, "add"),
            TcOperation::Replace => write!(f, "replace"),
            TcOperation::Delete => write!(f, "del"),
            TcOperation::Show => write!(f, "show"),
        }
    }
}

/// Attachment point of a qdisc or filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcTarget {
    Root,
    Parent(String),
}

impl TcTarget {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            TcTarget::Root => args.push("root".to_string()),
            TcTarget::Parent(parent) => {
                args.push("parent".to_string());
                args.push(parent.clone());
            }
        }
    }
}

impl fmt::Display for TcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcTarget::Root => write!(f, "root"),
            TcTarget::Parent(parent) => write!(f, "parent {}", parent),
        }
    }
}

/// netem options; absent fields are left out of the command entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetemParams {
    pub delay_ms: Option<u64>,
    pub rate_bytes: Option<u64>,
    pub loss: Option<LossPct>,
}

impl From<&ShapingProfile> for NetemParams {
    fn from(profile: &ShapingProfile) -> Self {
        Self {
            delay_ms: profile.latency_ms,
            rate_bytes: profile.rate_bytes,
            loss: profile.packet_loss_pct,
        }
    }
}

/// Qdisc-specific parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QdiscParams {
    Prio { bands: u32, priomap: Vec<u32> },
    Netem(NetemParams),
}

impl QdiscParams {
    /// The bootstrap root: 16 bands, every priority mapped to band 2.
    pub fn bootstrap_prio() -> Self {
        QdiscParams::Prio {
            bands: ROOT_BANDS,
            priomap: vec![ROOT_PRIOMAP_BAND; 16],
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            QdiscParams::Prio { .. } => tcrule_shared::PRIORITY_KIND,
            QdiscParams::Netem(_) => tcrule_shared::SHAPING_KIND,
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.push(self.kind().to_string());
        match self {
            QdiscParams::Prio { bands, priomap } => {
                args.push("bands".to_string());
                args.push(bands.to_string());
                args.push("priomap".to_string());
                args.extend(priomap.iter().map(|b| b.to_string()));
            }
            QdiscParams::Netem(netem) => {
                if let Some(delay) = netem.delay_ms {
                    args.push("delay".to_string());
                    args.push(format!("{}ms", delay));
                }
                if let Some(rate) = netem.rate_bytes {
                    args.push("rate".to_string());
                    args.push(format!("{}bps", rate));
                }
                if let Some(loss) = netem.loss {
                    args.push("loss".to_string());
                    args.push(format!("{}%", loss));
                }
            }
        }
    }
}

/// Builder for a single `tc` invocation
#[derive(Debug, Clone, Default)]
pub struct TcCommandBuilder {
    object: Option<TcObject>,
    operation: Option<TcOperation>,
    device: Option<String>,
    json: bool,
    target: Option<TcTarget>,
    handle: Option<String>,
    pref: Option<u32>,
    params: Option<QdiscParams>,
    selectors: Option<MatchPredicates>,
    flow_id: Option<String>,
}

impl TcCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn qdisc(mut self, operation: TcOperation) -> Self {
        self.object = Some(TcObject::Qdisc);
        self.operation = Some(operation);
        self
    }

    pub fn filter(mut self, operation: TcOperation) -> Self {
        self.object = Some(TcObject::Filter);
        self.operation = Some(operation);
        self
    }

    pub fn device<S: Into<String>>(mut self, device: S) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Request structured output (`tc -j`)
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn target(mut self, target: TcTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn handle<S: Into<String>>(mut self, handle: S) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn pref(mut self, pref: u32) -> Self {
        self.pref = Some(pref);
        self
    }

    pub fn params(mut self, params: QdiscParams) -> Self {
        self.params = Some(params);
        self
    }

    /// u32 selectors for a new classifier
    pub fn selectors(mut self, predicates: &MatchPredicates) -> Self {
        self.selectors = Some(predicates.clone());
        self
    }

    pub fn flow_id<S: Into<String>>(mut self, flow_id: S) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// Build and validate the command
    pub fn build(self) -> Result<TcCommand, TcValidationError> {
        let object = self
            .object
            .ok_or_else(|| TcValidationError::new("object", "qdisc or filter must be chosen"))?;
        let operation = self
            .operation
            .ok_or_else(|| TcValidationError::new("operation", "operation must be specified"))?;

        if let Some(device) = &self.device
            && device.is_empty()
        {
            return Err(TcValidationError::new("device", "device cannot be empty"));
        }

        let mut args = Vec::new();
        if self.json {
            args.push("-j".to_string());
        }
        args.push(object.to_string());
        args.push(operation.to_string());

        match (object, operation) {
            (_, TcOperation::Show) => {
                if let Some(device) = &self.device {
                    args.push("dev".to_string());
                    args.push(device.clone());
                }
            }
            (TcObject::Qdisc, _) => {
                let device = self.require_device()?;
                args.push("dev".to_string());
                args.push(device.to_string());
                let target = self
                    .target
                    .as_ref()
                    .ok_or_else(|| TcValidationError::new("target", "qdisc needs root or parent"))?;
                target.push_args(&mut args);
                if let Some(handle) = &self.handle {
                    args.push("handle".to_string());
                    args.push(handle.clone());
                }
                if operation != TcOperation::Delete {
                    let params = self.params.as_ref().ok_or_else(|| {
                        TcValidationError::new("params", format!("qdisc {} needs a kind", operation))
                    })?;
                    params.push_args(&mut args);
                }
            }
            (TcObject::Filter, _) => {
                let device = self.require_device()?;
                args.push("dev".to_string());
                args.push(device.to_string());
                args.push("protocol".to_string());
                args.push(FILTER_PROTOCOL.to_string());
                let target = self
                    .target
                    .clone()
                    .unwrap_or_else(|| TcTarget::Parent(DEFAULT_FILTER_PARENT.to_string()));
                target.push_args(&mut args);
                args.push("prio".to_string());
                args.push(self.pref.unwrap_or(DEFAULT_FILTER_PREF).to_string());

                if operation != TcOperation::Add {
                    let handle = self.handle.as_ref().ok_or_else(|| {
                        TcValidationError::new("handle", format!("filter {} needs a handle", operation))
                    })?;
                    args.push("handle".to_string());
                    args.push(handle.clone());
                }
                args.push("u32".to_string());

                if operation == TcOperation::Add {
                    push_selectors(&mut args, self.selectors.as_ref());
                }
                if operation != TcOperation::Delete {
                    let flow_id = self.flow_id.as_ref().ok_or_else(|| {
                        TcValidationError::new("flow_id", format!("filter {} needs a flow id", operation))
                    })?;
                    args.push("flowid".to_string());
                    args.push(flow_id.clone());
                }
            }
        }

        Ok(TcCommand {
            object,
            operation,
            device: self.device,
            args,
        })
    }

    fn require_device(&self) -> Result<&str, TcValidationError> {
        self.device
            .as_deref()
            .ok_or_else(|| TcValidationError::new("device", "device interface must be specified"))
    }
}

/// An empty selector set still needs one key; `match u32 0 0` matches everything.
fn push_selectors(args: &mut Vec<String>, predicates: Option<&MatchPredicates>) {
    let mut push = |words: &[&str]| args.extend(words.iter().map(|w| w.to_string()));
    let Some(p) = predicates.filter(|p| !p.is_empty()) else {
        push(&["match", "u32", "0", "0"]);
        return;
    };
    if let Some(ip) = &p.src_ip {
        push(&["match", "ip", "src", &ip.to_string()]);
    }
    if let Some(ip) = &p.dst_ip {
        push(&["match", "ip", "dst", &ip.to_string()]);
    }
    if let Some(port) = p.src_port {
        push(&["match", "ip", "sport", &port.to_string(), "0xffff"]);
    }
    if let Some(port) = p.dst_port {
        push(&["match", "ip", "dport", &port.to_string(), "0xffff"]);
    }
}

/// Built and validated TC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcCommand {
    object: TcObject,
    operation: TcOperation,
    device: Option<String>,
    args: Vec<String>,
}

impl TcCommand {
    /// `tc [-j] qdisc show`
    pub fn show_qdiscs(json: bool) -> Result<Self, TcValidationError> {
        Self::show(TcCommandBuilder::new().qdisc(TcOperation::Show), json)
    }

    /// `tc [-j] filter show dev <device>`
    pub fn show_filters(device: &str, json: bool) -> Result<Self, TcValidationError> {
        Self::show(
            TcCommandBuilder::new().filter(TcOperation::Show).device(device),
            json,
        )
    }

    fn show(builder: TcCommandBuilder, json: bool) -> Result<Self, TcValidationError> {
        let builder = if json { builder.json() } else { builder };
        builder.build()
    }

    /// Install (or reinstall) the 16-band priority root.
    pub fn bootstrap_root(device: &str) -> Result<Self, TcValidationError> {
        TcCommandBuilder::new()
            .qdisc(TcOperation::Replace)
            .device(device)
            .target(TcTarget::Root)
            .handle(ROOT_HANDLE)
            .params(QdiscParams::bootstrap_prio())
            .build()
    }

    /// Create or update the shaping qdisc under a flow.
    pub fn replace_shaping(
        device: &str,
        flow_id: &str,
        handle: &str,
        profile: &ShapingProfile,
    ) -> Result<Self, TcValidationError> {
        TcCommandBuilder::new()
            .qdisc(TcOperation::Replace)
            .device(device)
            .target(TcTarget::Parent(flow_id.to_string()))
            .handle(handle)
            .params(QdiscParams::Netem(NetemParams::from(profile)))
            .build()
    }

    pub fn delete_child_qdisc(
        device: &str,
        parent: &str,
        handle: &str,
    ) -> Result<Self, TcValidationError> {
        TcCommandBuilder::new()
            .qdisc(TcOperation::Delete)
            .device(device)
            .target(TcTarget::Parent(parent.to_string()))
            .handle(handle)
            .build()
    }

    pub fn delete_root(device: &str) -> Result<Self, TcValidationError> {
        TcCommandBuilder::new()
            .qdisc(TcOperation::Delete)
            .device(device)
            .target(TcTarget::Root)
            .build()
    }

    pub fn add_filter(
        device: &str,
        predicates: &MatchPredicates,
        flow_id: &str,
    ) -> Result<Self, TcValidationError> {
        TcCommandBuilder::new()
            .filter(TcOperation::Add)
            .device(device)
            .selectors(predicates)
            .flow_id(flow_id)
            .build()
    }

    /// Point an existing classifier at another flow.
    pub fn retarget_filter(
        device: &str,
        address: &FilterAddress,
        flow_id: &str,
    ) -> Result<Self, TcValidationError> {
        address
            .apply(TcCommandBuilder::new().filter(TcOperation::Replace).device(device))
            .flow_id(flow_id)
            .build()
    }

    pub fn delete_filter(device: &str, address: &FilterAddress) -> Result<Self, TcValidationError> {
        address
            .apply(TcCommandBuilder::new().filter(TcOperation::Delete).device(device))
            .build()
    }

    pub fn object(&self) -> TcObject {
        self.object
    }

    pub fn operation(&self) -> TcOperation {
        self.operation
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for TcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tc {}", self.args.join(" "))
    }
}

/// Where an existing classifier lives, as the control plane reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAddress {
    pub parent: String,
    pub pref: u32,
    pub handle: String,
}

impl FilterAddress {
    /// Missing parent/preference fall back to where new classifiers go.
    pub fn of(filter: &tcrule_shared::Filter) -> Option<Self> {
        Some(Self {
            parent: filter
                .parent
                .clone()
                .unwrap_or_else(|| DEFAULT_FILTER_PARENT.to_string()),
            pref: filter.pref.unwrap_or(DEFAULT_FILTER_PREF),
            handle: filter.handle()?.to_string(),
        })
    }

    fn apply(&self, builder: TcCommandBuilder) -> TcCommandBuilder {
        builder
            .target(TcTarget::Parent(self.parent.clone()))
            .pref(self.pref)
            .handle(self.handle.clone())
    }
}
