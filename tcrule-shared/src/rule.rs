//! The logical rule: "traffic matching these selectors on this interface
//! experiences this latency, loss and rate".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::TcValidationError;
use crate::filter::Filter;
use crate::predicate::{IpMatch, MatchPredicates};
use crate::qdisc::Qdisc;
use crate::TcValidate;

/// A percentage held as integer hundredths, so "10", "10.0" and a stored
/// fraction of 0.1 all compare equal. Rounds half away from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LossPct(u32);

impl LossPct {
    pub const MAX: LossPct = LossPct(10_000);

    /// From a percentage (10.0 == 10%). `None` outside 0..=100 or NaN.
    pub fn from_percent(percent: f64) -> Option<Self> {
        if !percent.is_finite() || percent < 0.0 {
            return None;
        }
        let hundredths = (percent * 100.0).round();
        if hundredths > Self::MAX.0 as f64 {
            return None;
        }
        Some(LossPct(hundredths as u32))
    }

    /// From a fraction as tc reports it (0.1 == 10%).
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        Self::from_percent(fraction * 100.0)
    }

    pub fn hundredths(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LossPct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for LossPct {
    type Err = TcValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('%');
        let percent: f64 = trimmed
            .parse()
            .map_err(|_| TcValidationError::new("loss", format!("'{}' is not a number", s)))?;
        Self::from_percent(percent).ok_or_else(|| {
            TcValidationError::new("loss", format!("must be 0.0-100.0 percent, got {}", s))
        })
    }
}

impl Serialize for LossPct {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LossPct {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Latency/loss/rate triple. Two profiles are the same shaping class only
/// when every field matches, absent included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingProfile {
    pub latency_ms: Option<u64>,
    pub packet_loss_pct: Option<LossPct>,
    pub rate_bytes: Option<u64>,
}

impl ShapingProfile {
    /// Profile of an installed shaping qdisc.
    pub fn from_qdisc(qdisc: &Qdisc) -> Self {
        Self {
            latency_ms: qdisc.delay_seconds().map(seconds_to_ms),
            packet_loss_pct: qdisc.loss_fraction().and_then(LossPct::from_fraction),
            rate_bytes: qdisc.rate_bytes(),
        }
    }
}

impl fmt::Display for ShapingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let latency = self
            .latency_ms
            .map(|l| format!("{}ms", l))
            .unwrap_or_else(|| "-".to_string());
        let loss = self
            .packet_loss_pct
            .map(|l| format!("{}%", l))
            .unwrap_or_else(|| "-".to_string());
        let rate = self
            .rate_bytes
            .map(|r| format!("{}B/s", r))
            .unwrap_or_else(|| "-".to_string());
        write!(f, "latency={} loss={} rate={}", latency, loss, rate)
    }
}

/// Fractional seconds to whole milliseconds, half away from zero.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    let ms = (seconds * 1000.0).round();
    if ms <= 0.0 { 0 } else { ms as u64 }
}

/// A rule reconstructed from live control-plane state.
///
/// Either side may be missing: a shaping qdisc nobody classifies into
/// carries no selectors and no filter handle; a classifier pointing at a
/// flow without a shaping qdisc carries no profile and no qdisc handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub interface: String,
    #[serde(flatten)]
    pub predicates: MatchPredicates,
    #[serde(flatten)]
    pub profile: ShapingProfile,
    pub corrupt_pct: Option<LossPct>,
    pub flow_id: Option<String>,
    pub filter_handle: Option<String>,
    pub qdisc_handle: Option<String>,
    /// Position in the snapshot's filter list; only meaningful within one snapshot.
    #[serde(skip)]
    pub filter_index: Option<usize>,
    /// Position in the snapshot's qdisc list; only meaningful within one snapshot.
    #[serde(skip)]
    pub qdisc_index: Option<usize>,
}

impl Rule {
    pub fn has_filter(&self) -> bool {
        self.filter_handle.is_some()
    }

    pub fn has_qdisc(&self) -> bool {
        self.qdisc_handle.is_some()
    }

    pub fn is_partial(&self) -> bool {
        !(self.has_filter() && self.has_qdisc())
    }
}

/// A Set/Delete request. Delete ignores the profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSpec {
    /// Target interface; `None` means every non-loopback interface.
    pub interface: Option<String>,
    pub predicates: MatchPredicates,
    pub profile: ShapingProfile,
}

impl RuleSpec {
    pub fn on(interface: &str) -> Self {
        Self {
            interface: Some(interface.to_string()),
            ..Default::default()
        }
    }

    pub fn src_ip(mut self, ip: IpMatch) -> Self {
        self.predicates.src_ip = Some(ip);
        self
    }

    pub fn dst_ip(mut self, ip: IpMatch) -> Self {
        self.predicates.dst_ip = Some(ip);
        self
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.predicates.src_port = Some(port);
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.predicates.dst_port = Some(port);
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.profile.latency_ms = Some(ms);
        self
    }

    pub fn loss(mut self, loss: LossPct) -> Self {
        self.profile.packet_loss_pct = Some(loss);
        self
    }

    pub fn rate_bytes(mut self, rate: u64) -> Self {
        self.profile.rate_bytes = Some(rate);
        self
    }
}

impl TcValidate for RuleSpec {
    type Error = TcValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if let Some(iface) = &self.interface
            && (iface.is_empty() || iface.chars().any(|c| c.is_whitespace() || c == '/'))
        {
            return Err(TcValidationError::new(
                "interface",
                format!("'{}' is not a valid interface name", iface),
            ));
        }
        if self.profile.rate_bytes == Some(0) {
            return Err(TcValidationError::new(
                "rate_bytes",
                "rate must be greater than 0 when given",
            ));
        }
        Ok(())
    }
}

/// Everything one listing pass saw, plus the rules joined from it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleSnapshot {
    pub interfaces: Vec<String>,
    pub qdiscs: Vec<Qdisc>,
    pub filters: Vec<Filter>,
    pub rules: Vec<Rule>,
}

impl RuleSnapshot {
    pub fn rules_on<'a>(&'a self, interface: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.interface == interface)
    }

    pub fn filters_on<'a>(&'a self, interface: &'a str) -> impl Iterator<Item = &'a Filter> + 'a {
        self.filters.iter().filter(move |f| f.interface == interface)
    }
}
