//! Queueing discipline records as reported by `tc qdisc show`.

use serde::{Deserialize, Serialize};

use crate::decode::lenient;
use crate::{PRIORITY_KIND, SHAPING_KIND};

/// One queueing discipline attached to a device.
///
/// Field names follow the `tc -j qdisc show` encoding so the same type
/// decodes the structured output and serializes back for `show all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Qdisc {
    #[serde(default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub handle: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub dev: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub root: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub refcnt: Option<u32>,
    /// Parent flow id; absent for root qdiscs.
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub options: Option<QdiscOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QdiscOptions {
    #[serde(default, deserialize_with = "lenient")]
    pub bands: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub priomap: Option<Vec<u32>>,
    #[serde(default, deserialize_with = "lenient")]
    pub multiqueue: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub delay: Option<NetemDelay>,
    #[serde(
        rename = "loss-random",
        default,
        deserialize_with = "lenient"
    )]
    pub loss_random: Option<NetemLossRandom>,
    #[serde(default, deserialize_with = "lenient")]
    pub rate: Option<NetemRate>,
    #[serde(default, deserialize_with = "lenient")]
    pub corrupt: Option<NetemCorrupt>,
    #[serde(default, deserialize_with = "lenient")]
    pub ecn: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub gap: Option<f64>,
}

/// Fixed delay in fractional seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetemDelay {
    pub delay: f64,
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub correlation: f64,
}

/// Random loss as a fraction (0.1 == 10%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetemLossRandom {
    pub loss: f64,
    #[serde(default)]
    pub correlation: f64,
}

/// Rate in bytes per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetemRate {
    pub rate: u64,
    #[serde(default)]
    pub packetoverhead: i64,
    #[serde(default)]
    pub cellsize: u64,
    #[serde(default)]
    pub celloverhead: i64,
}

/// Corruption as a fraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetemCorrupt {
    pub corrupt: f64,
    #[serde(default)]
    pub correlation: f64,
}

impl Qdisc {
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    pub fn is_shaping(&self) -> bool {
        self.is_kind(SHAPING_KIND)
    }

    pub fn is_priority(&self) -> bool {
        self.is_kind(PRIORITY_KIND)
    }

    pub fn is_on(&self, dev: &str) -> bool {
        self.dev.as_deref() == Some(dev)
    }

    /// Root qdiscs either say so explicitly or have no parent.
    pub fn is_root(&self) -> bool {
        self.root.unwrap_or(false) || self.parent.is_none()
    }

    pub fn delay_seconds(&self) -> Option<f64> {
        self.options.as_ref()?.delay.as_ref().map(|d| d.delay)
    }

    pub fn loss_fraction(&self) -> Option<f64> {
        self.options.as_ref()?.loss_random.as_ref().map(|l| l.loss)
    }

    pub fn rate_bytes(&self) -> Option<u64> {
        self.options.as_ref()?.rate.as_ref().map(|r| r.rate)
    }

    pub fn corrupt_fraction(&self) -> Option<f64> {
        self.options.as_ref()?.corrupt.as_ref().map(|c| c.corrupt)
    }

    pub fn bands(&self) -> Option<u32> {
        self.options.as_ref()?.bands
    }
}
