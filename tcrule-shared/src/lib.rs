//! Shared types for tcrule.
//!
//! This crate holds the data model used by the rule engine and its
//! consumers: the raw control-plane records (qdiscs and u32 filters, exactly
//! as `tc` reports them), the decoded match predicates, and the logical
//! [`Rule`] reconstructed from them.
//!
//! # Key Components
//!
//! * [`Qdisc`] - A queueing discipline attached to a device
//! * [`Filter`] - A u32 classifier with its raw match entries
//! * [`MatchPredicates`] - Source/destination IP and port selectors
//! * [`ShapingProfile`] - Latency, loss and rate of a shaping qdisc
//! * [`Rule`] - A filter joined with the shaping qdisc it feeds
//! * [`RuleSpec`] - A Set/Delete request
//! * [`RuleSnapshot`] - One full listing pass
//!
//! Nothing here talks to the kernel; see `tcrule-backend` for that.

pub mod decode;
pub mod errors;
pub mod filter;
pub mod predicate;
pub mod qdisc;
pub mod rule;

pub use filter::{Filter, FilterMatch, FilterOptions};
pub use predicate::{IpMatch, MatchPredicates};
pub use qdisc::{NetemCorrupt, NetemDelay, NetemLossRandom, NetemRate, Qdisc, QdiscOptions};
pub use rule::{LossPct, Rule, RuleSnapshot, RuleSpec, ShapingProfile};

/// Qdisc kind that carries latency/loss/rate.
pub const SHAPING_KIND: &str = "netem";
/// Qdisc kind installed at the root of every managed interface.
pub const PRIORITY_KIND: &str = "prio";
/// Excluded from iteration, never from validation.
pub const LOOPBACK: &str = "lo";

/// Validation trait for rule requests
pub trait TcValidate {
    type Error: std::fmt::Display + std::fmt::Debug;
    fn validate(&self) -> Result<(), Self::Error>;
}
