//! tcrule rule engine.
//!
//! Reconciles logical shaping rules ("traffic matching these selectors on
//! this interface gets this latency, loss and rate") against the qdiscs and
//! u32 filters the kernel actually holds. There is no state of our own:
//! every operation re-reads `tc` and reconstructs the rules from it.
//!
//! # Layout
//!
//! * [`context`] - Per-invocation execution context (runner, namespace, verbosity)
//! * [`tc_state`] - Dual-format (JSON, then legacy text) state reader
//! * [`match_decoder`] - u32 match entries to selectors
//! * [`rule_joiner`] - Filters and shaping qdiscs to rules
//! * [`flow_id`] - Flow-id allocation
//! * [`bootstrap`] - Root priority qdisc installation
//! * [`rule_engine`] - Set, Delete, Reset and orphan cleanup
//! * [`commands`] - Typed `tc` command lines
//! * [`config`] - CLI and environment configuration

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod context;
pub mod flow_id;
pub mod interfaces;
pub mod match_decoder;
pub mod netns;
pub mod rule_engine;
pub mod rule_joiner;
pub mod runner;
pub mod tc_state;
