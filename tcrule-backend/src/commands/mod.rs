//! `tc` command generation.

pub mod builder;

pub use builder::{
    FilterAddress, NetemParams, QdiscParams, TcCommand, TcCommandBuilder, TcObject, TcOperation,
    TcTarget,
};
