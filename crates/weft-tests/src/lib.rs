//! Test harness for multi-node weft networks.
//!
//! Spawns real nodes on loopback ephemeral ports with compressed timing so
//! scenarios that take tens of seconds in production settle in about a
//! second.

pub mod harness;

pub use harness::TestNet;
