//! Network emulation toolkit for P4 intrusion-detection test topologies.
//!
//! Builds a validated [`topology::Topology`] of hosts, switch stand-ins and
//! point-to-point links, then provisions it on Linux with `ip netns`, veth
//! pairs and `tc netem` shaping. The P4 dataplane itself (BMv2
//! `simple_switch_grpc`) is external: in `external` switch mode the switch
//! ports are only created and left for it to bind.

pub mod config;
pub mod error;
pub mod link;
pub mod namespace;
pub mod network;
pub mod runner;
pub mod shaping;
pub mod switch;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{ConfigError, TopologyConfig};
pub use error::{NetError, TopologyError};
pub use network::{NetState, Network, PingResult, PingSummary, TeardownReport};
pub use runner::{CmdOutput, DryRunRunner, Runner, SystemRunner};
pub use topology::{Topology, TopologyBuilder};
