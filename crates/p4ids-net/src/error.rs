use std::io;

use thiserror::Error;

use crate::network::NetState;

// ── Topology validation ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("invalid node name {0:?}: use 1+ characters from [A-Za-z0-9_.-]")]
    InvalidName(String),
    #[error("duplicate node name {0:?}")]
    DuplicateNode(String),
    #[error("link references unknown node {0:?}")]
    UnknownNode(String),
    #[error("link connects {0:?} to itself")]
    SelfLink(String),
    #[error("port {port} is already used on node {node:?}")]
    DuplicatePort { node: String, port: u16 },
    #[error("interface name {0:?} is longer than 15 bytes")]
    NameTooLong(String),
    #[error("hosts {first:?} and {second:?} share address {addr}")]
    DuplicateAddress {
        first: String,
        second: String,
        addr: std::net::Ipv4Addr,
    },
    #[error("invalid shaping on link {link}: {reason}")]
    InvalidShaping { link: String, reason: String },
}

// ── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("cannot {op} a network that is {state}")]
    InvalidState { op: &'static str, state: NetState },
    #[error("unknown node {0:?}")]
    UnknownNode(String),
    #[error("{0:?} is not a host")]
    NotAHost(String),
    #[error("no link between {0:?} and {1:?}")]
    NoSuchLink(String, String),
}
