//! Interactive front end of the P4 IDS test topology.

pub mod session;
pub mod shell;
