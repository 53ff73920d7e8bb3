//! Topology description: hosts, switch stand-ins, links and the controller
//! reference, validated before any OS resource is created.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::shaping::LinkShaping;

/// Kernel limit for interface names (`IFNAMSIZ` minus the NUL).
pub const MAX_IFNAME_LEN: usize = 15;

pub const DEFAULT_NAMESPACE_PREFIX: &str = "p4ids-";
pub const DEFAULT_PROTOCOLS: &str = "OpenFlow13";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub name: String,
    pub ip: Ipv4Net,
}

/// How the switch record is realised on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Linux bridge enslaving every switch port. Placeholder forwarding.
    #[default]
    Bridge,
    /// Ports are left unattached for an external P4 switch to bind.
    External,
}

impl fmt::Display for SwitchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchMode::Bridge => f.write_str("bridge"),
            SwitchMode::External => f.write_str("external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Switch {
    pub name: String,
    pub protocols: String,
    pub mode: SwitchMode,
}

/// Control-plane endpoint. Recorded only: the P4 dataplane is controlled
/// out-of-band over gRPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl Controller {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            name: "c0".into(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 6653,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub node: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(node: &str, port: u16) -> Self {
        Self {
            node: node.to_string(),
            port,
        }
    }

    pub fn intf_name(&self) -> String {
        format!("{}-eth{}", self.node, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
    pub shaping: LinkShaping,
}

impl Link {
    pub fn connects(&self, n1: &str, n2: &str) -> bool {
        (self.a.node == n1 && self.b.node == n2) || (self.a.node == n2 && self.b.node == n1)
    }

    pub fn endpoints(&self) -> [&Endpoint; 2] {
        [&self.a, &self.b]
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.a.intf_name(), self.b.intf_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Host(&'a Host),
    Switch(&'a Switch),
}

/// A validated topology. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    namespace_prefix: String,
    controller: Controller,
    hosts: Vec<Host>,
    switches: Vec<Switch>,
    links: Vec<Link>,
}

impl Topology {
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node(&self, name: &str) -> Option<NodeRef<'_>> {
        if let Some(h) = self.hosts.iter().find(|h| h.name == name) {
            return Some(NodeRef::Host(h));
        }
        self.switches
            .iter()
            .find(|s| s.name == name)
            .map(NodeRef::Switch)
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn host_ip(&self, name: &str) -> Option<Ipv4Addr> {
        self.host(name).map(|h| h.ip.addr())
    }

    pub fn namespace_name(&self, host: &str) -> String {
        format!("{}{}", self.namespace_prefix, host)
    }

    /// Node names in display order: controller, hosts, switches.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names = vec![self.controller.name.as_str()];
        names.extend(self.hosts.iter().map(|h| h.name.as_str()));
        names.extend(self.switches.iter().map(|s| s.name.as_str()));
        names
    }

    /// `(local endpoint, peer endpoint)` for every link touching `node`,
    /// sorted by local port.
    pub fn interfaces(&self, node: &str) -> Vec<(&Endpoint, &Endpoint)> {
        let mut out: Vec<_> = self
            .links
            .iter()
            .filter_map(|l| {
                if l.a.node == node {
                    Some((&l.a, &l.b))
                } else if l.b.node == node {
                    Some((&l.b, &l.a))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by_key(|(local, _)| local.port);
        out
    }

    /// The interface carrying a host's address: its first link in
    /// declaration order.
    pub fn default_intf(&self, host: &str) -> Option<String> {
        self.links.iter().find_map(|l| {
            l.endpoints()
                .into_iter()
                .find(|e| e.node == host)
                .map(Endpoint::intf_name)
        })
    }
}

/// Collects node and link records, then validates them in [`build`].
///
/// [`build`]: TopologyBuilder::build
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    namespace_prefix: String,
    controller: Controller,
    hosts: Vec<Host>,
    switches: Vec<Switch>,
    links: Vec<Link>,
}

impl TopologyBuilder {
    pub fn new(controller: Controller) -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.into(),
            controller,
            hosts: Vec::new(),
            switches: Vec::new(),
            links: Vec::new(),
        }
    }

    /// The IDS test topology: `h1 -- s1 -- h2` with a placeholder
    /// controller at 127.0.0.1:6653.
    pub fn default_ids() -> Self {
        let mut builder = Self::new(Controller::default());
        builder
            .add_host("h1", ipv4_net([192, 168, 1, 1], 24))
            .add_host("h2", ipv4_net([192, 168, 1, 2], 24))
            .add_switch("s1", DEFAULT_PROTOCOLS, SwitchMode::Bridge)
            .add_link("h1", 1, "s1", 1, LinkShaping::default())
            .add_link("h2", 1, "s1", 2, LinkShaping::default());
        builder
    }

    pub fn namespace_prefix(&mut self, prefix: &str) -> &mut Self {
        self.namespace_prefix = prefix.to_string();
        self
    }

    pub fn add_host(&mut self, name: &str, ip: Ipv4Net) -> &mut Self {
        self.hosts.push(Host {
            name: name.to_string(),
            ip,
        });
        self
    }

    pub fn add_switch(&mut self, name: &str, protocols: &str, mode: SwitchMode) -> &mut Self {
        self.switches.push(Switch {
            name: name.to_string(),
            protocols: protocols.to_string(),
            mode,
        });
        self
    }

    pub fn add_link(
        &mut self,
        node1: &str,
        port1: u16,
        node2: &str,
        port2: u16,
        shaping: LinkShaping,
    ) -> &mut Self {
        self.links.push(Link {
            a: Endpoint::new(node1, port1),
            b: Endpoint::new(node2, port2),
            shaping,
        });
        self
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn build(&self) -> Result<Topology, TopologyError> {
        if !self.namespace_prefix.is_empty() && !valid_name(&self.namespace_prefix) {
            return Err(TopologyError::InvalidName(self.namespace_prefix.clone()));
        }

        let mut names = HashSet::new();
        let node_names = std::iter::once(self.controller.name.as_str())
            .chain(self.hosts.iter().map(|h| h.name.as_str()))
            .chain(self.switches.iter().map(|s| s.name.as_str()));
        for name in node_names {
            if !valid_name(name) {
                return Err(TopologyError::InvalidName(name.to_string()));
            }
            if !names.insert(name) {
                return Err(TopologyError::DuplicateNode(name.to_string()));
            }
        }

        for s in &self.switches {
            if s.name.len() > MAX_IFNAME_LEN {
                return Err(TopologyError::NameTooLong(s.name.clone()));
            }
        }

        let mut addrs: HashMap<Ipv4Addr, &str> = HashMap::new();
        for h in &self.hosts {
            if let Some(first) = addrs.insert(h.ip.addr(), &h.name) {
                return Err(TopologyError::DuplicateAddress {
                    first: first.to_string(),
                    second: h.name.clone(),
                    addr: h.ip.addr(),
                });
            }
        }

        let is_node = |name: &str| {
            self.hosts.iter().any(|h| h.name == name)
                || self.switches.iter().any(|s| s.name == name)
        };
        let mut ports = HashSet::new();
        for link in &self.links {
            for ep in link.endpoints() {
                if !is_node(&ep.node) {
                    return Err(TopologyError::UnknownNode(ep.node.clone()));
                }
                if !ports.insert((ep.node.as_str(), ep.port)) {
                    return Err(TopologyError::DuplicatePort {
                        node: ep.node.clone(),
                        port: ep.port,
                    });
                }
                let intf = ep.intf_name();
                if intf.len() > MAX_IFNAME_LEN {
                    return Err(TopologyError::NameTooLong(intf));
                }
            }
            if link.a.node == link.b.node {
                return Err(TopologyError::SelfLink(link.a.node.clone()));
            }
            link.shaping
                .validate()
                .map_err(|reason| TopologyError::InvalidShaping {
                    link: link.to_string(),
                    reason,
                })?;
        }

        Ok(Topology {
            namespace_prefix: self.namespace_prefix.clone(),
            controller: self.controller.clone(),
            hosts: self.hosts.clone(),
            switches: self.switches.clone(),
            links: self.links.clone(),
        })
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && name != "."
        && name != ".."
}

fn ipv4_net(octets: [u8; 4], prefix: u8) -> Ipv4Net {
    let addr = Ipv4Addr::from(octets);
    Ipv4Net::new(addr, prefix).unwrap_or_else(|_| Ipv4Net::from(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn default_topology_shape() {
        let topo = TopologyBuilder::default_ids().build().unwrap();

        assert_eq!(topo.hosts().len(), 2);
        assert_eq!(topo.switches().len(), 1);
        assert_eq!(topo.links().len(), 2);

        assert_eq!(topo.host("h1").unwrap().ip, net("192.168.1.1/24"));
        assert_eq!(topo.host("h2").unwrap().ip, net("192.168.1.2/24"));

        let l1 = &topo.links()[0];
        assert_eq!((l1.a.node.as_str(), l1.a.port), ("h1", 1));
        assert_eq!((l1.b.node.as_str(), l1.b.port), ("s1", 1));
        let l2 = &topo.links()[1];
        assert_eq!((l2.a.node.as_str(), l2.a.port), ("h2", 1));
        assert_eq!((l2.b.node.as_str(), l2.b.port), ("s1", 2));

        let c = topo.controller();
        assert_eq!(c.addr(), "127.0.0.1:6653".parse().unwrap());
        assert_eq!(topo.switches()[0].protocols, "OpenFlow13");
    }

    #[test]
    fn node_lookup_and_interfaces() {
        let topo = TopologyBuilder::default_ids().build().unwrap();

        assert_eq!(topo.node_names(), vec!["c0", "h1", "h2", "s1"]);
        assert!(matches!(topo.node("h1"), Some(NodeRef::Host(_))));
        assert!(matches!(topo.node("s1"), Some(NodeRef::Switch(_))));
        assert!(topo.node("c0").is_none());
        assert_eq!(topo.host_ip("h2"), Some(Ipv4Addr::new(192, 168, 1, 2)));

        let s1: Vec<_> = topo
            .interfaces("s1")
            .into_iter()
            .map(|(l, p)| (l.intf_name(), p.intf_name()))
            .collect();
        assert_eq!(
            s1,
            vec![
                ("s1-eth1".to_string(), "h1-eth1".to_string()),
                ("s1-eth2".to_string(), "h2-eth1".to_string()),
            ]
        );
        assert_eq!(topo.default_intf("h2").as_deref(), Some("h2-eth1"));
        assert_eq!(topo.namespace_name("h1"), "p4ids-h1");
    }

    #[test]
    fn rejects_duplicate_port() {
        let mut b = TopologyBuilder::default_ids();
        b.add_host("h3", net("192.168.1.3/24"))
            .add_link("h3", 1, "s1", 2, LinkShaping::default());
        match b.build() {
            Err(TopologyError::DuplicatePort { node, port }) => {
                assert_eq!(node, "s1");
                assert_eq!(port, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_duplicate_nodes() {
        let mut b = TopologyBuilder::default_ids();
        b.add_link("h1", 2, "s9", 1, LinkShaping::default());
        assert!(matches!(b.build(), Err(TopologyError::UnknownNode(n)) if n == "s9"));

        let mut b = TopologyBuilder::default_ids();
        b.add_host("s1", net("10.0.0.1/8"));
        assert!(matches!(b.build(), Err(TopologyError::DuplicateNode(n)) if n == "s1"));

        // the controller shares the node namespace
        let mut b = TopologyBuilder::default_ids();
        b.add_switch("c0", DEFAULT_PROTOCOLS, SwitchMode::Bridge);
        assert!(matches!(b.build(), Err(TopologyError::DuplicateNode(_))));
    }

    #[test]
    fn rejects_long_interface_names() {
        let mut b = TopologyBuilder::new(Controller::default());
        b.add_host("attacker-host", net("10.0.0.1/24"))
            .add_switch("s1", DEFAULT_PROTOCOLS, SwitchMode::External)
            .add_link("attacker-host", 1, "s1", 1, LinkShaping::default());
        assert!(matches!(b.build(), Err(TopologyError::NameTooLong(n)) if n == "attacker-host-eth1"));
    }

    #[test]
    fn rejects_bad_names_and_self_links() {
        let mut b = TopologyBuilder::new(Controller::default());
        b.add_host("h/1", net("10.0.0.1/24"));
        assert!(matches!(b.build(), Err(TopologyError::InvalidName(_))));

        let mut b = TopologyBuilder::new(Controller::default());
        b.add_switch("s1", DEFAULT_PROTOCOLS, SwitchMode::Bridge)
            .add_link("s1", 1, "s1", 2, LinkShaping::default());
        assert!(matches!(b.build(), Err(TopologyError::SelfLink(_))));
    }

    #[test]
    fn rejects_shared_address() {
        let mut b = TopologyBuilder::default_ids();
        b.add_host("h3", net("192.168.1.1/24"));
        assert!(matches!(
            b.build(),
            Err(TopologyError::DuplicateAddress { first, second, .. }) if first == "h1" && second == "h3"
        ));
    }

    #[test]
    fn rejects_invalid_shaping() {
        let mut b = TopologyBuilder::new(Controller::default());
        b.add_host("h1", net("10.0.0.1/24"))
            .add_switch("s1", DEFAULT_PROTOCOLS, SwitchMode::Bridge)
            .add_link(
                "h1",
                1,
                "s1",
                1,
                LinkShaping {
                    loss_percent: Some(-1.0),
                    ..Default::default()
                },
            );
        match b.build() {
            Err(TopologyError::InvalidShaping { link, .. }) => assert_eq!(link, "h1-eth1<->s1-eth1"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
