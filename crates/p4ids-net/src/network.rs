//! The emulated network as a scoped resource.
//!
//! A [`Network`] goes `Unstarted -> Running -> Stopped` exactly once.
//! Everything created by [`Network::start`] is released by
//! [`Network::stop`], which also runs on drop, so a panic or an early
//! return out of the interactive session still tears the network down.

use std::fmt;
use std::io;
use std::net::TcpStream;
use std::time::Duration;

use crate::error::NetError;
use crate::link;
use crate::namespace::Namespace;
use crate::runner::{CmdOutput, Runner};
use crate::shaping::apply_shaping;
use crate::switch;
use crate::topology::{Controller, Link, NodeRef, SwitchMode, Topology};

const CONTROLLER_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetState {
    Unstarted,
    Running,
    Stopped,
}

impl fmt::Display for NetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetState::Unstarted => f.write_str("unstarted"),
            NetState::Running => f.write_str("running"),
            NetState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Outcome of a teardown. Failures are logged and counted, never fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    pub src: String,
    pub dst: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingSummary {
    pub results: Vec<PingResult>,
}

impl PingSummary {
    pub fn sent(&self) -> usize {
        self.results.len()
    }

    pub fn received(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn dropped_percent(&self) -> u32 {
        if self.results.is_empty() {
            return 0;
        }
        let lost = self.sent() - self.received();
        (100.0 * lost as f64 / self.sent() as f64).round() as u32
    }
}

pub struct Network<R: Runner> {
    topology: Topology,
    runner: R,
    state: NetState,
    controller_check: bool,
    namespaces: Vec<(String, Namespace)>,
    bridges: Vec<String>,
    /// Per created veth pair, the ends still in the root namespace.
    veths: Vec<Vec<String>>,
    link_up: Vec<bool>,
}

impl<R: Runner> Network<R> {
    pub fn new(topology: Topology, runner: R) -> Self {
        Self {
            topology,
            runner,
            state: NetState::Unstarted,
            controller_check: true,
            namespaces: Vec::new(),
            bridges: Vec::new(),
            veths: Vec::new(),
            link_up: Vec::new(),
        }
    }

    /// Skip the TCP reachability check of the controller at start.
    pub fn without_controller_check(mut self) -> Self {
        self.controller_check = false;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn state(&self) -> NetState {
        self.state
    }

    /// Whether the link at `idx` (in topology order) is administratively up.
    pub fn link_is_up(&self, idx: usize) -> bool {
        self.link_up.get(idx).copied().unwrap_or(false)
    }

    pub fn start(&mut self) -> Result<(), NetError> {
        if self.state != NetState::Unstarted {
            return Err(NetError::InvalidState {
                op: "start",
                state: self.state,
            });
        }

        let controller = self.topology.controller();
        tracing::info!(controller = %controller.name, addr = %controller.addr(), "*** Adding controller");
        if self.controller_check {
            check_controller(controller);
        }

        match self.provision() {
            Ok(()) => {
                self.state = NetState::Running;
                tracing::info!(
                    hosts = self.topology.hosts().len(),
                    switches = self.topology.switches().len(),
                    links = self.topology.links().len(),
                    "*** Starting network"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "network start failed, rolling back");
                let report = self.teardown();
                self.state = NetState::Stopped;
                tracing::info!(removed = report.removed, failed = report.failed, "rollback done");
                Err(e.into())
            }
        }
    }

    /// Tears the network down. Safe to call in any state: only the first
    /// call after a successful start touches the OS.
    pub fn stop(&mut self) -> TeardownReport {
        match self.state {
            NetState::Running => {
                tracing::info!("*** Stopping network");
                let report = self.teardown();
                self.state = NetState::Stopped;
                tracing::info!(removed = report.removed, failed = report.failed, "network stopped");
                report
            }
            NetState::Unstarted => {
                self.state = NetState::Stopped;
                TeardownReport::default()
            }
            NetState::Stopped => {
                tracing::debug!("network already stopped");
                TeardownReport::default()
            }
        }
    }

    fn provision(&mut self) -> io::Result<()> {
        let topology = self.topology.clone();

        tracing::info!("*** Adding hosts");
        for host in topology.hosts() {
            tracing::info!(host = %host.name, ip = %host.ip, "adding host");
            let ns = Namespace::create(&self.runner, &topology.namespace_name(&host.name))?;
            self.namespaces.push((host.name.clone(), ns));
        }

        tracing::info!("*** Adding switches");
        for sw in topology.switches() {
            tracing::info!(switch = %sw.name, protocols = %sw.protocols, mode = %sw.mode, "adding switch");
            if sw.mode == SwitchMode::Bridge {
                switch::create_bridge(&self.runner, &sw.name)?;
                self.bridges.push(sw.name.clone());
            }
        }

        tracing::info!("*** Creating links");
        for l in topology.links() {
            tracing::info!(link = %l, "adding link");
            self.provision_link(&topology, l)?;
            self.link_up.push(true);
        }

        for sw in topology.switches() {
            if sw.mode == SwitchMode::External {
                tracing::info!(
                    switch = %sw.name,
                    cmd = %switch::simple_switch_command(&topology, sw),
                    "switch ports ready for external P4 switch"
                );
            }
        }

        Ok(())
    }

    fn provision_link(&mut self, topology: &Topology, l: &Link) -> io::Result<()> {
        let a = l.a.intf_name();
        let b = l.b.intf_name();
        link::create_veth_pair(&self.runner, &a, &b)?;
        self.veths.push(vec![a, b]);

        for ep in l.endpoints() {
            let intf = ep.intf_name();
            let ns = self.namespace_of(&ep.node).cloned();

            if let Some(ns) = &ns {
                link::move_to_namespace(&self.runner, &intf, ns)?;
                if let Some(root_ends) = self.veths.last_mut() {
                    root_ends.retain(|end| *end != intf);
                }
            }

            match topology.node(&ep.node) {
                Some(NodeRef::Host(host)) => {
                    if topology.default_intf(&host.name).as_deref() == Some(intf.as_str()) {
                        link::add_address(&self.runner, ns.as_ref(), &intf, &host.ip)?;
                    }
                }
                Some(NodeRef::Switch(sw)) => {
                    if sw.mode == SwitchMode::Bridge {
                        switch::attach_port(&self.runner, &sw.name, &intf)?;
                    }
                }
                None => {}
            }

            link::set_state(&self.runner, ns.as_ref(), &intf, true)?;
            apply_shaping(&self.runner, ns.as_ref(), &intf, &l.shaping)?;
        }

        Ok(())
    }

    /// Best-effort release of everything created so far, in reverse order:
    /// links, bridges, then namespaces.
    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for ends in self.veths.drain(..).rev() {
            // both ends inside namespaces: removed with the namespace
            let Some(end) = ends.first() else { continue };
            match link::delete(&self.runner, end) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(intf = %end, error = %e, "failed to delete link");
                    report.failed += 1;
                }
            }
        }

        for bridge in self.bridges.drain(..).rev() {
            match switch::delete_bridge(&self.runner, &bridge) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(bridge = %bridge, error = %e, "failed to delete bridge");
                    report.failed += 1;
                }
            }
        }

        for (host, ns) in self.namespaces.drain(..).rev() {
            match ns.delete(&self.runner) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(host = %host, netns = %ns.name(), error = %e, "failed to delete namespace");
                    report.failed += 1;
                }
            }
        }

        self.link_up.clear();
        report
    }

    fn namespace_of(&self, node: &str) -> Option<&Namespace> {
        self.namespaces
            .iter()
            .find(|(host, _)| host == node)
            .map(|(_, ns)| ns)
    }

    fn ensure_running(&self, op: &'static str) -> Result<(), NetError> {
        if self.state == NetState::Running {
            Ok(())
        } else {
            Err(NetError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Namespace a node's commands run in: the host's own, or the root
    /// namespace (`None`) for switches.
    fn node_namespace(&self, node: &str) -> Result<Option<&Namespace>, NetError> {
        match self.topology.node(node) {
            Some(NodeRef::Host(_)) => Ok(self.namespace_of(node)),
            Some(NodeRef::Switch(_)) => Ok(None),
            None => Err(NetError::UnknownNode(node.to_string())),
        }
    }

    /// Runs a command on `node`, capturing its output.
    pub fn exec(&self, node: &str, cmd: &str, args: &[&str]) -> Result<CmdOutput, NetError> {
        self.ensure_running("run commands on")?;
        let output = match self.node_namespace(node)? {
            Some(ns) => ns.exec(&self.runner, cmd, args)?,
            None => self.runner.run(cmd, args)?,
        };
        Ok(output)
    }

    /// Runs a command on `node` attached to the terminal.
    pub fn exec_foreground(
        &self,
        node: &str,
        cmd: &str,
        args: &[&str],
    ) -> Result<Option<i32>, NetError> {
        self.ensure_running("run commands on")?;
        let code = match self.node_namespace(node)? {
            Some(ns) => ns.exec_foreground(&self.runner, cmd, args)?,
            None => self.runner.run_foreground(cmd, args)?,
        };
        Ok(code)
    }

    /// Runs a shell command line in the root namespace.
    pub fn sh(&self, command: &str) -> Result<Option<i32>, NetError> {
        Ok(self.runner.run_foreground("sh", &["-c", command])?)
    }

    /// One ICMP echo from host `src` to host `dst`.
    pub fn ping(&self, src: &str, dst: &str) -> Result<bool, NetError> {
        self.ensure_running("ping in")?;
        if self.topology.host(src).is_none() {
            return Err(self.not_a_host(src));
        }
        let ip = self
            .topology
            .host_ip(dst)
            .ok_or_else(|| self.not_a_host(dst))?
            .to_string();
        let output = self.exec(src, "ping", &["-c1", "-W1", ip.as_str()])?;
        Ok(output.success)
    }

    /// Pings between every ordered pair of distinct hosts.
    pub fn ping_all(&self) -> Result<PingSummary, NetError> {
        let mut summary = PingSummary::default();
        for src in self.topology.hosts() {
            for dst in self.topology.hosts() {
                if src.name == dst.name {
                    continue;
                }
                let ok = self.ping(&src.name, &dst.name)?;
                summary.results.push(PingResult {
                    src: src.name.clone(),
                    dst: dst.name.clone(),
                    ok,
                });
            }
        }
        Ok(summary)
    }

    /// Brings both ends of the link between `n1` and `n2` up or down.
    pub fn set_link_state(&mut self, n1: &str, n2: &str, up: bool) -> Result<(), NetError> {
        self.ensure_running("configure links in")?;
        for node in [n1, n2] {
            if self.topology.node(node).is_none() {
                return Err(NetError::UnknownNode(node.to_string()));
            }
        }
        let idx = self
            .topology
            .links()
            .iter()
            .position(|l| l.connects(n1, n2))
            .ok_or_else(|| NetError::NoSuchLink(n1.to_string(), n2.to_string()))?;

        let l = self.topology.links()[idx].clone();
        for ep in l.endpoints() {
            let ns = self.node_namespace(&ep.node)?;
            link::set_state(&self.runner, ns, &ep.intf_name(), up)?;
        }
        if let Some(state) = self.link_up.get_mut(idx) {
            *state = up;
        }
        tracing::info!(link = %l, up, "link state changed");
        Ok(())
    }

    fn not_a_host(&self, node: &str) -> NetError {
        if self.topology.node(node).is_some() {
            NetError::NotAHost(node.to_string())
        } else {
            NetError::UnknownNode(node.to_string())
        }
    }
}

impl<R: Runner> Drop for Network<R> {
    fn drop(&mut self) {
        if self.state == NetState::Running {
            tracing::warn!("network dropped while running, tearing down");
            self.stop();
        }
    }
}

/// Logs whether the controller endpoint accepts TCP connections. The P4
/// dataplane is programmed over gRPC out-of-band, so this is never fatal.
fn check_controller(controller: &Controller) {
    match TcpStream::connect_timeout(&controller.addr(), CONTROLLER_CONNECT_TIMEOUT) {
        Ok(_) => tracing::debug!(addr = %controller.addr(), "controller reachable"),
        Err(e) => tracing::warn!(
            controller = %controller.name,
            addr = %controller.addr(),
            error = %e,
            "controller unreachable"
        ),
    }
}
