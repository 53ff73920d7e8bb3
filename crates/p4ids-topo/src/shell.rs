//! Interactive command interpreter over a running [`Network`].
//!
//! Output formats follow the emulator CLI the IDS test procedures were
//! written against (`nodes`, `net`, `pingall`, `h1 ping h2`, ...).

use std::io::{self, Write};

use p4ids_net::topology::{NodeRef, Topology};
use p4ids_net::{NetError, Network, PingResult, PingSummary, Runner};

pub const HELP: &str = "\
Documented commands:
  help                     show this message
  nodes                    list nodes
  net                      list links per node
  links                    list links and their state
  intfs                    list interfaces per node
  dump                     describe every node
  pingall                  ping between all hosts
  pingpair                 ping between the first two hosts
  link <n1> <n2> up|down   change the state of a link
  sh <cmd>                 run a shell command in the root namespace
  <node> <cmd> [args]      run a command on a node (host names become IPs)
  exit | quit | Ctrl-D     stop the network and leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Nodes,
    Net,
    Links,
    Intfs,
    Dump,
    PingAll,
    PingPair,
    Link { a: String, b: String, up: bool },
    Sh(String),
    Node { node: String, args: Vec<String> },
    Exit,
}

/// Parses one input line. `Err` carries the message to show the user.
pub fn parse(line: &str, topology: &Topology) -> Result<Command, String> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(Command::Empty);
    };
    let rest: Vec<&str> = words.collect();

    let cmd = match first {
        "help" | "?" => Command::Help,
        "nodes" => Command::Nodes,
        "net" => Command::Net,
        "links" => Command::Links,
        "intfs" => Command::Intfs,
        "dump" => Command::Dump,
        "pingall" => Command::PingAll,
        "pingpair" => Command::PingPair,
        "exit" | "quit" => Command::Exit,
        "link" => match rest.as_slice() {
            [a, b, state @ ("up" | "down")] => Command::Link {
                a: a.to_string(),
                b: b.to_string(),
                up: *state == "up",
            },
            _ => return Err("usage: link <node1> <node2> up|down".into()),
        },
        "sh" => {
            let cmd = line["sh".len()..].trim();
            if cmd.is_empty() {
                return Err("usage: sh <cmd>".into());
            }
            Command::Sh(cmd.to_string())
        }
        node if topology.node(node).is_some() => {
            if rest.is_empty() {
                return Err(format!("*** Enter a command for node: {node} <cmd>"));
            }
            Command::Node {
                node: node.to_string(),
                args: rest.iter().map(|a| substitute_host(a, topology)).collect(),
            }
        }
        _ => return Err(format!("*** Unknown command: {line}")),
    };
    Ok(cmd)
}

fn substitute_host(arg: &str, topology: &Topology) -> String {
    match topology.host_ip(arg) {
        Some(ip) => ip.to_string(),
        None => arg.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell<'a, R: Runner, W: Write> {
    net: &'a mut Network<R>,
    out: W,
}

impl<'a, R: Runner, W: Write> Shell<'a, R, W> {
    pub fn new(net: &'a mut Network<R>, out: W) -> Self {
        Self { net, out }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Runs one input line. Command failures are reported to the user and
    /// the shell keeps going; only write errors are returned.
    pub fn execute(&mut self, line: &str) -> io::Result<Flow> {
        let cmd = match parse(line, self.net.topology()) {
            Ok(cmd) => cmd,
            Err(msg) => {
                writeln!(self.out, "{msg}")?;
                return Ok(Flow::Continue);
            }
        };
        tracing::debug!(?cmd, "shell command");

        match cmd {
            Command::Empty => {}
            Command::Exit => return Ok(Flow::Exit),
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Nodes => self.nodes()?,
            Command::Net => self.net_links()?,
            Command::Links => self.links()?,
            Command::Intfs => self.intfs()?,
            Command::Dump => self.dump()?,
            Command::PingAll => match self.net.ping_all() {
                Ok(summary) => self.ping_report(&summary)?,
                Err(e) => writeln!(self.out, "*** Error: {e}")?,
            },
            Command::PingPair => self.ping_pair()?,
            Command::Link { a, b, up } => {
                if let Err(e) = self.net.set_link_state(&a, &b, up) {
                    writeln!(self.out, "*** Error: {e}")?;
                }
            }
            Command::Sh(cmd) => {
                self.out.flush()?;
                let result = self.net.sh(&cmd);
                self.report_exit(result)?;
            }
            Command::Node { node, args } => {
                let (cmd, rest) = match args.split_first() {
                    Some(split) => split,
                    None => return Ok(Flow::Continue),
                };
                let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
                self.out.flush()?;
                let result = self.net.exec_foreground(&node, cmd, &rest);
                self.report_exit(result)?;
            }
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn report_exit(
        &mut self,
        result: Result<Option<i32>, NetError>,
    ) -> io::Result<()> {
        match result {
            Ok(Some(0)) => Ok(()),
            Ok(Some(code)) => {
                tracing::debug!(code, "command exited with non-zero status");
                Ok(())
            }
            Ok(None) => writeln!(self.out, "*** Command terminated by signal"),
            Err(e) => writeln!(self.out, "*** Error: {e}"),
        }
    }

    fn nodes(&mut self) -> io::Result<()> {
        let names = self.net.topology().node_names().join(" ");
        writeln!(self.out, "available nodes are:")?;
        writeln!(self.out, "{names}")
    }

    fn net_links(&mut self) -> io::Result<()> {
        let topo = self.net.topology();
        let mut lines = Vec::new();
        let names = topo
            .hosts()
            .iter()
            .map(|h| h.name.as_str())
            .chain(topo.switches().iter().map(|s| s.name.as_str()));
        for name in names {
            let mut line = name.to_string();
            for (local, peer) in topo.interfaces(name) {
                line.push_str(&format!(" {}:{}", local.intf_name(), peer.intf_name()));
            }
            lines.push(line);
        }
        lines.push(topo.controller().name.clone());
        for line in lines {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    fn links(&mut self) -> io::Result<()> {
        for (idx, link) in self.net.topology().links().iter().enumerate() {
            let state = if self.net.link_is_up(idx) {
                "OK OK"
            } else {
                "DOWN DOWN"
            };
            writeln!(self.out, "{link} ({state})")?;
        }
        Ok(())
    }

    fn intfs(&mut self) -> io::Result<()> {
        let topo = self.net.topology();
        for name in topo.node_names().into_iter().skip(1) {
            let intfs: Vec<String> = topo
                .interfaces(name)
                .into_iter()
                .map(|(local, _)| local.intf_name())
                .collect();
            writeln!(self.out, "{name}: {}", intfs.join(","))?;
        }
        Ok(())
    }

    fn dump(&mut self) -> io::Result<()> {
        let topo = self.net.topology();
        for name in topo.node_names().into_iter().skip(1) {
            let line = match topo.node(name) {
                Some(NodeRef::Host(h)) => format!(
                    "<Host {}: {}:{} ns={}>",
                    h.name,
                    topo.default_intf(&h.name).unwrap_or_default(),
                    h.ip,
                    topo.namespace_name(&h.name)
                ),
                Some(NodeRef::Switch(s)) => {
                    let intfs: Vec<String> = topo
                        .interfaces(&s.name)
                        .into_iter()
                        .map(|(local, _)| local.intf_name())
                        .collect();
                    format!(
                        "<Switch {}: {} mode={} protocols={}>",
                        s.name,
                        intfs.join(","),
                        s.mode,
                        s.protocols
                    )
                }
                None => continue,
            };
            writeln!(self.out, "{line}")?;
        }
        let c = topo.controller();
        writeln!(self.out, "<Controller {}: {}>", c.name, c.addr())
    }

    fn ping_pair(&mut self) -> io::Result<()> {
        let hosts: Vec<String> = self
            .net
            .topology()
            .hosts()
            .iter()
            .take(2)
            .map(|h| h.name.clone())
            .collect();
        let [a, b] = hosts.as_slice() else {
            return writeln!(self.out, "*** pingpair needs at least two hosts");
        };

        let mut summary = PingSummary::default();
        for (src, dst) in [(a, b), (b, a)] {
            match self.net.ping(src, dst) {
                Ok(ok) => summary.results.push(PingResult {
                    src: src.clone(),
                    dst: dst.clone(),
                    ok,
                }),
                Err(e) => return writeln!(self.out, "*** Error: {e}"),
            }
        }
        self.ping_report(&summary)
    }

    fn ping_report(&mut self, summary: &PingSummary) -> io::Result<()> {
        writeln!(self.out, "*** Ping: testing ping reachability")?;
        let mut current: Option<&str> = None;
        for r in &summary.results {
            if current != Some(r.src.as_str()) {
                if current.is_some() {
                    writeln!(self.out)?;
                }
                write!(self.out, "{} ->", r.src)?;
                current = Some(r.src.as_str());
            }
            if r.ok {
                write!(self.out, " {}", r.dst)?;
            } else {
                write!(self.out, " X")?;
            }
        }
        if current.is_some() {
            writeln!(self.out)?;
        }
        writeln!(
            self.out,
            "*** Results: {}% dropped ({}/{} received)",
            summary.dropped_percent(),
            summary.received(),
            summary.sent()
        )
    }
}
