//! Switch stand-ins.
//!
//! The real forwarding element is an out-of-process P4 switch. In `bridge`
//! mode a Linux bridge forwards between the ports so the topology is usable
//! without it; in `external` mode the ports are only created.

use std::io;

use crate::runner::{check, Runner};
use crate::topology::{Switch, Topology};

/// Adds and brings up a bridge. An interface already holding `name` is a
/// conflict; a bridge that was added but could not be brought up is
/// deleted again.
pub fn create_bridge<R: Runner + ?Sized>(runner: &R, name: &str) -> io::Result<()> {
    let output = runner.run("ip", &["link", "add", "name", name, "type", "bridge"])?;
    check(output, &format!("create bridge {name}"))?;

    let up = runner
        .run("ip", &["link", "set", name, "up"])
        .and_then(|output| check(output, &format!("bring up bridge {name}")));
    if let Err(e) = up {
        if let Err(del) = delete_bridge(runner, name) {
            tracing::warn!(bridge = %name, error = %del, "failed to remove half-created bridge");
        }
        return Err(e);
    }
    Ok(())
}

pub fn attach_port<R: Runner + ?Sized>(runner: &R, bridge: &str, intf: &str) -> io::Result<()> {
    let output = runner.run("ip", &["link", "set", intf, "master", bridge])?;
    check(output, &format!("attach {intf} to {bridge}"))?;
    Ok(())
}

pub fn delete_bridge<R: Runner + ?Sized>(runner: &R, name: &str) -> io::Result<()> {
    let output = runner.run("ip", &["link", "del", name])?;
    check(output, &format!("delete bridge {name}"))?;
    Ok(())
}

/// `simple_switch_grpc` invocation binding every port of `switch` to its
/// interface, e.g. `-i 1@s1-eth1 -i 2@s1-eth2`.
pub fn simple_switch_command(topology: &Topology, switch: &Switch) -> String {
    let mut cmd = String::from("simple_switch_grpc");
    for (local, _) in topology.interfaces(&switch.name) {
        cmd.push_str(&format!(" -i {}@{}", local.port, local.intf_name()));
    }
    cmd.push_str(" <program.json>");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::DryRunRunner;
    use crate::test_util::FailingRunner;
    use crate::topology::TopologyBuilder;

    #[test]
    fn bridge_lifecycle_commands() {
        let runner = DryRunRunner::new();
        create_bridge(&runner, "s1").unwrap();
        attach_port(&runner, "s1", "s1-eth1").unwrap();
        delete_bridge(&runner, "s1").unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                "ip link add name s1 type bridge",
                "ip link set s1 up",
                "ip link set s1-eth1 master s1",
                "ip link del s1",
            ]
        );
    }

    #[test]
    fn existing_interface_is_not_deleted() {
        let runner = FailingRunner::new("ip link add name eth0", "RTNETLINK answers: File exists");
        let err = create_bridge(&runner, "eth0").unwrap_err();
        assert!(err.to_string().contains("File exists"));
        assert_eq!(runner.commands(), vec!["ip link add name eth0 type bridge"]);
    }

    #[test]
    fn bridge_that_cannot_come_up_is_removed() {
        let runner = FailingRunner::new("ip link set s1 up", "RTNETLINK answers: Operation not permitted");
        create_bridge(&runner, "s1").unwrap_err();
        assert_eq!(
            runner.commands(),
            vec![
                "ip link add name s1 type bridge",
                "ip link set s1 up",
                "ip link del s1",
            ]
        );
    }

    #[test]
    fn port_mapping_for_default_topology() {
        let topo = TopologyBuilder::default_ids().build().unwrap();
        let cmd = simple_switch_command(&topo, &topo.switches()[0]);
        assert_eq!(cmd, "simple_switch_grpc -i 1@s1-eth1 -i 2@s1-eth2 <program.json>");
    }
}
