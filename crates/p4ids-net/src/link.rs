//! veth plumbing for point-to-point links.

use std::io;

use ipnet::Ipv4Net;

use crate::namespace::{exec_in, Namespace};
use crate::runner::{check, Runner};

/// Creates a veth pair in the root namespace. Fails if either name is
/// already in use.
pub fn create_veth_pair<R: Runner + ?Sized>(runner: &R, name: &str, peer: &str) -> io::Result<()> {
    let output = runner.run(
        "ip",
        &["link", "add", name, "type", "veth", "peer", "name", peer],
    )?;
    check(output, &format!("create veth pair {name}/{peer}"))?;
    Ok(())
}

pub fn move_to_namespace<R: Runner + ?Sized>(
    runner: &R,
    intf: &str,
    ns: &Namespace,
) -> io::Result<()> {
    let output = runner.run("ip", &["link", "set", intf, "netns", ns.name()])?;
    check(output, &format!("move {intf} into {}", ns.name()))?;
    Ok(())
}

pub fn add_address<R: Runner + ?Sized>(
    runner: &R,
    ns: Option<&Namespace>,
    intf: &str,
    ip: &Ipv4Net,
) -> io::Result<()> {
    let ip = ip.to_string();
    let output = exec_in(runner, ns, "ip", &["addr", "add", &ip, "dev", intf])?;
    check(output, &format!("set {ip} on {intf}"))?;
    Ok(())
}

pub fn set_state<R: Runner + ?Sized>(
    runner: &R,
    ns: Option<&Namespace>,
    intf: &str,
    up: bool,
) -> io::Result<()> {
    let state = if up { "up" } else { "down" };
    let output = exec_in(runner, ns, "ip", &["link", "set", intf, state])?;
    check(output, &format!("set {intf} {state}"))?;
    Ok(())
}

/// Deletes an interface in the root namespace. Deleting either end of a
/// veth pair removes both.
pub fn delete<R: Runner + ?Sized>(runner: &R, intf: &str) -> io::Result<()> {
    let output = runner.run("ip", &["link", "del", intf])?;
    check(output, &format!("delete {intf}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{DryRunRunner, SystemRunner};
    use crate::test_util::{check_privileges, unique_ns_name, FailingRunner};

    #[test]
    fn veth_pair_is_a_single_add() {
        let runner = DryRunRunner::new();
        create_veth_pair(&runner, "h1-eth1", "s1-eth1").unwrap();
        assert_eq!(
            runner.commands(),
            vec!["ip link add h1-eth1 type veth peer name s1-eth1"]
        );
    }

    #[test]
    fn name_conflict_is_fatal() {
        let runner = FailingRunner::new("type veth", "RTNETLINK answers: File exists");
        let err = create_veth_pair(&runner, "h1-eth1", "s1-eth1").unwrap_err();
        assert!(err.to_string().contains("File exists"));
        assert!(!runner.commands().iter().any(|c| c.contains(" del ")));
    }

    #[test]
    fn host_side_configuration() {
        let runner = DryRunRunner::new();
        let ns = Namespace::create(&runner, "p4ids-h2").unwrap();
        move_to_namespace(&runner, "h2-eth1", &ns).unwrap();
        add_address(&runner, Some(&ns), "h2-eth1", &"192.168.1.2/24".parse().unwrap()).unwrap();
        set_state(&runner, Some(&ns), "h2-eth1", true).unwrap();

        let cmds = runner.commands();
        assert_eq!(
            &cmds[2..],
            &[
                "ip link set h2-eth1 netns p4ids-h2",
                "ip netns exec p4ids-h2 ip addr add 192.168.1.2/24 dev h2-eth1",
                "ip netns exec p4ids-h2 ip link set h2-eth1 up",
            ]
        );
    }

    #[test]
    fn test_veth_link() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let runner = SystemRunner::new(false);
        let ns1 = Namespace::create(&runner, &unique_ns_name("p4la")).expect("create ns1");
        let ns2 = Namespace::create(&runner, &unique_ns_name("p4lb")).expect("create ns2");

        let v_a = format!("{}-eth1", unique_ns_name("va"));
        let v_b = format!("{}-eth1", unique_ns_name("vb"));
        create_veth_pair(&runner, &v_a, &v_b).expect("create veth pair");
        move_to_namespace(&runner, &v_a, &ns1).expect("move a");
        move_to_namespace(&runner, &v_b, &ns2).expect("move b");

        // Using 10.203.1.0/24 for this test
        add_address(&runner, Some(&ns1), &v_a, &"10.203.1.1/24".parse().unwrap()).expect("ip a");
        add_address(&runner, Some(&ns2), &v_b, &"10.203.1.2/24".parse().unwrap()).expect("ip b");
        set_state(&runner, Some(&ns1), &v_a, true).expect("up a");
        set_state(&runner, Some(&ns2), &v_b, true).expect("up b");

        let out = ns1
            .exec(&runner, "ping", &["-c", "1", "-W", "1", "10.203.1.2"])
            .expect("exec ping");

        ns1.delete(&runner).expect("delete ns1");
        ns2.delete(&runner).expect("delete ns2");

        if !out.success {
            panic!("Ping failed:\nStdout: {}\nStderr: {}", out.stdout, out.stderr);
        }
    }
}
