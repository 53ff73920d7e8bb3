use std::io;

use crate::runner::{check, CmdOutput, Runner};

/// A Linux network namespace managed via `ip netns`.
///
/// Created with loopback up. Unlike a scoped guard, dropping a `Namespace`
/// does not delete it: the owning [`crate::Network`] deletes namespaces
/// after the links and bridges that reference them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    /// Adds the namespace and brings its loopback up.
    ///
    /// An existing namespace with the same name is a conflict and fails
    /// with the kernel's error. If the loopback step fails the namespace is
    /// deleted again before returning.
    pub fn create<R: Runner + ?Sized>(runner: &R, name: &str) -> io::Result<Self> {
        let output = runner.run("ip", &["netns", "add", name])?;
        check(output, &format!("create netns {name}"))?;

        let ns = Self {
            name: name.to_string(),
        };
        let loopback = ns
            .exec(runner, "ip", &["link", "set", "lo", "up"])
            .and_then(|output| check(output, &format!("bring up loopback in {name}")));
        if let Err(e) = loopback {
            if let Err(del) = ns.delete(runner) {
                tracing::warn!(netns = %name, error = %del, "failed to remove half-created namespace");
            }
            return Err(e);
        }

        Ok(ns)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exec<R: Runner + ?Sized>(
        &self,
        runner: &R,
        cmd: &str,
        args: &[&str],
    ) -> io::Result<CmdOutput> {
        let argv = self.argv(cmd, args);
        runner.run("ip", &argv)
    }

    pub fn exec_foreground<R: Runner + ?Sized>(
        &self,
        runner: &R,
        cmd: &str,
        args: &[&str],
    ) -> io::Result<Option<i32>> {
        let argv = self.argv(cmd, args);
        runner.run_foreground("ip", &argv)
    }

    pub fn delete<R: Runner + ?Sized>(&self, runner: &R) -> io::Result<()> {
        let output = runner.run("ip", &["netns", "del", &self.name])?;
        check(output, &format!("delete netns {}", self.name))?;
        Ok(())
    }

    fn argv<'a>(&'a self, cmd: &'a str, args: &[&'a str]) -> Vec<&'a str> {
        let mut argv = vec!["netns", "exec", self.name.as_str(), cmd];
        argv.extend_from_slice(args);
        argv
    }
}

/// Runs a command inside `ns`, or in the root namespace when `ns` is `None`.
pub fn exec_in<R: Runner + ?Sized>(
    runner: &R,
    ns: Option<&Namespace>,
    cmd: &str,
    args: &[&str],
) -> io::Result<CmdOutput> {
    match ns {
        Some(ns) => ns.exec(runner, cmd, args),
        None => runner.run(cmd, args),
    }
}
