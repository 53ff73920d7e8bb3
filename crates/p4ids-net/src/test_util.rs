use std::io;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::runner::{command_line, CmdOutput, DryRunRunner, Runner};

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether we have sufficient privileges (root / CAP_NET_ADMIN) and
/// tools (`ip`, `ping`) available to create and exercise network namespaces.
/// Checks by creating and deleting a throwaway namespace.
pub fn check_privileges() -> bool {
    if Command::new("ping").arg("-V").output().is_err() {
        return false;
    }

    let scratch = format!("p4ids-check-{}", std::process::id());
    let created = match Command::new("ip").args(["netns", "add", &scratch]).output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    };
    if created {
        let _ = Command::new("ip").args(["netns", "del", &scratch]).output();
    }
    created
}

/// Generates a unique, short resource name with the given prefix.
///
/// Names stay within 9 characters so `<name>-eth<port>` interface names
/// fit the 15-byte kernel limit.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let name = format!("{}{:x}{}", prefix, pid % 0xFFF, seq % 100);
    if name.len() > 9 {
        name[..9].to_string()
    } else {
        name
    }
}

/// Dry-run runner that fails every command whose line contains `pattern`.
pub struct FailingRunner {
    pub inner: DryRunRunner,
    pattern: String,
    stderr: String,
}

impl FailingRunner {
    pub fn new(pattern: &str, stderr: &str) -> Self {
        Self {
            inner: DryRunRunner::new(),
            pattern: pattern.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.commands()
    }
}

impl Runner for FailingRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
        let out = self.inner.run(program, args)?;
        if command_line(program, args).contains(&self.pattern) {
            return Ok(CmdOutput {
                success: false,
                code: Some(2),
                stderr: self.stderr.clone(),
                ..Default::default()
            });
        }
        Ok(out)
    }

    fn run_foreground(&self, program: &str, args: &[&str]) -> io::Result<Option<i32>> {
        self.inner.run_foreground(program, args)
    }
}
