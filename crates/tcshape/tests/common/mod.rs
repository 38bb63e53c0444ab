//! Common test utilities for integration tests.
//!
//! Provides `TestNamespace` for running the real tools in an isolated
//! network namespace, and helper macros for conditional test execution.

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use tcshape::{Error, Result, SystemRunner};

/// Global counter for unique namespace names.
static NAMESPACE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a unique namespace name for this test.
fn unique_ns_name(prefix: &str) -> String {
    let id = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    format!("tcshape-{}-{}-{}", prefix, pid, id)
}

/// A test network namespace with automatic cleanup.
///
/// The namespace is deleted when the struct is dropped, taking any IFB or
/// dummy devices created inside it along.
pub struct TestNamespace {
    name: String,
}

impl TestNamespace {
    /// Create a new test namespace with a unique name.
    pub fn new(prefix: &str) -> Result<Self> {
        let name = unique_ns_name(prefix);
        run("ip", &["netns", "add", &name])?;
        Ok(Self { name })
    }

    /// Get the namespace name.
    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A runner whose commands execute inside this namespace.
    pub fn runner(&self) -> SystemRunner {
        SystemRunner::new().privilege(["ip", "netns", "exec", self.name.as_str()])
    }

    /// Run a command in the namespace and return its stdout.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["netns", "exec", self.name.as_str(), cmd];
        full.extend_from_slice(args);
        run("ip", &full)
    }

    /// Add a dummy interface in this namespace and bring it up.
    pub fn add_dummy(&self, name: &str) -> Result<()> {
        self.exec("ip", &["link", "add", name, "type", "dummy"])?;
        self.exec("ip", &["link", "set", name, "up"])?;
        Ok(())
    }

    /// Add an IFB device in this namespace and bring it up.
    pub fn add_ifb(&self, name: &str) -> Result<()> {
        self.exec("ip", &["link", "add", name, "type", "ifb"])?;
        self.exec("ip", &["link", "set", name, "up"])?;
        Ok(())
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        let _ = Command::new("ip")
            .args(["netns", "del", &self.name])
            .status();
    }
}

fn run(program: &str, args: &[&str]) -> Result<String> {
    let rendered = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| Error::ExecutionFailed {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(Error::Command {
            command: rendered,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Kernel messages for a link type or tc module that is not available.
const UNSUPPORTED: &[&str] = &[
    "Unknown device type",
    "Operation not supported",
    "classifier not found",
    "Specified qdisc kind is unknown",
];

/// Returns true if `stderr` says the kernel lacks a needed module.
pub fn is_unsupported(stderr: &str) -> bool {
    UNSUPPORTED.iter().any(|msg| stderr.contains(msg))
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
///
/// Use this at the beginning of integration tests that require root privileges.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

/// Unwrap the result of a setup step, skipping the test if the kernel lacks
/// the module it needs.
#[macro_export]
macro_rules! require_module {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) if e.stderr().is_some_and(crate::common::is_unsupported) => {
                eprintln!("Skipping test: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ns_name() {
        let name1 = unique_ns_name("test");
        let name2 = unique_ns_name("test");
        assert_ne!(name1, name2);
        assert!(name1.starts_with("tcshape-test-"));
    }

    #[test]
    fn test_is_unsupported() {
        assert!(is_unsupported("Error: Unknown device type.\n"));
        assert!(is_unsupported("Error: TC classifier not found.\n"));
        assert!(!is_unsupported("RTNETLINK answers: File exists\n"));
    }
}
