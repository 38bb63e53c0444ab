//! Command runners for tests.
//!
//! - [`ScriptedRunner`] records every command and answers with canned
//!   outputs chosen by command prefix.
//! - [`FakeHost`] keeps a small model of devices and qdiscs and answers the
//!   commands this crate issues the way `ip` and `tc` would, so apply,
//!   clear, and status can be exercised end to end without root.
//!
//! Enabled with the `testing` feature.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::exec::{CommandLine, CommandRunner, Output};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// ScriptedRunner
// ============================================================================

#[derive(Debug, Clone)]
enum Response {
    Output(Output),
    SpawnError(io::ErrorKind),
    Timeout,
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    response: Response,
    remaining: Option<usize>,
}

/// A runner that replays scripted responses.
///
/// The most recently added rule whose prefix matches a command wins.
/// Commands that match no rule succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    /// A runner where every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &[&str], response: Response, remaining: Option<usize>) -> &Self {
        lock(&self.rules).push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            response,
            remaining,
        });
        self
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: &[&str], output: Output) -> &Self {
        self.push(prefix, Response::Output(output), None)
    }

    /// Answer the next command starting with `prefix` with `output`.
    pub fn respond_once(&self, prefix: &[&str], output: Output) -> &Self {
        self.push(prefix, Response::Output(output), Some(1))
    }

    /// Fail to spawn commands starting with `prefix`.
    pub fn fail_spawn(&self, prefix: &[&str], kind: io::ErrorKind) -> &Self {
        self.push(prefix, Response::SpawnError(kind), None)
    }

    /// Time out commands starting with `prefix`.
    pub fn time_out(&self, prefix: &[&str]) -> &Self {
        self.push(prefix, Response::Timeout, None)
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandLine> {
        lock(&self.calls).clone()
    }

    /// Every command run so far, rendered as strings.
    pub fn call_strings(&self) -> Vec<String> {
        lock(&self.calls).iter().map(ToString::to_string).collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn answer(&self, cmd: &CommandLine) -> Response {
        let mut rules = lock(&self.rules);
        let Some(idx) = rules.iter().rposition(|rule| {
            let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
            cmd.starts_with(&prefix)
        }) else {
            return Response::Output(Output::ok(""));
        };

        let rule = &mut rules[idx];
        let response = rule.response.clone();
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(idx);
            }
        }
        response
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: &CommandLine) -> Result<Output> {
        lock(&self.calls).push(cmd.clone());

        match self.answer(cmd) {
            Response::Output(output) => Ok(output),
            Response::SpawnError(kind) => Err(Error::ExecutionFailed {
                command: cmd.to_string(),
                source: io::Error::from(kind),
            }),
            Response::Timeout => Err(Error::Timeout {
                command: cmd.to_string(),
                after: Duration::from_secs(0),
            }),
        }
    }
}

// ============================================================================
// FakeHost
// ============================================================================

#[derive(Debug, Default)]
struct HostState {
    devices: BTreeSet<String>,
    root_tbf: HashMap<String, u64>,
    ingress: BTreeSet<String>,
    redirects: HashMap<String, String>,
}

/// An in-memory model of the host's devices and qdiscs.
///
/// Understands the `ip`, `modprobe`, and `tc` invocations issued by this
/// crate and fails like the real tools when asked to remove something that
/// is not there.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    calls: Mutex<Vec<CommandLine>>,
}

impl FakeHost {
    /// A host with `lo` and the given interfaces.
    pub fn with_interfaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let host = Self::default();
        {
            let mut state = lock(&host.state);
            state.devices.insert("lo".to_string());
            state.devices.extend(names.into_iter().map(Into::into));
        }
        host
    }

    /// Returns true if the device exists.
    pub fn has_device(&self, dev: &str) -> bool {
        lock(&self.state).devices.contains(dev)
    }

    /// The tbf rate at the root of `dev`, in kbit/s.
    pub fn root_rate(&self, dev: &str) -> Option<u64> {
        lock(&self.state).root_tbf.get(dev).copied()
    }

    /// Returns true if `dev` has an ingress qdisc.
    pub fn has_ingress(&self, dev: &str) -> bool {
        lock(&self.state).ingress.contains(dev)
    }

    /// Where ingress traffic of `dev` is redirected to.
    pub fn redirect_target(&self, dev: &str) -> Option<String> {
        lock(&self.state).redirects.get(dev).cloned()
    }

    /// Every command run so far, rendered as strings.
    pub fn call_strings(&self) -> Vec<String> {
        lock(&self.calls).iter().map(ToString::to_string).collect()
    }

    fn execute(&self, argv: &[&str]) -> Output {
        let mut state = lock(&self.state);

        match argv {
            ["ip", "link", "show", dev] => {
                if state.devices.contains(*dev) {
                    Output::ok(format!("7: {}: <BROADCAST,NOARP,UP,LOWER_UP> mtu 1500\n", dev))
                } else {
                    Output::failed(1, format!("Device \"{}\" does not exist.\n", dev))
                }
            }
            ["ip", "link", "add", dev, "type", "ifb"] => {
                if state.devices.insert(dev.to_string()) {
                    Output::ok("")
                } else {
                    Output::failed(2, "RTNETLINK answers: File exists\n")
                }
            }
            ["ip", "link", "set", "dev", dev, "up"] => {
                if state.devices.contains(*dev) {
                    Output::ok("")
                } else {
                    Output::failed(1, format!("Cannot find device \"{}\"\n", dev))
                }
            }
            ["modprobe", ..] => Output::ok(""),
            ["tc", "qdisc", "replace", "dev", dev, "root", "tbf", "rate", rate, ..] => {
                if !state.devices.contains(*dev) {
                    return Output::failed(1, format!("Cannot find device \"{}\"\n", dev));
                }
                match rate.strip_suffix("kbit").and_then(|n| n.parse().ok()) {
                    Some(kbit) => {
                        state.root_tbf.insert(dev.to_string(), kbit);
                        Output::ok("")
                    }
                    None => Output::failed(1, format!("Illegal \"rate\" value \"{}\"\n", rate)),
                }
            }
            ["tc", "qdisc", "replace", "dev", dev, "handle", "ffff:", "ingress"] => {
                if !state.devices.contains(*dev) {
                    return Output::failed(1, format!("Cannot find device \"{}\"\n", dev));
                }
                state.ingress.insert(dev.to_string());
                Output::ok("")
            }
            ["tc", "filter", "replace", "dev", dev, "parent", "ffff:", .., "redirect", "dev", target] => {
                if !state.ingress.contains(*dev) {
                    return Output::failed(2, "Error: Parent Qdisc doesn't exists.\n");
                }
                if !state.devices.contains(*target) {
                    return Output::failed(1, format!("Cannot find device \"{}\"\n", target));
                }
                // matchall cannot change an existing filter.
                if state.redirects.contains_key(*dev) {
                    return Output::failed(2, "RTNETLINK answers: File exists\n");
                }
                state.redirects.insert(dev.to_string(), target.to_string());
                Output::ok("")
            }
            ["tc", "qdisc", "del", "dev", dev, "root"] => {
                if !state.devices.contains(*dev) {
                    return Output::failed(1, format!("Cannot find device \"{}\"\n", dev));
                }
                if state.root_tbf.remove(*dev).is_some() {
                    Output::ok("")
                } else {
                    Output::failed(2, "Error: Cannot delete qdisc with handle of zero.\n")
                }
            }
            ["tc", "qdisc", "del", "dev", dev, "ingress"] => {
                if state.ingress.remove(*dev) {
                    state.redirects.remove(*dev);
                    Output::ok("")
                } else {
                    Output::failed(2, "Error: Cannot find specified qdisc on specified device.\n")
                }
            }
            ["tc", "qdisc", "show", "dev", dev] => {
                if !state.devices.contains(*dev) {
                    return Output::failed(1, format!("Cannot find device \"{}\"\n", dev));
                }
                let mut out = match state.root_tbf.get(*dev) {
                    Some(kbit) => format!(
                        "qdisc tbf 8001: root refcnt 2 rate {}Kbit burst 4Kb lat 400ms \n",
                        kbit
                    ),
                    None => "qdisc noqueue 0: root refcnt 2 \n".to_string(),
                };
                if state.ingress.contains(*dev) {
                    out.push_str("qdisc ingress ffff: parent ffff:fff1 ---------------- \n");
                }
                Output::ok(out)
            }
            _ => Output::failed(1, format!("unsupported command: {}\n", argv.join(" "))),
        }
    }
}

impl CommandRunner for FakeHost {
    async fn run(&self, cmd: &CommandLine) -> Result<Output> {
        lock(&self.calls).push(cmd.clone());

        let argv: Vec<&str> = std::iter::once(cmd.program())
            .chain(cmd.arguments().iter().map(String::as_str))
            .collect();
        Ok(self.execute(&argv))
    }
}
