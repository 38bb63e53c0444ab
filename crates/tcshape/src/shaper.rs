//! Applying and clearing rate limits.
//!
//! # Overview
//!
//! Upload is limited by a tbf qdisc at the root of the interface. Download
//! cannot be shaped where it arrives, so it is redirected to an IFB device
//! and limited by a tbf qdisc on the IFB's egress path:
//!
//! ```text
//! Egress:
//!   eth0 -> tbf root (rate N)
//!
//! Ingress:
//!   eth0 ingress (ffff:) -> matchall filter -> mirred redirect -> ifb0 -> tbf root (rate N)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tcshape::{Shaper, SystemRunner};
//! use tcshape::rate::RateUnit;
//!
//! let shaper = Shaper::new(SystemRunner::new().privilege(["sudo", "-n"]));
//!
//! // 10 MiB/s each way
//! let report = shaper.apply_rate("eth0", "10", RateUnit::MebibytesPerSec).await?;
//! for failure in report.failures() {
//!     eprintln!("{}", failure);
//! }
//!
//! shaper.clear("eth0").await?;
//! ```
//!
//! Apply replaces the tbf rules and rebuilds the ingress redirect from
//! scratch, so it can be repeated without a clear in between. Clear
//! attempts every step regardless of earlier failures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{ApplyPolicy, ShaperConfig};
use crate::error::{Error, Result};
use crate::exec::{
    CommandLine, CommandRunner, NO_SUCH_QDISC, Outcome, ZERO_HANDLE, run_ignoring,
};
use crate::ifb::IfbDevice;
use crate::ifname;
use crate::rate::{self, RateUnit};
use crate::status::StatusReader;

/// Handle of the ingress qdisc.
pub const INGRESS_HANDLE: &str = "ffff:";

/// Priority and handle of the redirect filter. Fixed so that `replace`
/// finds the previous filter.
const REDIRECT_PRIO: &str = "1";
const REDIRECT_HANDLE: &str = "1";

// ============================================================================
// Limits
// ============================================================================

/// Rates to apply, in kbit/s. A `None` direction is left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Egress (upload) rate.
    pub upload: Option<u64>,
    /// Ingress (download) rate.
    pub download: Option<u64>,
}

impl Limits {
    /// The same rate in both directions.
    pub fn both(kbit: u64) -> Self {
        Self {
            upload: Some(kbit),
            download: Some(kbit),
        }
    }

    /// Limit upload only.
    pub fn upload(kbit: u64) -> Self {
        Self {
            upload: Some(kbit),
            download: None,
        }
    }

    /// Limit download only.
    pub fn download(kbit: u64) -> Self {
        Self {
            upload: None,
            download: Some(kbit),
        }
    }

    /// Returns true if no direction is set.
    pub fn is_empty(&self) -> bool {
        self.upload.is_none() && self.download.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid("no rate given"));
        }
        if self.upload == Some(0) || self.download == Some(0) {
            return Err(Error::invalid("rate must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Report
// ============================================================================

/// One step of an apply or clear sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Create the IFB device if it is missing.
    EnsureIfb,
    /// tbf at the interface root.
    EgressRule,
    /// Load the ifb module.
    LoadIfbModule,
    /// Bring the IFB device up.
    IfbUp,
    /// Delete the previous ingress qdisc and its redirect filter.
    ResetIngress,
    /// Ingress qdisc on the interface.
    IngressQdisc,
    /// Redirect ingress traffic to the IFB device.
    RedirectFilter,
    /// Delete the IFB root qdisc.
    ClearIfbRule,
    /// tbf at the IFB root.
    IfbRule,
    /// Delete the interface root qdisc.
    ClearEgress,
    /// Delete the interface ingress qdisc.
    ClearIngress,
}

impl StepKind {
    /// Short human-readable description.
    pub const fn description(self) -> &'static str {
        match self {
            StepKind::EnsureIfb => "ensure IFB device",
            StepKind::EgressRule => "install upload limit",
            StepKind::LoadIfbModule => "load ifb module",
            StepKind::IfbUp => "bring IFB device up",
            StepKind::ResetIngress => "remove previous ingress redirect",
            StepKind::IngressQdisc => "install ingress qdisc",
            StepKind::RedirectFilter => "redirect ingress to IFB",
            StepKind::ClearIfbRule => "remove download limit",
            StepKind::IfbRule => "install download limit",
            StepKind::ClearEgress => "remove upload limit",
            StepKind::ClearIngress => "remove ingress qdisc",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result of one executed step.
#[derive(Debug)]
pub struct StepResult {
    /// Which step ran.
    pub kind: StepKind,
    /// The command, if the step was a single command.
    pub command: Option<String>,
    /// How it ended.
    pub outcome: Outcome,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success => write!(f, "{}: ok", self.kind),
            Outcome::Benign(sig) => write!(f, "{}: nothing to do ({})", self.kind, sig),
            Outcome::Failed(e) => write!(f, "{}: {}", self.kind, e),
        }
    }
}

/// Which operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// [`Shaper::apply_limits`].
    Apply,
    /// [`Shaper::clear`].
    Clear,
}

/// Everything that happened during an apply or clear.
///
/// Step failures do not make the operation return `Err`; they are collected
/// here. Re-query the status to learn the resulting state.
#[derive(Debug)]
pub struct Report {
    operation: Operation,
    interface: String,
    steps: Vec<StepResult>,
    aborted: bool,
}

impl Report {
    fn new(operation: Operation, interface: &str) -> Self {
        Self {
            operation,
            interface: interface.to_string(),
            steps: Vec::new(),
            aborted: false,
        }
    }

    /// The operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The interface operated on.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Every executed step, in order.
    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// Steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.outcome.is_ok())
    }

    /// Returns true if no step failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Returns true if the sequence stopped before its last step.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    fn record(&mut self, kind: StepKind, command: Option<&CommandLine>, outcome: Outcome) {
        if let Outcome::Failed(e) = &outcome {
            tracing::warn!(interface = %self.interface, step = %kind, error = %e, "step failed");
        }
        self.steps.push(StepResult {
            kind,
            command: command.map(ToString::to_string),
            outcome,
        });
    }
}

// ============================================================================
// Shaper
// ============================================================================

struct Step {
    kind: StepKind,
    cmd: CommandLine,
    benign: &'static [&'static str],
}

impl Step {
    fn new(kind: StepKind, cmd: CommandLine) -> Self {
        Self {
            kind,
            cmd,
            benign: &[],
        }
    }

    fn benign(mut self, benign: &'static [&'static str]) -> Self {
        self.benign = benign;
        self
    }
}

/// Applies and clears rate limits on interfaces.
///
/// Apply and clear on the same interface are serialized within one
/// `Shaper`. Nothing prevents another process from changing the same
/// qdiscs at the same time.
#[derive(Debug)]
pub struct Shaper<R> {
    runner: R,
    config: ShaperConfig,
    ifb: IfbDevice,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R: CommandRunner> Shaper<R> {
    /// A shaper with the default configuration.
    pub fn new(runner: R) -> Self {
        Self::with_config(runner, ShaperConfig::default())
    }

    /// A shaper with the given configuration.
    pub fn with_config(runner: R, config: ShaperConfig) -> Self {
        let ifb = IfbDevice::from_config(&config);
        Self {
            runner,
            config,
            ifb,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ShaperConfig {
        &self.config
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The IFB device used for download limits.
    pub fn ifb(&self) -> &IfbDevice {
        &self.ifb
    }

    /// A status reader sharing this shaper's runner and configuration.
    pub fn status_reader(&self) -> StatusReader<&R> {
        StatusReader::with_config(&self.runner, &self.config)
    }

    /// Limit both directions on `interface` to `kbit` kbit/s.
    pub async fn apply(&self, interface: &str, kbit: u64) -> Result<Report> {
        self.apply_limits(interface, Limits::both(kbit)).await
    }

    /// Limit both directions to a user-entered rate.
    ///
    /// The rate text is validated before anything runs.
    pub async fn apply_rate(&self, interface: &str, rate: &str, unit: RateUnit) -> Result<Report> {
        let kbit = rate::to_kbit(rate, unit)?;
        self.apply(interface, kbit).await
    }

    /// Apply the given limits to `interface`.
    ///
    /// Returns `Err` for invalid input, or if a command could not be run at
    /// all. Command failures are recorded in the [`Report`]; whether the
    /// remaining steps still run depends on the [`ApplyPolicy`].
    pub async fn apply_limits(&self, interface: &str, limits: Limits) -> Result<Report> {
        self.check_interface(interface)?;
        limits.validate()?;

        let lock = self.lock_for(interface);
        let _guard = lock.lock().await;

        tracing::info!(
            interface,
            upload_kbit = ?limits.upload,
            download_kbit = ?limits.download,
            "applying limits"
        );

        let mut report = Report::new(Operation::Apply, interface);
        let abort_on_error = self.config.apply_policy == ApplyPolicy::AbortOnError;

        if limits.download.is_some() {
            let outcome = match self.ifb.ensure(&self.runner).await {
                Ok(()) => Outcome::Success,
                Err(e) if e.is_execution() => return Err(e),
                Err(e) => Outcome::Failed(e),
            };
            let failed = !outcome.is_ok();
            report.record(StepKind::EnsureIfb, None, outcome);
            if failed && abort_on_error {
                report.aborted = true;
                return Ok(report);
            }
        }

        for step in self.apply_plan(interface, limits) {
            tracing::debug!(interface, step = %step.kind, command = %step.cmd, "running step");
            let outcome = run_ignoring(&self.runner, &step.cmd, step.benign).await?;
            let failed = !outcome.is_ok();
            report.record(step.kind, Some(&step.cmd), outcome);
            if failed && abort_on_error {
                report.aborted = true;
                break;
            }
        }

        tracing::info!(
            interface,
            failures = report.failures().count(),
            aborted = report.aborted,
            "apply finished"
        );
        Ok(report)
    }

    /// Remove both limits from `interface`.
    ///
    /// Every step is attempted even if earlier ones fail. Only an invalid
    /// interface name is an error.
    pub async fn clear(&self, interface: &str) -> Result<Report> {
        self.check_interface(interface)?;

        let lock = self.lock_for(interface);
        let _guard = lock.lock().await;

        tracing::info!(interface, "clearing limits");

        let mut report = Report::new(Operation::Clear, interface);
        for step in self.clear_plan(interface) {
            tracing::debug!(interface, step = %step.kind, command = %step.cmd, "running step");
            let outcome = match run_ignoring(&self.runner, &step.cmd, step.benign).await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failed(e),
            };
            report.record(step.kind, Some(&step.cmd), outcome);
        }

        tracing::info!(interface, failures = report.failures().count(), "clear finished");
        Ok(report)
    }

    fn check_interface(&self, interface: &str) -> Result<()> {
        ifname::validate(interface)?;
        if interface == self.ifb.name() {
            return Err(Error::invalid(format!(
                "'{}' is the redirect device and cannot be shaped directly",
                interface
            )));
        }
        Ok(())
    }

    fn lock_for(&self, interface: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(interface.to_string()).or_default().clone()
    }

    fn tc(&self) -> CommandLine {
        CommandLine::new(&self.config.tc)
    }

    /// `tc qdisc replace dev <dev> root tbf rate <N>kbit burst <B> latency <L>`
    fn tbf_cmd(&self, dev: &str, kbit: u64) -> CommandLine {
        self.tc()
            .args(["qdisc", "replace", "dev", dev, "root", "tbf", "rate"])
            .arg(format!("{}kbit", kbit))
            .args(["burst", self.config.burst.as_str()])
            .args(["latency", self.config.latency.as_str()])
    }

    fn del_root_cmd(&self, dev: &str) -> CommandLine {
        self.tc().args(["qdisc", "del", "dev", dev, "root"])
    }

    fn del_ingress_cmd(&self, dev: &str) -> CommandLine {
        self.tc().args(["qdisc", "del", "dev", dev, "ingress"])
    }

    fn apply_plan(&self, interface: &str, limits: Limits) -> Vec<Step> {
        let ifb = self.ifb.name();
        let mut plan = Vec::new();

        if let Some(kbit) = limits.upload {
            plan.push(Step::new(StepKind::EgressRule, self.tbf_cmd(interface, kbit)));
        }

        if let Some(kbit) = limits.download {
            let [modprobe, up] = self.ifb.reassert_cmds();
            plan.push(Step::new(StepKind::LoadIfbModule, modprobe));
            plan.push(Step::new(StepKind::IfbUp, up));

            // matchall refuses to replace an existing filter, so start from
            // an empty ingress qdisc.
            plan.push(
                Step::new(StepKind::ResetIngress, self.del_ingress_cmd(interface))
                    .benign(&[NO_SUCH_QDISC]),
            );

            plan.push(Step::new(
                StepKind::IngressQdisc,
                self.tc().args([
                    "qdisc",
                    "replace",
                    "dev",
                    interface,
                    "handle",
                    INGRESS_HANDLE,
                    "ingress",
                ]),
            ));

            plan.push(Step::new(
                StepKind::RedirectFilter,
                self.tc().args([
                    "filter",
                    "replace",
                    "dev",
                    interface,
                    "parent",
                    INGRESS_HANDLE,
                    "protocol",
                    "all",
                    "prio",
                    REDIRECT_PRIO,
                    "handle",
                    REDIRECT_HANDLE,
                    "matchall",
                    "action",
                    "mirred",
                    "egress",
                    "redirect",
                    "dev",
                    ifb,
                ]),
            ));

            plan.push(
                Step::new(StepKind::ClearIfbRule, self.del_root_cmd(ifb)).benign(&[ZERO_HANDLE]),
            );
            plan.push(Step::new(StepKind::IfbRule, self.tbf_cmd(ifb, kbit)));
        }

        plan
    }

    fn clear_plan(&self, interface: &str) -> Vec<Step> {
        vec![
            Step::new(StepKind::ClearEgress, self.del_root_cmd(interface)),
            Step::new(StepKind::ClearIngress, self.del_ingress_cmd(interface)),
            Step::new(StepKind::ClearIfbRule, self.del_root_cmd(self.ifb.name()))
                .benign(&[ZERO_HANDLE]),
        ]
    }
}
