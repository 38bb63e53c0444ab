//! IFB (Intermediate Functional Block) device lifecycle.
//!
//! The kernel only shapes traffic on its way out of a device. Ingress traffic
//! is therefore redirected to the egress side of an IFB device, which is
//! created on first use and then left in place.

use crate::config::ShaperConfig;
use crate::error::Result;
use crate::exec::{
    CommandLine, CommandRunner, DEVICE_MISSING, FILE_EXISTS, Outcome, run_checked, run_ignoring,
};

/// The redirect device used for ingress shaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfbDevice {
    name: String,
    ip: String,
    modprobe: String,
}

impl IfbDevice {
    /// An IFB device managed with the `ip` and `modprobe` found on `PATH`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: "ip".to_string(),
            modprobe: "modprobe".to_string(),
        }
    }

    /// The IFB device described by `config`.
    pub fn from_config(config: &ShaperConfig) -> Self {
        Self {
            name: config.ifb_device.clone(),
            ip: config.ip.clone(),
            modprobe: config.modprobe.clone(),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `ip link show <ifb>`
    pub fn show_cmd(&self) -> CommandLine {
        CommandLine::new(&self.ip).args(["link", "show", self.name.as_str()])
    }

    /// `ip link add <ifb> type ifb`
    pub fn add_cmd(&self) -> CommandLine {
        CommandLine::new(&self.ip).args(["link", "add", self.name.as_str(), "type", "ifb"])
    }

    /// `ip link set dev <ifb> up`
    pub fn up_cmd(&self) -> CommandLine {
        CommandLine::new(&self.ip).args(["link", "set", "dev", self.name.as_str(), "up"])
    }

    /// `modprobe ifb numifbs=1`
    pub fn modprobe_cmd(&self) -> CommandLine {
        CommandLine::new(&self.modprobe).args(["ifb", "numifbs=1"])
    }

    /// Query whether the device exists.
    ///
    /// `ip` reports a missing device on stderr in current releases and on
    /// stdout in some older ones, so both streams are checked.
    pub async fn exists<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<bool> {
        let cmd = self.show_cmd();
        let output = runner.run(&cmd).await?;

        if output.mentions(DEVICE_MISSING) {
            return Ok(false);
        }
        if output.success() {
            return Ok(true);
        }
        Err(output.into_error(&cmd))
    }

    /// Make sure the device exists and is up, creating it if needed.
    ///
    /// A concurrent creator winning the race is not an error.
    pub async fn ensure<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<()> {
        if self.exists(runner).await? {
            tracing::debug!(device = %self.name, "IFB device present");
            return Ok(());
        }

        tracing::info!(device = %self.name, "creating IFB device");

        let add = self.add_cmd();
        if let Outcome::Failed(err) = run_ignoring(runner, &add, &[FILE_EXISTS]).await? {
            return Err(err);
        }

        run_checked(runner, &self.up_cmd()).await?;
        Ok(())
    }

    /// Commands that re-assert the module is loaded and the device is up.
    pub(crate) fn reassert_cmds(&self) -> [CommandLine; 2] {
        [self.modprobe_cmd(), self.up_cmd()]
    }
}

impl Default for IfbDevice {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_IFB)
    }
}
