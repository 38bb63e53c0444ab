//! Shaper configuration.
//!
//! Everything here has a sensible default; a configuration file only needs
//! the keys it changes.
//!
//! ```yaml
//! ifb_device: ifb1
//! privilege: [sudo, -n]
//! timeout_secs: 5
//! apply_policy: abort_on_error
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::SystemRunner;
use crate::ifname;

/// Default redirect device name.
pub const DEFAULT_IFB: &str = "ifb0";

/// Default token bucket size.
pub const DEFAULT_BURST: &str = "32kbit";

/// Default maximum queueing latency.
pub const DEFAULT_LATENCY: &str = "400ms";

/// What an apply sequence does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPolicy {
    /// Record the failure and run the remaining steps.
    #[default]
    Continue,
    /// Stop at the first failure that is not benign.
    AbortOnError,
}

/// Configuration for [`Shaper`](crate::Shaper) and
/// [`StatusReader`](crate::StatusReader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaperConfig {
    /// Name of the IFB device that receives redirected ingress traffic.
    pub ifb_device: String,
    /// tbf bucket size, in `tc` syntax.
    pub burst: String,
    /// tbf latency, in `tc` syntax.
    pub latency: String,
    /// `tc` binary.
    pub tc: String,
    /// `ip` binary.
    pub ip: String,
    /// `modprobe` binary.
    pub modprobe: String,
    /// Prefix for every command, e.g. `["sudo", "-n"]`.
    pub privilege: Vec<String>,
    /// Bound for a single external command, in seconds.
    pub timeout_secs: u64,
    /// Failure policy for apply.
    pub apply_policy: ApplyPolicy,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            ifb_device: DEFAULT_IFB.to_string(),
            burst: DEFAULT_BURST.to_string(),
            latency: DEFAULT_LATENCY.to_string(),
            tc: "tc".to_string(),
            ip: "ip".to_string(),
            modprobe: "modprobe".to_string(),
            privilege: Vec::new(),
            timeout_secs: crate::exec::DEFAULT_TIMEOUT.as_secs(),
            apply_policy: ApplyPolicy::Continue,
        }
    }
}

impl ShaperConfig {
    /// Load a configuration file. `.json` files are read as JSON, anything
    /// else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_yaml_str(&text)?
        };

        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse a YAML configuration.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that end up on command lines.
    pub fn validate(&self) -> Result<()> {
        ifname::validate(&self.ifb_device)
            .map_err(|e| Error::Config(format!("ifb_device: {}", e)))?;

        for (key, value) in [
            ("burst", &self.burst),
            ("latency", &self.latency),
            ("tc", &self.tc),
            ("ip", &self.ip),
            ("modprobe", &self.modprobe),
        ] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!("{}: invalid value '{}'", key, value)));
            }
        }

        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".into()));
        }

        Ok(())
    }

    /// Per-command timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// A [`SystemRunner`] with this configuration's privilege prefix and timeout.
    pub fn runner(&self) -> SystemRunner {
        SystemRunner::new()
            .privilege(self.privilege.iter().cloned())
            .timeout(self.timeout())
    }
}
