//! Reading back the active limits.
//!
//! The upload limit is the tbf qdisc on the interface itself; the download
//! limit is the tbf qdisc on the IFB device. Both are read from
//! `tc qdisc show` text output, e.g.
//!
//! ```text
//! qdisc tbf 8001: root refcnt 2 rate 81920Kbit burst 4Kb lat 400ms
//! ```
//!
//! Output that cannot be read is treated as "no limit"; querying status
//! never fails because of what `tc` printed.

use std::fmt;

use serde::Serialize;

use crate::config::ShaperConfig;
use crate::error::Result;
use crate::exec::{CommandLine, CommandRunner};
use crate::ifname;
use crate::rate::{self, RateUnit};

/// Text shown when neither direction is limited.
pub const NO_LIMIT: &str = "No Limit Applied";

/// Text shown for a direction without a limit.
pub const NOT_APPLIED: &str = "Not Applied";

// ============================================================================
// Parsing
// ============================================================================

/// What was found where a tbf rate should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateReading {
    /// A tbf rate, in kbit/s.
    Present(u64),
    /// No tbf qdisc with a rate.
    Absent,
    /// A tbf rate token that could not be read.
    Malformed(String),
}

impl RateReading {
    /// The rate, if one was read.
    pub fn value(&self) -> Option<u64> {
        match self {
            RateReading::Present(kbit) => Some(*kbit),
            _ => None,
        }
    }
}

/// Parse a `tc` rate token such as `81920Kbit` into kbit/s.
///
/// ```
/// use tcshape::status::parse_rate_token;
///
/// assert_eq!(parse_rate_token("81920Kbit"), Some(81920));
/// assert_eq!(parse_rate_token("512k"), Some(512));
/// assert_eq!(parse_rate_token("12Mbit"), Some(12_000));
/// assert_eq!(parse_rate_token("fast"), None);
/// ```
pub fn parse_rate_token(token: &str) -> Option<u64> {
    let idx = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let (num_str, unit) = token.split_at(idx);

    if num_str.is_empty() {
        return None;
    }
    let num: u64 = num_str.parse().ok()?;

    match unit.to_ascii_lowercase().as_str() {
        "" | "k" | "kbit" => Some(num),
        "bit" => Some(num / 1000),
        "m" | "mbit" => num.checked_mul(1000),
        "g" | "gbit" => num.checked_mul(1_000_000),
        _ => None,
    }
}

/// Find the tbf rate in `tc qdisc show` output.
pub fn parse_tbf_rate(output: &str) -> RateReading {
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if !tokens.contains(&"tbf") {
            continue;
        }

        let Some(pos) = tokens.iter().position(|t| *t == "rate") else {
            continue;
        };

        return match tokens.get(pos + 1) {
            Some(token) => match parse_rate_token(token) {
                Some(kbit) => RateReading::Present(kbit),
                None => RateReading::Malformed((*token).to_string()),
            },
            None => RateReading::Malformed(String::new()),
        };
    }

    RateReading::Absent
}

// ============================================================================
// LimiterStatus
// ============================================================================

/// Snapshot of the active limits on an interface.
///
/// `None` means no limit is applied, which is different from a zero rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    /// Egress limit in kbit/s.
    #[serde(rename = "upload_kbit")]
    pub upload: Option<u64>,
    /// Ingress limit in kbit/s.
    #[serde(rename = "download_kbit")]
    pub download: Option<u64>,
    /// Unit used for display.
    pub unit: RateUnit,
}

impl LimiterStatus {
    /// Status with no limits.
    pub fn none(unit: RateUnit) -> Self {
        Self {
            upload: None,
            download: None,
            unit,
        }
    }

    /// Returns true if either direction is limited.
    pub fn is_limited(&self) -> bool {
        self.upload.is_some() || self.download.is_some()
    }

    fn direction(&self, kbit: Option<u64>) -> String {
        match kbit {
            Some(kbit) => format!("{} kbit ({})", kbit, rate::format_in(kbit, self.unit)),
            None => NOT_APPLIED.to_string(),
        }
    }
}

impl fmt::Display for LimiterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_limited() {
            return f.write_str(NO_LIMIT);
        }
        write!(
            f,
            "Upload: {} | Download: {}",
            self.direction(self.upload),
            self.direction(self.download)
        )
    }
}

// ============================================================================
// StatusReader
// ============================================================================

/// Queries the kernel for the active limits.
#[derive(Debug, Clone)]
pub struct StatusReader<R> {
    runner: R,
    tc: String,
    ifb: String,
}

impl<R: CommandRunner> StatusReader<R> {
    /// A reader using the default `tc` and IFB device.
    pub fn new(runner: R) -> Self {
        Self::with_config(runner, &ShaperConfig::default())
    }

    /// A reader using the tools and IFB device from `config`.
    pub fn with_config(runner: R, config: &ShaperConfig) -> Self {
        Self {
            runner,
            tc: config.tc.clone(),
            ifb: config.ifb_device.clone(),
        }
    }

    /// `tc qdisc show dev <dev>`
    pub fn show_cmd(&self, dev: &str) -> CommandLine {
        CommandLine::new(&self.tc).args(["qdisc", "show", "dev", dev])
    }

    /// Read the active limits on `interface`.
    ///
    /// Only an invalid interface name is an error.
    pub async fn query(&self, interface: &str, unit: RateUnit) -> Result<LimiterStatus> {
        ifname::validate(interface)?;

        let upload = self.read(interface).await;
        let download = self.read(&self.ifb).await;

        Ok(LimiterStatus {
            upload,
            download,
            unit,
        })
    }

    async fn read(&self, dev: &str) -> Option<u64> {
        let cmd = self.show_cmd(dev);
        let output = match self.runner.run(&cmd).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(device = dev, error = %e, "cannot query qdiscs");
                return None;
            }
        };

        if !output.success() {
            tracing::debug!(device = dev, stderr = %output.stderr.trim(), "qdisc query failed");
            return None;
        }

        match parse_tbf_rate(&output.stdout) {
            RateReading::Present(kbit) => Some(kbit),
            RateReading::Absent => None,
            RateReading::Malformed(token) => {
                tracing::debug!(device = dev, token = %token, "unreadable tbf rate");
                None
            }
        }
    }
}
