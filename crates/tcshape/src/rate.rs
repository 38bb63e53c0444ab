//! Rate conversion utilities.
//!
//! Users enter rates in byte-oriented units; `tc` is driven in kilobits per
//! second. This module converts between the two.
//!
//! # Example
//!
//! ```
//! use tcshape::rate::{self, RateUnit};
//!
//! let kbit = rate::to_kbit("10", RateUnit::MebibytesPerSec).unwrap();
//! assert_eq!(kbit, 81_920);
//!
//! assert_eq!(rate::format_in(kbit, RateUnit::MebibytesPerSec), "10.00 MiB/s");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// kbit/s per KiB/s.
pub const KBIT_PER_KIB: u64 = 8;

/// kbit/s per MiB/s.
pub const KBIT_PER_MIB: u64 = 8192;

/// B/s per kbit/s.
pub const BYTES_PER_KBIT: u64 = 125;

/// User-facing rate unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RateUnit {
    /// Bytes per second.
    #[serde(rename = "B/s")]
    BytesPerSec,
    /// Kibibytes per second.
    #[serde(rename = "KiB/s")]
    KibibytesPerSec,
    /// Mebibytes per second.
    #[default]
    #[serde(rename = "MiB/s")]
    MebibytesPerSec,
}

impl RateUnit {
    /// All supported units.
    pub const ALL: [RateUnit; 3] = [
        RateUnit::BytesPerSec,
        RateUnit::KibibytesPerSec,
        RateUnit::MebibytesPerSec,
    ];

    /// Display label, e.g. `MiB/s`.
    pub const fn label(self) -> &'static str {
        match self {
            RateUnit::BytesPerSec => "B/s",
            RateUnit::KibibytesPerSec => "KiB/s",
            RateUnit::MebibytesPerSec => "MiB/s",
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RateUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "b" | "bps" | "b/s" => Ok(RateUnit::BytesPerSec),
            "k" | "kb" | "kib" | "kib/s" | "kb/s" => Ok(RateUnit::KibibytesPerSec),
            "m" | "mb" | "mib" | "mib/s" | "mb/s" => Ok(RateUnit::MebibytesPerSec),
            other => Err(Error::invalid(format!("unknown rate unit '{}'", other))),
        }
    }
}

/// Convert a user-entered rate to kbit/s.
///
/// The text must be a non-negative integer. Byte rates are truncated toward
/// zero (1 B/s = 1/125 kbit/s).
///
/// # Example
///
/// ```
/// use tcshape::rate::{to_kbit, RateUnit};
///
/// assert_eq!(to_kbit("1", RateUnit::KibibytesPerSec).unwrap(), 8);
/// assert_eq!(to_kbit("1000", RateUnit::BytesPerSec).unwrap(), 8);
/// assert!(to_kbit("-1", RateUnit::BytesPerSec).is_err());
/// ```
pub fn to_kbit(text: &str, unit: RateUnit) -> Result<u64> {
    let s = text.trim();
    if s.is_empty() {
        return Err(Error::invalid("empty rate"));
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid(format!(
            "rate must be a non-negative integer, got '{}'",
            s
        )));
    }

    let value: u64 = s
        .parse()
        .map_err(|_| Error::invalid(format!("rate out of range: {}", s)))?;

    let kbit = match unit {
        RateUnit::BytesPerSec => Some(value / BYTES_PER_KBIT),
        RateUnit::KibibytesPerSec => value.checked_mul(KBIT_PER_KIB),
        RateUnit::MebibytesPerSec => value.checked_mul(KBIT_PER_MIB),
    };

    kbit.ok_or_else(|| Error::invalid(format!("rate out of range: {} {}", s, unit)))
}

/// Convert a kbit/s rate to the given unit for display.
pub fn from_kbit(kbit: u64, unit: RateUnit) -> f64 {
    match unit {
        RateUnit::BytesPerSec => kbit as f64 * BYTES_PER_KBIT as f64,
        RateUnit::KibibytesPerSec => kbit as f64 / KBIT_PER_KIB as f64,
        RateUnit::MebibytesPerSec => kbit as f64 / KBIT_PER_MIB as f64,
    }
}

/// Format a kbit/s rate in the given unit with two decimals.
///
/// ```
/// use tcshape::rate::{format_in, RateUnit};
///
/// assert_eq!(format_in(8, RateUnit::KibibytesPerSec), "1.00 KiB/s");
/// assert_eq!(format_in(8, RateUnit::BytesPerSec), "1000.00 B/s");
/// ```
pub fn format_in(kbit: u64, unit: RateUnit) -> String {
    format!("{:.2} {}", from_kbit(kbit, unit), unit)
}
