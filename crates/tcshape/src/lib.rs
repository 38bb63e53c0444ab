//! Upload and download rate limiting for Linux interfaces.
//!
//! This crate drives `tc` and `ip` to put a flat token-bucket (tbf) limit on
//! each direction of an interface, and reads the active limits back.
//!
//! Upload is shaped by a tbf qdisc at the interface root. Download is
//! redirected through an IFB device and shaped on the IFB's egress path,
//! since the kernel only shapes outgoing traffic.
//!
//! # Features
//!
//! - `testing` - Scripted and in-memory command runners for tests
//!
//! # Example
//!
//! ```ignore
//! use tcshape::{Shaper, SystemRunner};
//! use tcshape::rate::RateUnit;
//!
//! #[tokio::main]
//! async fn main() -> tcshape::Result<()> {
//!     let shaper = Shaper::new(SystemRunner::new());
//!
//!     shaper.apply_rate("eth0", "512", RateUnit::KibibytesPerSec).await?;
//!
//!     let status = shaper
//!         .status_reader()
//!         .query("eth0", RateUnit::KibibytesPerSec)
//!         .await?;
//!     println!("{}", status);
//!     // Upload: 4096 kbit (512.00 KiB/s) | Download: 4096 kbit (512.00 KiB/s)
//!
//!     shaper.clear("eth0").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod ifb;
pub mod ifname;
pub mod rate;
pub mod shaper;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ApplyPolicy, ShaperConfig};
pub use error::{Error, Result};
pub use exec::{CommandLine, CommandRunner, Output, SystemRunner};
pub use ifb::IfbDevice;
pub use rate::RateUnit;
pub use shaper::{Limits, Report, Shaper};
pub use status::{LimiterStatus, StatusReader};
