//! tcshape command implementations.

pub mod apply;
pub mod clear;
pub mod interfaces;
pub mod status;

use tcshape::{Shaper, ShaperConfig, SystemRunner, ifname};

/// Build a shaper for a state-changing command.
fn shaper(config: &ShaperConfig, dev: &str) -> tcshape::Result<Shaper<SystemRunner>> {
    ifname::validate(dev)?;
    if config.privilege.is_empty() && unsafe { libc::geteuid() } != 0 {
        tracing::warn!(
            "not running as root and no privilege prefix set; changes will likely fail"
        );
    }
    if !ifname::exists(dev) {
        tracing::warn!(interface = dev, "interface not found in /sys/class/net");
    }
    Ok(Shaper::with_config(config.runner(), config.clone()))
}
