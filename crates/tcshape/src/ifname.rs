//! Interface name checks and enumeration.
//!
//! Interface names end up as arguments of privileged commands, so they are
//! checked before anything is spawned.

use std::path::Path;

use crate::error::{Error, Result};

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Validate an interface name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("empty interface name"));
    }

    if name.len() >= IFNAMSIZ {
        return Err(Error::invalid(format!(
            "interface name '{}' too long (max {} chars)",
            name,
            IFNAMSIZ - 1
        )));
    }

    if name.contains('/') || name.contains('\0') {
        return Err(Error::invalid(format!(
            "interface name '{}' contains invalid characters",
            name
        )));
    }

    if name.chars().any(|c| c.is_whitespace()) {
        return Err(Error::invalid(format!(
            "interface name '{}' contains whitespace",
            name
        )));
    }

    // Would be read as an option by ip/tc.
    if name.starts_with('-') {
        return Err(Error::invalid(format!(
            "interface name '{}' starts with '-'",
            name
        )));
    }

    Ok(())
}

/// Get all interface names, sorted.
pub fn list_interfaces() -> Result<Vec<String>> {
    list_dir(Path::new(SYS_CLASS_NET))
}

fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();

    names.sort();
    Ok(names)
}

/// Returns true if the interface is visible in `/sys/class/net`.
pub fn exists(name: &str) -> bool {
    validate(name).is_ok() && Path::new(SYS_CLASS_NET).join(name).exists()
}
