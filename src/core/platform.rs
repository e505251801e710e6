//! Operating system / architecture pairs and per-platform variant tables.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Key matching any OS or any architecture in a variant table.
pub const WILDCARD: &str = "<others>";

/// An (OS, architecture) build target.
///
/// Names follow the manifest vocabulary (`linux`, `darwin`, `windows`,
/// `solaris`; `amd64`, `aarch64`, `sparcv9`), so Rust's own names for the
/// host are translated on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    /// Create a platform, normalizing common aliases.
    pub fn new(os: impl AsRef<str>, arch: impl AsRef<str>) -> Self {
        Platform {
            os: normalize_os(os.as_ref()),
            arch: normalize_arch(arch.as_ref()),
        }
    }

    /// The platform this process is running on.
    pub fn host() -> Self {
        Platform::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Platform::new(os, arch)),
            _ => bail!("invalid platform `{}` (expected `os/arch`, e.g. `linux/amd64`)", s),
        }
    }
}

fn normalize_os(os: &str) -> String {
    let os = os.trim().to_ascii_lowercase();
    match os.as_str() {
        "macos" | "osx" => "darwin".to_string(),
        "win32" => "windows".to_string(),
        _ => os,
    }
}

fn normalize_arch(arch: &str) -> String {
    let arch = arch.trim().to_ascii_lowercase();
    match arch.as_str() {
        "x86_64" | "x64" => "amd64".to_string(),
        "arm64" => "aarch64".to_string(),
        "sparc64" => "sparcv9".to_string(),
        _ => arch,
    }
}

/// Per-platform payloads of a node, keyed by OS then architecture.
///
/// Lookup is a single table probe in fixed precedence: exact pair, then the
/// OS with a wildcard architecture, then a wildcard OS with the exact
/// architecture, then the full wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantTable<T> {
    entries: Vec<(String, String, T)>,
}

impl<T> VariantTable<T> {
    pub fn new() -> Self {
        VariantTable {
            entries: Vec::new(),
        }
    }

    /// Add a variant. Keys other than [`WILDCARD`] are normalized like
    /// [`Platform`] names. Returns `false` if the key already exists.
    pub fn insert(&mut self, os: &str, arch: &str, payload: T) -> bool {
        let os = if os == WILDCARD {
            WILDCARD.to_string()
        } else {
            normalize_os(os)
        };
        let arch = if arch == WILDCARD {
            WILDCARD.to_string()
        } else {
            normalize_arch(arch)
        };
        if self.entries.iter().any(|(o, a, _)| *o == os && *a == arch) {
            return false;
        }
        self.entries.push((os, arch, payload));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Select the payload for `platform`.
    pub fn select(&self, platform: &Platform) -> Option<&T> {
        let probes = [
            (platform.os(), platform.arch()),
            (platform.os(), WILDCARD),
            (WILDCARD, platform.arch()),
            (WILDCARD, WILDCARD),
        ];
        probes.iter().find_map(|(os, arch)| self.get(os, arch))
    }

    fn get(&self, os: &str, arch: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(o, a, _)| o == os && a == arch)
            .map(|(_, _, payload)| payload)
    }

    /// Declared keys as `os/arch` strings, in declaration order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(os, arch, _)| format!("{}/{}", os, arch))
            .collect()
    }

    /// Iterate over all payloads.
    pub fn payloads(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, _, payload)| payload)
    }
}

impl<T> Default for VariantTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
