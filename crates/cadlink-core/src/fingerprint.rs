//! Machine fingerprinting.
//!
//! The fingerprint is a SHA-256 over stable machine attributes (hostname,
//! OS family and version, logical CPU count) followed by whatever deeper
//! hardware identifiers the platform exposes. Hardware probes are best
//! effort; when none succeed the stable attributes alone are hashed.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use cadlink_crypto::hash::sha256_joined;

const FINGERPRINT_HEX_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fingerprint must be {FINGERPRINT_HEX_LEN} hex characters")]
pub struct InvalidFingerprint;

/// Hex-encoded SHA-256 identifying a machine.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FingerprintId(String);

impl FingerprintId {
    pub fn from_hex(hex: impl Into<String>) -> Result<Self, InvalidFingerprint> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != FINGERPRINT_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidFingerprint);
        }
        Ok(Self(hex))
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Full hex digest, as sent to the license authority.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs and UI, e.g. `3F2A-9C01-77B4-E0D2`.
    pub fn display(&self) -> String {
        self.0[..16]
            .to_ascii_uppercase()
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl TryFrom<String> for FingerprintId {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}

impl From<FingerprintId> for String {
    fn from(id: FingerprintId) -> Self {
        id.0
    }
}

impl fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl fmt::Debug for FingerprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintId({})", self.display())
    }
}

/// Something that can report the current machine fingerprint.
pub trait FingerprintSource: Send + Sync {
    fn current(&self) -> FingerprintId;
}

/// Fingerprint of the running machine, computed once and cached.
#[derive(Default)]
pub struct MachineFingerprint {
    stable_only: bool,
    cached: OnceLock<FingerprintId>,
}

impl MachineFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip hardware probes and hash the stable attributes only.
    pub fn stable_only() -> Self {
        Self {
            stable_only: true,
            cached: OnceLock::new(),
        }
    }

    fn compute(&self) -> FingerprintId {
        let mut parts = stable_attributes();
        if !self.stable_only {
            let hardware = hardware_identifiers();
            debug!(probes = hardware.len(), "collected hardware identifiers");
            parts.extend(hardware);
        }
        FingerprintId::from_digest(sha256_joined(&parts))
    }
}

impl FingerprintSource for MachineFingerprint {
    fn current(&self) -> FingerprintId {
        self.cached.get_or_init(|| self.compute()).clone()
    }
}

/// Hostname, OS family, OS version and logical CPU count.
pub fn stable_attributes() -> Vec<String> {
    vec![
        hostname(),
        std::env::consts::OS.to_string(),
        os_version(),
        logical_cpus().to_string(),
    ]
}

fn logical_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ============================================================================
// Platform probes
// ============================================================================

#[cfg(windows)]
fn hostname() -> String {
    cadlink_platform_win::system_info::computer_name()
}

#[cfg(windows)]
fn os_version() -> String {
    cadlink_platform_win::system_info::windows_version()
}

#[cfg(windows)]
pub fn hardware_identifiers() -> Vec<String> {
    cadlink_platform_win::SystemIdentity::collect().hardware_ids
}

#[cfg(unix)]
fn hostname() -> String {
    read_trimmed("/proc/sys/kernel/hostname")
        .or_else(|| read_trimmed("/etc/hostname"))
        .or_else(|| command_output("uname", &["-n"]))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn os_version() -> String {
    read_trimmed("/proc/sys/kernel/osrelease")
        .or_else(|| command_output("uname", &["-r"]))
        .unwrap_or_default()
}

#[cfg(target_os = "macos")]
fn os_version() -> String {
    command_output("sw_vers", &["-productVersion"]).unwrap_or_default()
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
fn os_version() -> String {
    command_output("uname", &["-r"]).unwrap_or_default()
}

/// Machine id, system UUID and board serial where readable.
#[cfg(target_os = "linux")]
pub fn hardware_identifiers() -> Vec<String> {
    [
        "/etc/machine-id",
        "/sys/class/dmi/id/product_uuid",
        "/sys/class/dmi/id/board_serial",
    ]
    .iter()
    .filter_map(|path| read_trimmed(path))
    .collect()
}

/// Platform UUID and serial number from the IOPlatformExpertDevice.
#[cfg(target_os = "macos")]
pub fn hardware_identifiers() -> Vec<String> {
    let Some(output) = command_output("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]) else {
        return Vec::new();
    };
    ["IOPlatformUUID", "IOPlatformSerialNumber"]
        .iter()
        .filter_map(|key| ioreg_value(&output, key))
        .collect()
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
pub fn hardware_identifiers() -> Vec<String> {
    Vec::new()
}

#[cfg(target_os = "macos")]
fn ioreg_value(output: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let line = output.lines().find(|l| l.contains(&needle))?;
    let value = line.split('=').nth(1)?.trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(unix)]
fn read_trimmed(path: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(unix)]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        debug!(program, "probe command failed");
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
