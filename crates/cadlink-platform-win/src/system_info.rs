#![cfg(windows)]
#![allow(unsafe_code)] // Windows API calls require unsafe.

use std::process::Command;

use windows::Win32::System::SystemInformation::*;

/// Machine attributes used for fingerprinting and key derivation.
#[derive(Debug, Clone, Default)]
pub struct SystemIdentity {
    pub computer_name: String,
    pub windows_version: String,
    /// Deep hardware identifiers; empty when the probes are unavailable.
    pub hardware_ids: Vec<String>,
}

impl SystemIdentity {
    /// Collect only the stable attributes (no process spawning).
    pub fn basic() -> Self {
        Self {
            computer_name: computer_name(),
            windows_version: windows_version(),
            hardware_ids: Vec::new(),
        }
    }

    /// Collect stable attributes plus CPU id, board serial and system UUID.
    pub fn collect() -> Self {
        let mut identity = Self::basic();
        identity.hardware_ids = hardware_ids();
        identity
    }
}

pub fn computer_name() -> String {
    unsafe {
        let mut buf = [0u16; 256];
        let mut size = buf.len() as u32;
        let ok = GetComputerNameExW(
            ComputerNamePhysicalNetBIOS,
            Some(windows::core::PWSTR(buf.as_mut_ptr())),
            &mut size,
        );
        if ok.is_err() {
            return std::env::var("COMPUTERNAME").unwrap_or_default();
        }
        String::from_utf16_lossy(&buf[..size as usize])
    }
}

pub fn windows_version() -> String {
    unsafe {
        let mut version_info = OSVERSIONINFOW {
            dwOSVersionInfoSize: std::mem::size_of::<OSVERSIONINFOW>() as u32,
            ..Default::default()
        };
        let _ = GetVersionExW(&mut version_info);

        format!(
            "{}.{}.{}",
            version_info.dwMajorVersion, version_info.dwMinorVersion, version_info.dwBuildNumber
        )
    }
}

fn hardware_ids() -> Vec<String> {
    let probes: [(&str, &str); 3] = [
        ("cpu", "ProcessorId"),
        ("baseboard", "SerialNumber"),
        ("csproduct", "UUID"),
    ];

    probes
        .iter()
        .filter_map(|(class, field)| wmic_value(class, field))
        .collect()
}

fn wmic_value(class: &str, field: &str) -> Option<String> {
    let output = Command::new("wmic").args([class, "get", field]).output();
    let output = match output {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            tracing::debug!(class, field, status = ?o.status, "wmic probe failed");
            return None;
        }
        Err(e) => {
            tracing::debug!(class, field, error = %e, "wmic unavailable");
            return None;
        }
    };

    // First line is the column header.
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
