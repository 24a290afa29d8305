use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// First Windows 10 build that ships WSL 2 (version 2004).
pub const MIN_WSL2_BUILD: u32 = 19041;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystem {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

/// Detect the current operating system
pub fn detect_os() -> OperatingSystem {
    if cfg!(target_os = "windows") {
        OperatingSystem::Windows
    } else if cfg!(target_os = "linux") {
        OperatingSystem::Linux
    } else if cfg!(target_os = "macos") {
        OperatingSystem::MacOs
    } else {
        OperatingSystem::Unknown
    }
}

/// Get OS name as string
pub fn get_os_name() -> String {
    match detect_os() {
        OperatingSystem::Windows => "Windows".to_string(),
        OperatingSystem::Linux => "Linux".to_string(),
        OperatingSystem::MacOs => "macOS".to_string(),
        OperatingSystem::Unknown => "Unknown".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl WindowsVersion {
    pub fn supports_wsl2(&self) -> bool {
        self.major > 10 || (self.major == 10 && self.build >= MIN_WSL2_BUILD)
    }
}

fn windows_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)version\s+(\d+)\.(\d+)\.(\d+)").expect("static regex is valid")
    })
}

/// Parse `ver` output, e.g. `Microsoft Windows [Version 10.0.19044.2604]`.
pub fn parse_windows_version(output: &str) -> Option<WindowsVersion> {
    let caps = windows_version_re().captures(output)?;
    Some(WindowsVersion {
        major: caps.get(1)?.as_str().parse().ok()?,
        minor: caps.get(2)?.as_str().parse().ok()?,
        build: caps.get(3)?.as_str().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ver_output() {
        let v = parse_windows_version("\r\nMicrosoft Windows [Version 10.0.19044.2604]\r\n").unwrap();
        assert_eq!(
            v,
            WindowsVersion {
                major: 10,
                minor: 0,
                build: 19044
            }
        );
        assert!(v.supports_wsl2());
    }

    #[test]
    fn old_builds_do_not_support_wsl2() {
        let v = parse_windows_version("Microsoft Windows [Version 10.0.17763.1]").unwrap();
        assert!(!v.supports_wsl2());
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(parse_windows_version("command not found").is_none());
    }

    #[test]
    fn os_name_matches_detection() {
        let name = get_os_name();
        match detect_os() {
            OperatingSystem::Linux => assert_eq!(name, "Linux"),
            OperatingSystem::Windows => assert_eq!(name, "Windows"),
            OperatingSystem::MacOs => assert_eq!(name, "macOS"),
            OperatingSystem::Unknown => assert_eq!(name, "Unknown"),
        }
    }
}
