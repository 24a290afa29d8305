// OS-backed install steps.
//
// Windows gets the full sequence (WSL, WSL kernel update, Docker Desktop, docker-users
// group). Elsewhere the WSL steps are no-ops and the container runtime must already be
// installed through the system package manager.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tokio::time::Duration;

use crate::installation::docker;
use crate::installation::download::{download_artifact, file_name_from_url, Artifact};
use crate::installation::{run_cmd, run_installer};
use crate::installation::steps::{InstallSteps, RuntimeProbe, WslOutcome};
use crate::models::state::RunnableState;
use crate::utils::os_detection::{detect_os, parse_windows_version, OperatingSystem};
use crate::utils::path_resolver::{resolve_download_folder, resolve_install_folder};
use crate::utils::settings::LauncherSettings;

/// `dism` / `msiexec` exit code for "succeeded, reboot required".
const EXIT_REBOOT_REQUIRED: i32 = 3010;
const WINDOWS_DOCKER_GROUP: &str = "docker-users";
const UNIX_DOCKER_GROUP: &str = "docker";

pub struct SystemSteps {
    rt: Runtime,
    settings: LauncherSettings,
    download_dir: PathBuf,
    os: OperatingSystem,
}

impl SystemSteps {
    pub fn new(settings: LauncherSettings) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create installer runtime")?;
        let download_dir = resolve_download_folder(settings.download_dir.as_deref())?;
        Ok(Self {
            rt,
            settings,
            download_dir,
            os: detect_os(),
        })
    }

    fn is_windows(&self) -> bool {
        self.os == OperatingSystem::Windows
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.command_timeout_secs)
    }

    fn docker_installer(&self) -> Artifact {
        Artifact {
            url: self.settings.docker_installer_url.clone(),
            sha256: self.settings.docker_installer_sha256.clone(),
        }
    }

    fn wsl_update(&self) -> Artifact {
        Artifact {
            url: self.settings.wsl_update_url.clone(),
            sha256: self.settings.wsl_update_sha256.clone(),
        }
    }

    fn artifact_path(&self, artifact: &Artifact) -> Result<PathBuf> {
        Ok(self.download_dir.join(file_name_from_url(&artifact.url)?))
    }

    fn enable_windows_feature(&self, feature: &str) -> Result<bool> {
        let feature_arg = format!("/featurename:{}", feature);
        let out = self.rt.block_on(run_installer(
            "dism.exe",
            &["/online", "/enable-feature", &feature_arg, "/all", "/norestart"],
            self.timeout(),
            "dism_enable_feature",
        ))?;
        match out.exit_code {
            Some(0) => Ok(false),
            Some(EXIT_REBOOT_REQUIRED) => Ok(true),
            code => anyhow::bail!(
                "Enabling Windows feature {} failed (exit_code={:?}): {}",
                feature,
                code,
                out.stdout.trim()
            ),
        }
    }
}

/// `systeminfo` reports either firmware virtualization or a running hypervisor.
pub fn parse_systeminfo_virtualization(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("a hypervisor has been detected")
        || lower
            .lines()
            .any(|l| l.contains("virtualization enabled in firmware") && l.contains("yes"))
}

/// `id -nG` output contains `group`.
pub fn parse_group_list(output: &str, group: &str) -> bool {
    output.split_whitespace().any(|g| g == group)
}

/// `net localgroup <group>` member listing contains `user` (case-insensitive).
pub fn parse_localgroup_members(output: &str, user: &str) -> bool {
    let user = user.to_ascii_lowercase();
    output.lines().any(|l| {
        let member = l.trim().to_ascii_lowercase();
        member == user || member.ends_with(&format!("\\{}", user))
    })
}

impl InstallSteps for SystemSteps {
    fn check_windows_version(&self) -> Result<bool> {
        if !self.is_windows() {
            info!("[PHASE: install] [STEP: os_version] Not Windows; version check not applicable");
            return Ok(true);
        }
        let out = self
            .rt
            .block_on(run_cmd("cmd", &["/C", "ver"], self.timeout(), "windows_ver"))?;
        let version = parse_windows_version(&out.stdout)
            .ok_or_else(|| anyhow::anyhow!("Unable to parse Windows version: {}", out.stdout.trim()))?;
        info!(
            "[PHASE: install] [STEP: os_version] Windows {}.{} build {}",
            version.major, version.minor, version.build
        );
        Ok(version.supports_wsl2())
    }

    fn check_virtualization(&self) -> Result<bool> {
        if !self.is_windows() {
            return Ok(true);
        }
        let out = self
            .rt
            .block_on(run_cmd("systeminfo", &[], self.timeout(), "systeminfo"))?;
        Ok(parse_systeminfo_virtualization(&out.stdout))
    }

    fn is_runtime_installed(&self) -> Result<bool> {
        if docker::find_docker_cli().is_none() {
            return Ok(false);
        }
        match self.rt.block_on(docker::get_docker_version()) {
            Ok(v) => {
                info!("[PHASE: install] [STEP: runtime] Found {}", v.raw);
                Ok(true)
            }
            Err(e) => {
                debug!("[PHASE: install] [STEP: runtime] docker CLI present but unusable: {}", e);
                Ok(false)
            }
        }
    }

    fn is_wsl_enabled(&self) -> Result<bool> {
        if !self.is_windows() {
            return Ok(true);
        }
        let out = self
            .rt
            .block_on(run_cmd("wsl", &["--status"], self.timeout(), "wsl_status"));
        Ok(matches!(out, Ok(o) if o.success()))
    }

    fn enable_wsl(&self) -> Result<WslOutcome> {
        if !self.is_windows() {
            return Ok(WslOutcome::default());
        }
        let subsystem = self.enable_windows_feature("Microsoft-Windows-Subsystem-Linux")?;
        let platform = self.enable_windows_feature("VirtualMachinePlatform")?;
        Ok(WslOutcome {
            reboot_required: subsystem || platform,
        })
    }

    fn install_executable(&self) -> Result<()> {
        let current = std::env::current_exe().context("Unable to locate the running executable")?;
        let file_name = current
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Executable path has no file name"))?;
        let bin_dir = resolve_install_folder()?;
        let target = bin_dir.join(file_name);

        if same_file(&current, &target) {
            info!("[PHASE: install] [STEP: executable] Already running from {:?}", target);
            return Ok(());
        }
        std::fs::create_dir_all(&bin_dir)
            .with_context(|| format!("create {:?}", bin_dir))?;
        std::fs::copy(&current, &target)
            .with_context(|| format!("copy {:?} -> {:?}", current, target))?;
        info!("[PHASE: install] [STEP: executable] Installed launcher to {:?}", target);
        Ok(())
    }

    fn download_files(&self) -> Result<()> {
        if !self.is_windows() {
            return Ok(());
        }
        for artifact in [self.docker_installer(), self.wsl_update()] {
            self.rt
                .block_on(download_artifact(&artifact, &self.download_dir, self.timeout()))?;
        }
        Ok(())
    }

    fn install_wsl_update(&self) -> Result<()> {
        if !self.is_windows() {
            return Ok(());
        }
        let msi = self.artifact_path(&self.wsl_update())?;
        let msi = msi.to_string_lossy().to_string();
        let out = self.rt.block_on(run_installer(
            "msiexec",
            &["/i", &msi, "/quiet", "/norestart"],
            self.timeout(),
            "wsl_update",
        ))?;
        match out.exit_code {
            Some(0) | Some(EXIT_REBOOT_REQUIRED) => Ok(()),
            code => anyhow::bail!("WSL update installer failed (exit_code={:?})", code),
        }
    }

    fn install_runtime(&self) -> Result<()> {
        if !self.is_windows() {
            anyhow::bail!(
                "Docker is not installed. Install Docker Engine with your package manager and restart the launcher."
            );
        }
        let installer = self.artifact_path(&self.docker_installer())?;
        let installer = installer.to_string_lossy().to_string();
        let out = self.rt.block_on(run_installer(
            &installer,
            &["install", "--quiet", "--accept-license"],
            self.timeout(),
            "docker_install",
        ))?;
        if !out.success() {
            anyhow::bail!(
                "Docker installer failed (exit_code={:?}): {}",
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(())
    }

    fn check_group_membership(&self) -> Result<bool> {
        if !self.is_windows() {
            let out = self
                .rt
                .block_on(run_cmd("id", &["-nG"], self.timeout(), "id_groups"))?;
            let member = parse_group_list(&out.stdout, UNIX_DOCKER_GROUP)
                || parse_group_list(&out.stdout, "root");
            if !member {
                warn!(
                    "[PHASE: install] [STEP: group] Current user is not in the '{}' group",
                    UNIX_DOCKER_GROUP
                );
            }
            return Ok(member);
        }

        let user = std::env::var("USERNAME").context("USERNAME is not set")?;
        let out = self.rt.block_on(run_cmd(
            "net",
            &["localgroup", WINDOWS_DOCKER_GROUP],
            self.timeout(),
            "net_localgroup",
        ))?;
        if parse_localgroup_members(&out.stdout, &user) {
            return Ok(true);
        }

        info!(
            "[PHASE: install] [STEP: group] Adding {} to {}",
            user, WINDOWS_DOCKER_GROUP
        );
        let out = self.rt.block_on(run_installer(
            "net",
            &["localgroup", WINDOWS_DOCKER_GROUP, &user, "/add"],
            self.timeout(),
            "net_localgroup_add",
        ))?;
        Ok(out.success())
    }
}

impl RuntimeProbe for SystemSteps {
    fn docker_state(&self) -> RunnableState {
        if docker::find_docker_cli().is_none() {
            return RunnableState::Stopped;
        }
        if self.rt.block_on(docker::is_docker_daemon_running()) {
            RunnableState::Running
        } else {
            RunnableState::Stopped
        }
    }

    fn container_state(&self) -> RunnableState {
        self.rt
            .block_on(docker::container_state(&self.settings.container_name))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systeminfo_virtualization_detection() {
        let enabled = "Hyper-V Requirements:      VM Monitor Mode Extensions: Yes\n                           Virtualization Enabled In Firmware: Yes\n";
        assert!(parse_systeminfo_virtualization(enabled));

        let hypervisor =
            "Hyper-V Requirements:      A hypervisor has been detected. Features required for Hyper-V will not be displayed.";
        assert!(parse_systeminfo_virtualization(hypervisor));

        let disabled = "                           Virtualization Enabled In Firmware: No\n";
        assert!(!parse_systeminfo_virtualization(disabled));
    }

    #[test]
    fn group_list_parsing() {
        assert!(parse_group_list("alice adm docker sudo\n", "docker"));
        assert!(!parse_group_list("alice adm dockerish sudo\n", "docker"));
    }

    #[test]
    fn localgroup_member_parsing() {
        let out = "Alias name     docker-users\nComment\n\nMembers\n\n-------------------------------------------------------------------------------\nDESKTOP-1\\Alice\nThe command completed successfully.\n";
        assert!(parse_localgroup_members(out, "alice"));
        assert!(!parse_localgroup_members(out, "bob"));
    }

    #[test]
    fn same_file_requires_both_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::write(&a, b"x").unwrap();
        assert!(same_file(&a, &a));
        assert!(!same_file(&a, &dir.path().join("b")));
    }
}
