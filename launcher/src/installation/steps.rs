//! Boundary between the install script and the OS-specific mechanics.
//!
//! Checks answer `Ok(true)`/`Ok(false)`; `Err` means the check itself could not run.
//! Both a `false` from a required check and any `Err` stop the installation.

use anyhow::Result;

use crate::models::state::RunnableState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WslOutcome {
    pub reboot_required: bool,
}

pub trait InstallSteps: Send + Sync {
    /// OS is recent enough to run the container runtime.
    fn check_windows_version(&self) -> Result<bool>;
    /// Hardware virtualization is available and enabled.
    fn check_virtualization(&self) -> Result<bool>;
    fn is_runtime_installed(&self) -> Result<bool>;
    fn is_wsl_enabled(&self) -> Result<bool>;
    fn enable_wsl(&self) -> Result<WslOutcome>;
    /// Copy the launcher into its install location and register it.
    fn install_executable(&self) -> Result<()>;
    fn download_files(&self) -> Result<()>;
    fn install_wsl_update(&self) -> Result<()>;
    fn install_runtime(&self) -> Result<()>;
    /// Current user may talk to the runtime daemon.
    fn check_group_membership(&self) -> Result<bool>;
}

/// Status probes for the two supervised services.
pub trait RuntimeProbe: Send + Sync {
    fn docker_state(&self) -> RunnableState;
    fn container_state(&self) -> RunnableState;
}
