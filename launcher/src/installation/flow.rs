// Installation script
//
// Runs on the worker thread. Each step reports through the model (stage flags, status
// text, modal state) and the script parks on the acknowledgment gate whenever a modal
// needs the user. Closing the gate (exit requested) ends the script early.

use anyhow::Result;
use log::{error, info, warn};

use crate::coordination::GateError;
use crate::installation::steps::InstallSteps;
use crate::models::state::{LauncherModel, ModalState, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    AlreadyInstalled,
    Installed,
    RebootRequired,
    Failed(String),
    Aborted,
}

#[derive(Debug)]
enum FlowStop {
    Aborted,
    Failed(String),
}

impl From<GateError> for FlowStop {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Closed => FlowStop::Aborted,
            other => FlowStop::Failed(other.to_string()),
        }
    }
}

pub fn run_install_flow(model: &LauncherModel, steps: &dyn InstallSteps) -> FlowOutcome {
    info!("[PHASE: install] [STEP: start] Installation flow started");
    match drive(model, steps) {
        Ok(outcome) => {
            info!(
                "[PHASE: install] [STEP: done] Installation flow finished: {:?}",
                outcome
            );
            outcome
        }
        Err(FlowStop::Aborted) => {
            warn!("[PHASE: install] [STEP: abort] Installation aborted by exit request");
            FlowOutcome::Aborted
        }
        Err(FlowStop::Failed(message)) => report_failure(model, message),
    }
}

/// Show `message` in the error modal, wait for it to be dismissed, then request exit.
pub fn report_failure(model: &LauncherModel, message: String) -> FlowOutcome {
    error!("[PHASE: install] [STEP: failed] {}", message);
    model.set_status(message.clone());
    model.switch_state(ModalState::InstallError);
    if let Err(e) = model.wait_dialogue_complete() {
        info!(
            "[PHASE: install] [STEP: failed] Error dialogue not acknowledged: {}",
            e
        );
    }
    model.request_exit();
    FlowOutcome::Failed(message)
}

fn drive(model: &LauncherModel, steps: &dyn InstallSteps) -> Result<FlowOutcome, FlowStop> {
    model.switch_state(ModalState::Initial);

    require(model, Stage::CheckWindowsVersion, "Checking Windows version", || {
        steps.check_windows_version()
    })?;
    require(model, Stage::CheckVTx, "Checking virtualization support", || {
        steps.check_virtualization()
    })?;

    let runtime_installed = step(model, "Looking for Docker", || steps.is_runtime_installed())?;
    let wsl_enabled = step(model, "Checking WSL", || steps.is_wsl_enabled())?;
    if runtime_installed && wsl_enabled {
        model.set_status("Docker is already installed");
        return Ok(FlowOutcome::AlreadyInstalled);
    }

    if !model.install_stage2() {
        model.switch_state(ModalState::InstallNeeded);
        model.wait_dialogue_complete()?;
    }

    model.switch_state(ModalState::InstallInProgress);

    let wsl = step(model, "Enabling WSL", || steps.enable_wsl())?;
    model.mark_stage(Stage::EnableWsl);

    step(model, "Installing launcher", || steps.install_executable())?;
    model.mark_stage(Stage::InstallExecutable);

    if wsl.reboot_required {
        model.mark_stage(Stage::RebootAfterWslEnable);
        model.set_status("Reboot required to finish enabling WSL");
        model.switch_state(ModalState::InstallFinished);
        model.wait_dialogue_complete()?;
        return Ok(FlowOutcome::RebootRequired);
    }

    step(model, "Downloading files", || steps.download_files())?;
    model.mark_stage(Stage::DownloadFiles);

    step(model, "Installing WSL update", || steps.install_wsl_update())?;
    model.mark_stage(Stage::InstallWslUpdate);

    step(model, "Installing Docker", || steps.install_runtime())?;
    model.mark_stage(Stage::InstallDocker);

    require(model, Stage::CheckGroupMembership, "Checking group membership", || {
        steps.check_group_membership()
    })?;

    model.set_status("Installation succeeded");
    model.switch_state(ModalState::InstallFinished);
    model.wait_dialogue_complete()?;
    model.switch_state(ModalState::Initial);
    Ok(FlowOutcome::Installed)
}

fn ensure_running(model: &LauncherModel) -> Result<(), FlowStop> {
    if model.is_exiting() || model.exit_requested() || model.gate().is_closed() {
        return Err(FlowStop::Aborted);
    }
    Ok(())
}

fn step<T>(
    model: &LauncherModel,
    label: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T, FlowStop> {
    ensure_running(model)?;
    model.set_status(format!("{}...", label));
    info!("[PHASE: install] [STEP: step] {}", label);
    f().map_err(|e| FlowStop::Failed(format!("{} failed: {:#}", label, e)))
}

/// A check whose `false` answer is fatal.
fn require(
    model: &LauncherModel,
    stage: Stage,
    label: &str,
    f: impl FnOnce() -> Result<bool>,
) -> Result<(), FlowStop> {
    if !step(model, label, f)? {
        return Err(FlowStop::Failed(format!("{} failed", label)));
    }
    model.mark_stage(stage);
    Ok(())
}
