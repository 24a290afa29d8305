// Launcher model (in-memory, process lifetime)
//
// One explicitly constructed context shared (via Arc) by the install worker and the
// presentation surface. Every mutation is followed by a publish on the event bus;
// observers never poll, they re-read `snapshot()` when told something changed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::Serialize;

use crate::coordination::{AckGate, GateError, UiDispatcher};
use crate::events::{EventBus, LauncherEvent};
use crate::models::preferences::InstallPreference;

/// Which prompt/screen is authoritative right now. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalState {
    /// Idle: nothing to confirm.
    #[default]
    Initial,
    /// Waiting for the user to confirm the installation.
    InstallNeeded,
    InstallInProgress,
    /// Installation (or its first stage) finished; waiting for acknowledgment.
    InstallFinished,
    /// Terminal: the session is exiting once this is entered.
    InstallError,
}

impl ModalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModalState::Initial => "initial",
            ModalState::InstallNeeded => "install_needed",
            ModalState::InstallInProgress => "install_in_progress",
            ModalState::InstallFinished => "install_finished",
            ModalState::InstallError => "install_error",
        }
    }

    /// States in which the worker is parked on the acknowledgment gate.
    pub fn awaits_acknowledgment(&self) -> bool {
        matches!(
            self,
            ModalState::InstallNeeded | ModalState::InstallFinished | ModalState::InstallError
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "initial" | "idle" => Some(ModalState::Initial),
            "install_needed" | "confirm" => Some(ModalState::InstallNeeded),
            "install_in_progress" | "progress" => Some(ModalState::InstallInProgress),
            "install_finished" | "finished" => Some(ModalState::InstallFinished),
            "install_error" | "error" => Some(ModalState::InstallError),
            _ => None,
        }
    }
}

impl fmt::Display for ModalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete installation step. Each has a monotonic completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CheckWindowsVersion,
    CheckVTx,
    EnableWsl,
    InstallExecutable,
    RebootAfterWslEnable,
    DownloadFiles,
    InstallWslUpdate,
    InstallDocker,
    CheckGroupMembership,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::CheckWindowsVersion,
        Stage::CheckVTx,
        Stage::EnableWsl,
        Stage::InstallExecutable,
        Stage::RebootAfterWslEnable,
        Stage::DownloadFiles,
        Stage::InstallWslUpdate,
        Stage::InstallDocker,
        Stage::CheckGroupMembership,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::CheckWindowsVersion => "Check Windows version",
            Stage::CheckVTx => "Check VT-x",
            Stage::EnableWsl => "Enable WSL",
            Stage::InstallExecutable => "Install executable",
            Stage::RebootAfterWslEnable => "Reboot after WSL enable",
            Stage::DownloadFiles => "Download files",
            Stage::InstallWslUpdate => "Install WSL update",
            Stage::InstallDocker => "Install Docker",
            Stage::CheckGroupMembership => "Check group membership",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageFlags {
    pub check_windows_version: bool,
    pub check_vtx: bool,
    pub enable_wsl: bool,
    pub install_executable: bool,
    pub reboot_after_wsl_enable: bool,
    pub download_files: bool,
    pub install_wsl_update: bool,
    pub install_docker: bool,
    pub check_group_membership: bool,
    pub installation_status: String,
}

impl StageFlags {
    fn slot(&mut self, stage: Stage) -> &mut bool {
        match stage {
            Stage::CheckWindowsVersion => &mut self.check_windows_version,
            Stage::CheckVTx => &mut self.check_vtx,
            Stage::EnableWsl => &mut self.enable_wsl,
            Stage::InstallExecutable => &mut self.install_executable,
            Stage::RebootAfterWslEnable => &mut self.reboot_after_wsl_enable,
            Stage::DownloadFiles => &mut self.download_files,
            Stage::InstallWslUpdate => &mut self.install_wsl_update,
            Stage::InstallDocker => &mut self.install_docker,
            Stage::CheckGroupMembership => &mut self.check_group_membership,
        }
    }

    pub fn is_set(&self, stage: Stage) -> bool {
        match stage {
            Stage::CheckWindowsVersion => self.check_windows_version,
            Stage::CheckVTx => self.check_vtx,
            Stage::EnableWsl => self.enable_wsl,
            Stage::InstallExecutable => self.install_executable,
            Stage::RebootAfterWslEnable => self.reboot_after_wsl_enable,
            Stage::DownloadFiles => self.download_files,
            Stage::InstallWslUpdate => self.install_wsl_update,
            Stage::InstallDocker => self.install_docker,
            Stage::CheckGroupMembership => self.check_group_membership,
        }
    }

    /// Flags only ever go from false to true. Returns true if this call flipped it.
    pub fn set(&mut self, stage: Stage) -> bool {
        let slot = self.slot(stage);
        let changed = !*slot;
        *slot = true;
        changed
    }

    pub fn completed(&self) -> usize {
        Stage::ALL.iter().filter(|s| self.is_set(**s)).count()
    }
}

/// Status of a supervised background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableState {
    #[default]
    Unknown,
    Stopped,
    Starting,
    Running,
    Failed,
}

impl RunnableState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnableState::Unknown => "unknown",
            RunnableState::Stopped => "stopped",
            RunnableState::Starting => "starting",
            RunnableState::Running => "running",
            RunnableState::Failed => "failed",
        }
    }
}

/// The two services the launcher watches once installation is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Docker,
    Container,
}

/// Consistent copy of everything a surface renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    pub state: ModalState,
    pub flags: StageFlags,
    pub docker: RunnableState,
    pub container: RunnableState,
    pub preference: InstallPreference,
    pub install_stage2: bool,
}

#[derive(Debug, Default)]
struct ModelInner {
    state: ModalState,
    flags: StageFlags,
    docker: RunnableState,
    container: RunnableState,
    preference: InstallPreference,
    install_stage2: bool,
}

/// Installer state machine + shared model.
///
/// Transitions are unrestricted: the install script decides the order.
/// None of the operations fail; a missing subscriber or rendering thread is logged.
pub struct LauncherModel {
    inner: Mutex<ModelInner>,
    bus: Arc<EventBus>,
    gate: Arc<AckGate>,
    dispatcher: Mutex<Option<UiDispatcher>>,
    exit_requested: AtomicBool,
}

impl fmt::Debug for LauncherModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LauncherModel")
            .field("snapshot", &self.snapshot())
            .field("exit_requested", &self.exit_requested())
            .finish()
    }
}

impl LauncherModel {
    pub fn new(bus: Arc<EventBus>, gate: Arc<AckGate>) -> Self {
        Self {
            inner: Mutex::new(ModelInner::default()),
            bus,
            gate,
            dispatcher: Mutex::new(None),
            exit_requested: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn gate(&self) -> &Arc<AckGate> {
        &self.gate
    }

    /// Route `request_exit` through the rendering thread from now on.
    pub fn attach_dispatcher(&self, dispatcher: UiDispatcher) {
        *self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
    }

    // -------------------------------------------------------------------------
    // State machine
    // -------------------------------------------------------------------------

    pub fn switch_state(&self, next: ModalState) {
        let prev = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, next)
        };
        info!(
            "[PHASE: state] [STEP: switch] Modal state {} -> {}",
            prev, next
        );
        self.update();
    }

    pub fn state(&self) -> ModalState {
        self.lock().state
    }

    pub fn is_exiting(&self) -> bool {
        self.state() == ModalState::InstallError
    }

    /// Force a re-render without changing anything.
    pub fn update(&self) {
        self.bus.publish(LauncherEvent::StateChange);
    }

    /// Publish `exit`, wake a worker parked on the gate and ask the rendering thread
    /// to stop with status 0. Safe from any thread.
    pub fn request_exit(&self) {
        if self.exit_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[PHASE: shutdown] [STEP: request_exit] Exit requested");
        self.bus.publish(LauncherEvent::Exit);
        self.gate.close();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match dispatcher {
            Some(d) => {
                if let Err(e) = d.synchronize(|host| host.exit(0)) {
                    warn!(
                        "[PHASE: shutdown] [STEP: request_exit] Rendering thread unavailable: {}",
                        e
                    );
                }
            }
            None => warn!(
                "[PHASE: shutdown] [STEP: request_exit] No rendering thread attached; exit left to the caller"
            ),
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    /// Block the calling (worker) thread until the user acknowledges the current modal.
    pub fn wait_dialogue_complete(&self) -> Result<(), GateError> {
        self.gate.wait()
    }

    /// The "continue" button. Never blocks; extra clicks are dropped.
    pub fn button_clicked(&self) -> bool {
        self.gate.signal()
    }

    // -------------------------------------------------------------------------
    // Stage flags + status
    // -------------------------------------------------------------------------

    pub fn mark_stage(&self, stage: Stage) {
        let changed = self.lock().flags.set(stage);
        if changed {
            info!("[PHASE: install] [STEP: stage] {} done", stage.label());
        }
        self.update();
    }

    pub fn stage_done(&self, stage: Stage) -> bool {
        self.lock().flags.is_set(stage)
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().flags.installation_status = status.into();
        self.update();
    }

    pub fn status(&self) -> String {
        self.lock().flags.installation_status.clone()
    }

    // -------------------------------------------------------------------------
    // Supervised services
    // -------------------------------------------------------------------------

    /// Returns true (and publishes) only when the state actually changed.
    pub fn set_runnable_state(&self, service: Service, next: RunnableState) -> bool {
        let changed = {
            let mut inner = self.lock();
            let slot = match service {
                Service::Docker => &mut inner.docker,
                Service::Container => &mut inner.container,
            };
            let changed = *slot != next;
            *slot = next;
            changed
        };
        if changed {
            self.update();
        }
        changed
    }

    pub fn runnable_state(&self, service: Service) -> RunnableState {
        let inner = self.lock();
        match service {
            Service::Docker => inner.docker,
            Service::Container => inner.container,
        }
    }

    // -------------------------------------------------------------------------
    // Preference + session flags
    // -------------------------------------------------------------------------

    pub fn preference(&self) -> InstallPreference {
        self.lock().preference.clone()
    }

    pub fn set_preference(&self, preference: InstallPreference) {
        self.lock().preference = preference;
        self.update();
    }

    /// Flip the auto-start preference and return the new value.
    pub fn toggle_auto_start(&self) -> InstallPreference {
        let pref = {
            let mut inner = self.lock();
            inner.preference.auto_start = !inner.preference.auto_start;
            inner.preference.clone()
        };
        self.update();
        pref
    }

    pub fn set_install_stage2(&self, value: bool) {
        self.lock().install_stage2 = value;
    }

    pub fn install_stage2(&self) -> bool {
        self.lock().install_stage2
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let inner = self.lock();
        ModelSnapshot {
            state: inner.state,
            flags: inner.flags.clone(),
            docker: inner.docker,
            container: inner.container,
            preference: inner.preference.clone(),
            install_stage2: inner.install_stage2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{ui_channel, RenderHost};
    use crate::events::EventTopic;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn new_model() -> Arc<LauncherModel> {
        Arc::new(LauncherModel::new(
            Arc::new(EventBus::new()),
            Arc::new(AckGate::new()),
        ))
    }

    // -------------------------------------------------------------------------
    // State broadcast
    // -------------------------------------------------------------------------

    #[test]
    fn every_switch_publishes_one_state_change_with_the_new_state_visible() {
        let model = new_model();
        let seen: Arc<Mutex<Vec<ModalState>>> = Arc::new(Mutex::new(Vec::new()));

        let observer = Arc::clone(&model);
        let seen_in = Arc::clone(&seen);
        model.bus().subscribe(EventTopic::StateChange, move |_| {
            seen_in.lock().unwrap().push(observer.state());
        });

        let script = [
            ModalState::InstallNeeded,
            ModalState::InstallNeeded,
            ModalState::InstallInProgress,
            ModalState::Initial,
            ModalState::InstallFinished,
        ];
        for s in script {
            model.switch_state(s);
        }

        assert_eq!(*seen.lock().unwrap(), script.to_vec());
    }

    #[test]
    fn update_publishes_without_changing_state() {
        let model = new_model();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        model.bus().subscribe(EventTopic::StateChange, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        model.switch_state(ModalState::InstallInProgress);
        model.update();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(model.state(), ModalState::InstallInProgress);
    }

    // -------------------------------------------------------------------------
    // Exit terminality
    // -------------------------------------------------------------------------

    #[test]
    fn error_state_marks_the_session_as_exiting() {
        let model = new_model();
        assert!(!model.is_exiting());

        model.switch_state(ModalState::InstallError);
        assert!(model.is_exiting());

        model.update();
        model.mark_stage(Stage::DownloadFiles);
        model.set_status("still failed");
        model.set_runnable_state(Service::Docker, RunnableState::Running);
        assert!(model.is_exiting());
    }

    #[test]
    fn request_exit_publishes_closes_gate_and_stops_render_loop() {
        struct Host(Option<i32>);
        impl RenderHost for Host {
            fn exit(&mut self, code: i32) {
                self.0 = Some(code);
            }
        }

        let model = new_model();
        let (dispatcher, queue) = ui_channel();
        queue.bind_current_thread();
        model.attach_dispatcher(dispatcher);

        let (_ids, rx) = model.bus().subscribe_channel(&[EventTopic::Exit]);
        let worker_model = Arc::clone(&model);
        let worker = thread::spawn(move || worker_model.request_exit());

        let mut host = Host(None);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while host.0.is_none() {
            assert!(std::time::Instant::now() < deadline);
            queue.run_pending(&mut host);
            thread::sleep(Duration::from_millis(5));
        }
        worker.join().unwrap();

        assert_eq!(host.0, Some(0));
        assert_eq!(rx.try_recv().ok(), Some(LauncherEvent::Exit));
        assert!(model.gate().is_closed());
        assert!(model.exit_requested());
    }

    #[test]
    fn request_exit_is_idempotent_and_safe_without_a_surface() {
        let model = new_model();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        model.bus().subscribe(EventTopic::Exit, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        model.request_exit();
        model.request_exit();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(model.wait_dialogue_complete(), Err(GateError::Closed));
    }

    // -------------------------------------------------------------------------
    // Flags + services + preference
    // -------------------------------------------------------------------------

    #[test]
    fn stage_flags_are_monotonic() {
        let mut flags = StageFlags::default();
        assert!(flags.set(Stage::EnableWsl));
        assert!(!flags.set(Stage::EnableWsl));
        assert!(flags.is_set(Stage::EnableWsl));
        assert_eq!(flags.completed(), 1);

        for stage in Stage::ALL {
            flags.set(stage);
        }
        assert_eq!(flags.completed(), Stage::ALL.len());
    }

    #[test]
    fn mark_stage_is_visible_in_snapshot() {
        let model = new_model();
        model.mark_stage(Stage::CheckVTx);
        model.set_status("VT-x ok");

        let snap = model.snapshot();
        assert!(snap.flags.check_vtx);
        assert!(!snap.flags.check_windows_version);
        assert_eq!(snap.flags.installation_status, "VT-x ok");
        assert!(model.stage_done(Stage::CheckVTx));
    }

    #[test]
    fn runnable_state_publishes_only_on_change() {
        let model = new_model();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        model.bus().subscribe(EventTopic::StateChange, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(model.set_runnable_state(Service::Container, RunnableState::Starting));
        assert!(!model.set_runnable_state(Service::Container, RunnableState::Starting));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            model.runnable_state(Service::Container),
            RunnableState::Starting
        );
        assert_eq!(model.runnable_state(Service::Docker), RunnableState::Unknown);
    }

    #[test]
    fn toggle_auto_start_flips_the_preference() {
        let model = new_model();
        assert!(!model.preference().auto_start);
        assert!(model.toggle_auto_start().auto_start);
        assert!(!model.toggle_auto_start().auto_start);
    }

    #[test]
    fn button_click_reaches_the_worker_once() {
        let model = new_model();
        assert!(model.button_clicked());
        assert!(!model.button_clicked());
        assert_eq!(model.wait_dialogue_complete(), Ok(()));
        assert!(!model.gate().has_pending_signal());
    }

    #[test]
    fn modal_state_parse_accepts_aliases() {
        assert_eq!(ModalState::parse("error"), Some(ModalState::InstallError));
        assert_eq!(
            ModalState::parse("install-needed"),
            Some(ModalState::InstallNeeded)
        );
        assert_eq!(ModalState::parse("nope"), None);
        assert!(ModalState::InstallFinished.awaits_acknowledgment());
        assert!(!ModalState::InstallInProgress.awaits_acknowledgment());
    }
}
