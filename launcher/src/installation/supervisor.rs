// Service supervision
//
// After installation the worker keeps polling the container runtime and the node
// container, storing what it sees in the model. Surfaces re-render on change only.

use log::{debug, info};
use std::time::{Duration, Instant};

use crate::installation::steps::RuntimeProbe;
use crate::models::state::{LauncherModel, RunnableState, Service};

const EXIT_POLL: Duration = Duration::from_millis(100);

/// One probe round. The container is only probed while the daemon is up.
pub fn supervise_once(model: &LauncherModel, probe: &dyn RuntimeProbe) {
    let docker = probe.docker_state();
    if model.set_runnable_state(Service::Docker, docker) {
        info!(
            "[PHASE: supervise] [STEP: docker] Docker is {}",
            docker.as_str()
        );
    }

    let container = if docker == RunnableState::Running {
        probe.container_state()
    } else {
        RunnableState::Stopped
    };
    if model.set_runnable_state(Service::Container, container) {
        info!(
            "[PHASE: supervise] [STEP: container] Node container is {}",
            container.as_str()
        );
    }
}

/// Probe every `interval` until exit is requested.
pub fn run_supervisor(model: &LauncherModel, probe: &dyn RuntimeProbe, interval: Duration) {
    info!(
        "[PHASE: supervise] [STEP: start] Supervising services every {}s",
        interval.as_secs()
    );
    while !model.exit_requested() {
        supervise_once(model, probe);

        let next = Instant::now() + interval;
        while !model.exit_requested() && Instant::now() < next {
            std::thread::sleep(EXIT_POLL.min(next.saturating_duration_since(Instant::now())));
        }
    }
    debug!("[PHASE: supervise] [STEP: stop] Supervisor stopped");
}
