// Container runtime probes (Docker).
// Version parsing, daemon liveness and node container status.

use anyhow::Result;
use log::{debug, warn};
use std::path::PathBuf;
use std::time::Duration;

use crate::installation::run_cmd;
use crate::models::state::RunnableState;

const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Docker version information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Original version string for display/logging.
    pub raw: String,
}

/// Parse docker version output into a DockerVersion struct.
///
/// Expected format: "Docker version 24.0.5, build abcdef"
/// Also handles: "Docker version 20.10.21, build baeda1f82a" and similar variants.
pub fn parse_docker_version(output: &str) -> Option<DockerVersion> {
    let output = output.trim();

    let version_str = if let Some(pos) = output.to_lowercase().find("docker version ") {
        &output[pos + "docker version ".len()..]
    } else {
        output
    };

    // Extract version part (stop at comma, space, or dash)
    let version_part = version_str
        .split(|c: char| c == ',' || c == ' ' || c == '-')
        .next()?;

    let parts: Vec<&str> = version_part.split('.').collect();
    let major: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor: u32 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    let patch: u32 = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);

    if major == 0 && minor == 0 && patch == 0 && !version_part.starts_with('0') {
        return None;
    }

    Some(DockerVersion {
        major,
        minor,
        patch,
        raw: output.to_string(),
    })
}

/// Location of the docker CLI on PATH, if any.
pub fn find_docker_cli() -> Option<PathBuf> {
    which::which("docker").ok()
}

/// Get Docker version information.
pub async fn get_docker_version() -> Result<DockerVersion> {
    debug!("[PHASE: preflight] [STEP: docker] get_docker_version entered");

    let out = run_cmd("docker", &["--version"], DOCKER_PROBE_TIMEOUT, "docker_version").await?;
    if !out.success() {
        anyhow::bail!("docker --version returned non-zero exit code");
    }

    let version = parse_docker_version(&out.stdout)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse docker version from: {}", out.stdout))?;

    debug!(
        "[PHASE: preflight] [STEP: docker] get_docker_version exit (major={}, minor={}, patch={})",
        version.major, version.minor, version.patch
    );
    Ok(version)
}

/// Check if the Docker daemon is running by executing `docker info`.
pub async fn is_docker_daemon_running() -> bool {
    match run_cmd("docker", &["info"], DOCKER_PROBE_TIMEOUT, "docker_info").await {
        Ok(out) => {
            if !out.success() && out.stderr.to_lowercase().contains("permission denied") {
                warn!(
                    "[PHASE: supervise] [STEP: docker] Docker daemon check failed due to permission denied"
                );
            }
            out.success()
        }
        Err(e) => {
            debug!(
                "[PHASE: supervise] [STEP: docker] is_docker_daemon_running failed: {}",
                e
            );
            false
        }
    }
}

/// Map `docker inspect -f {{.State.Status}}` output to a runnable state.
pub fn parse_container_status(output: &str) -> RunnableState {
    match output.trim().to_ascii_lowercase().as_str() {
        "running" => RunnableState::Running,
        "created" | "restarting" => RunnableState::Starting,
        "exited" | "paused" => RunnableState::Stopped,
        "dead" => RunnableState::Failed,
        _ => RunnableState::Unknown,
    }
}

/// Status of container `name`. A missing container counts as stopped.
pub async fn container_state(name: &str) -> RunnableState {
    let out = run_cmd(
        "docker",
        &["inspect", "-f", "{{.State.Status}}", name],
        DOCKER_PROBE_TIMEOUT,
        "docker_inspect",
    )
    .await;
    match out {
        Ok(o) if o.success() => parse_container_status(&o.stdout),
        Ok(o) if o.stderr.to_lowercase().contains("no such") => RunnableState::Stopped,
        Ok(_) => RunnableState::Unknown,
        Err(e) => {
            debug!(
                "[PHASE: supervise] [STEP: container] docker inspect failed: {}",
                e
            );
            RunnableState::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_version_strings() {
        let v = parse_docker_version("Docker version 24.0.5, build ced0996").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (24, 0, 5));

        let v = parse_docker_version("Docker version 20.10.21, build baeda1f82a\n").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (20, 10, 21));
    }

    #[test]
    fn rejects_non_version_output() {
        assert!(parse_docker_version("command not found: docker").is_none());
    }

    #[test]
    fn container_status_mapping() {
        assert_eq!(parse_container_status("running\n"), RunnableState::Running);
        assert_eq!(parse_container_status("restarting"), RunnableState::Starting);
        assert_eq!(parse_container_status("exited"), RunnableState::Stopped);
        assert_eq!(parse_container_status("dead"), RunnableState::Failed);
        assert_eq!(parse_container_status("???"), RunnableState::Unknown);
    }
}
