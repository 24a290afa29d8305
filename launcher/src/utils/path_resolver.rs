use anyhow::Result;
use std::path::{Path, PathBuf};

pub const PREFERENCE_FILE_NAME: &str = ".myst_node_launcher";
pub const SETTINGS_FILE_NAME: &str = "myst-launcher.toml";
const APP_DIR_NAME: &str = "MystNodeLauncher";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder where the EXE is running from (works in dev and deployed)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    // Fallback: current working directory
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    Ok(cwd)
}

/// Per-user preference file: `<user-profile-dir>/.myst_node_launcher`.
pub fn preference_file_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine the user profile directory"))?;
    Ok(home.join(PREFERENCE_FILE_NAME))
}

/// Settings file shipped next to the executable.
pub fn default_settings_file() -> Result<PathBuf> {
    Ok(resolve_deployment_folder()?.join(SETTINGS_FILE_NAME))
}

fn app_data_dir() -> Result<PathBuf> {
    match dirs::data_local_dir() {
        Some(dir) => Ok(dir.join(APP_DIR_NAME)),
        None => resolve_deployment_folder(),
    }
}

/// Resolve log folder (absolute path), creating it if needed.
pub fn resolve_log_folder() -> Result<PathBuf> {
    let primary = app_data_dir()?.join("logs");
    if std::fs::create_dir_all(&primary).is_ok() {
        return Ok(primary);
    }

    // Fallback: next to the executable (best-effort).
    let log_dir = resolve_deployment_folder()?.join("logs");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder: {}", e))?;
    Ok(log_dir)
}

/// Where the launcher copies itself during installation.
pub fn resolve_install_folder() -> Result<PathBuf> {
    Ok(app_data_dir()?.join("bin"))
}

/// Folder downloaded installers are cached in, creating it if needed.
pub fn resolve_download_folder(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = match configured {
        Some(p) => p.to_path_buf(),
        None => app_data_dir()?.join("downloads"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create download folder {:?}: {}", dir, e))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_file_lives_in_home() {
        if let Some(home) = dirs::home_dir() {
            let p = preference_file_path().unwrap();
            assert_eq!(p, home.join(".myst_node_launcher"));
        }
    }

    #[test]
    fn configured_download_folder_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache").join("installers");
        let resolved = resolve_download_folder(Some(&target)).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[test]
    fn settings_file_sits_next_to_the_executable() {
        let p = default_settings_file().unwrap();
        assert!(p.ends_with(SETTINGS_FILE_NAME));
    }
}
