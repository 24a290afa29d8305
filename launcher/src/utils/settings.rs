// Launcher settings
//
// Layers (lowest to highest precedence):
// 1. built-in defaults
// 2. optional `myst-launcher.toml` next to the executable (or `--settings <path>`)
// 3. `MYST_LAUNCHER_*` environment variables, e.g. `MYST_LAUNCHER_UI=console`

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const ENV_PREFIX: &str = "MYST_LAUNCHER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    /// Terminal UI when stdout is a terminal, console otherwise.
    #[default]
    Auto,
    Tui,
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    pub ui: UiMode,
    pub node_ui_url: String,
    pub docker_installer_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_installer_sha256: Option<String>,
    pub wsl_update_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wsl_update_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    pub log_level: String,
    pub supervisor_interval_secs: u64,
    pub container_name: String,
    pub command_timeout_secs: u64,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            ui: UiMode::Auto,
            node_ui_url: "http://localhost:4449/".to_string(),
            docker_installer_url:
                "https://desktop.docker.com/win/main/amd64/Docker%20Desktop%20Installer.exe"
                    .to_string(),
            docker_installer_sha256: None,
            wsl_update_url:
                "https://wslstorestorage.blob.core.windows.net/wslblob/wsl_update_x64.msi"
                    .to_string(),
            wsl_update_sha256: None,
            download_dir: None,
            log_level: "debug".to_string(),
            supervisor_interval_secs: 15,
            container_name: "myst".to_string(),
            command_timeout_secs: 600,
        }
    }
}

impl LauncherSettings {
    /// Load defaults, then `file` (if it exists), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings: LauncherSettings = builder
            .build()
            .context("Failed to read launcher settings")?
            .try_deserialize()
            .context("Invalid launcher settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("node_ui_url", &self.node_ui_url),
            ("docker_installer_url", &self.docker_installer_url),
            ("wsl_update_url", &self.wsl_update_url),
        ] {
            let parsed =
                Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("{} must be an http(s) URL", name);
            }
        }

        for (name, value) in [
            ("docker_installer_sha256", &self.docker_installer_sha256),
            ("wsl_update_sha256", &self.wsl_update_sha256),
        ] {
            if let Some(hex) = value {
                if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    anyhow::bail!("{} must be 64 hex characters", name);
                }
            }
        }

        if self.supervisor_interval_secs == 0 {
            anyhow::bail!("supervisor_interval_secs must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            anyhow::bail!("command_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .trim()
            .parse()
            .unwrap_or(log::LevelFilter::Debug)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render settings as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("myst-launcher.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = LauncherSettings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(s.node_ui_url, "http://localhost:4449/");
        assert_eq!(s.supervisor_interval_secs, 15);
        assert_eq!(s.container_name, "myst");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(
            &dir,
            r#"
ui = "console"
supervisor_interval_secs = 30
container_name = "myst-node"
"#,
        );
        let s = LauncherSettings::load(Some(&path)).unwrap();
        assert_eq!(s.ui, UiMode::Console);
        assert_eq!(s.supervisor_interval_secs, 30);
        assert_eq!(s.container_name, "myst-node");
        assert_eq!(s.log_level, "debug");
    }

    #[test]
    fn bad_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "node_ui_url = \"not a url\"\n");
        assert!(LauncherSettings::load(Some(&path)).is_err());
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let s = LauncherSettings {
            wsl_update_sha256: Some("abc".to_string()),
            ..LauncherSettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn level_filter_falls_back_to_debug() {
        let mut s = LauncherSettings::default();
        s.log_level = "warn".to_string();
        assert_eq!(s.level_filter(), log::LevelFilter::Warn);
        s.log_level = "chatty".to_string();
        assert_eq!(s.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn rendered_toml_reads_back() {
        let s = LauncherSettings::default();
        let text = s.to_toml().unwrap();
        assert!(text.contains("node_ui_url"));
        let back: LauncherSettings = toml::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
