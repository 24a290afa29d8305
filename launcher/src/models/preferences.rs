// Per-user launcher preference (`~/.myst_node_launcher`)
//
// A single JSON object, written whole. Both directions fail soft: a missing or broken
// file reads as the default preference, and a failed write is only logged.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPreference {
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the per-user default location.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(crate::utils::path_resolver::preference_file_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> InstallPreference {
        match self.try_load() {
            Ok(Some(pref)) => {
                debug!(
                    "[PHASE: preferences] [STEP: load] Loaded preference from {:?} (auto_start={})",
                    self.path, pref.auto_start
                );
                pref
            }
            Ok(None) => {
                debug!(
                    "[PHASE: preferences] [STEP: load] No preference file at {:?}; using defaults",
                    self.path
                );
                InstallPreference::default()
            }
            Err(e) => {
                warn!(
                    "[PHASE: preferences] [STEP: load] Ignoring unreadable preference file {:?}: {:#}",
                    self.path, e
                );
                InstallPreference::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<InstallPreference>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("read preference file"),
        };
        let pref = serde_json::from_slice(&bytes).context("parse preference file")?;
        Ok(Some(pref))
    }

    pub fn save(&self, pref: &InstallPreference) {
        match self.try_save(pref) {
            Ok(()) => info!(
                "[PHASE: preferences] [STEP: save] Saved preference to {:?} (auto_start={})",
                self.path, pref.auto_start
            ),
            Err(e) => error!(
                "[PHASE: preferences] [STEP: save] Failed to save preference to {:?}: {:#}",
                self.path, e
            ),
        }
    }

    fn try_save(&self, pref: &InstallPreference) -> Result<()> {
        std::fs::write(&self.path, encode(pref)?)
            .with_context(|| format!("write preference file {:?}", self.path))
    }
}

/// Pretty JSON with a single-space indent and a trailing newline.
fn encode(pref: &InstallPreference) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    pref.serialize(&mut ser).context("serialize preference")?;
    buf.push(b'\n');
    Ok(buf)
}
