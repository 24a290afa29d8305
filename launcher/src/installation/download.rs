//! Installer artifact downloads.
//!
//! - Streams to `<name>.part`, renames into place only when complete
//! - Optional SHA-256 verification (computed while streaming)
//! - A complete file already on disk is reused (and re-verified when a checksum is known)

use anyhow::{Context, Result};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    pub sha256: Option<String>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Last path segment of `url`, percent-decoding spaces.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid download URL: {}", url))?;
    let name = parsed
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Download URL has no file name: {}", url))?;
    Ok(name.replace("%20", " "))
}

fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual)
}

/// Download `artifact` into `dir`, returning the final path.
pub async fn download_artifact(artifact: &Artifact, dir: &Path, timeout: Duration) -> Result<PathBuf> {
    let started = Instant::now();
    let name = file_name_from_url(&artifact.url)?;
    let dest = dir.join(&name);

    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        match &artifact.sha256 {
            None => {
                info!(
                    "[PHASE: install] [STEP: download] Reusing existing {:?}",
                    dest
                );
                return Ok(dest);
            }
            Some(expected) => {
                let actual = sha256_file(&dest).await?;
                if checksum_matches(expected, &actual) {
                    info!(
                        "[PHASE: install] [STEP: download] Reusing verified {:?}",
                        dest
                    );
                    return Ok(dest);
                }
                warn!(
                    "[PHASE: install] [STEP: download] Checksum mismatch for cached {:?}; downloading again",
                    dest
                );
            }
        }
    }

    info!(
        "[PHASE: install] [STEP: download] Downloading {} -> {:?}",
        artifact.url, dest
    );

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let mut resp = client
        .get(&artifact.url)
        .send()
        .await
        .with_context(|| format!("GET {} failed", artifact.url))?
        .error_for_status()
        .with_context(|| format!("GET {} returned an error status", artifact.url))?;

    let part = dir.join(format!("{}.part", name));
    let mut file = tokio::fs::File::create(&part)
        .await
        .with_context(|| format!("create {:?}", part))?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    while let Some(chunk) = resp.chunk().await.context("download interrupted")? {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    let actual = format!("{:x}", hasher.finalize());
    if let Some(expected) = &artifact.sha256 {
        if !checksum_matches(expected, &actual) {
            let _ = tokio::fs::remove_file(&part).await;
            anyhow::bail!(
                "Checksum mismatch for {} (expected {}, got {})",
                name,
                expected,
                actual
            );
        }
    }

    tokio::fs::rename(&part, &dest)
        .await
        .with_context(|| format!("rename {:?} -> {:?}", part, dest))?;

    debug!(
        "[PHASE: install] [STEP: download] download_artifact exit (file={}, bytes={}, duration_ms={})",
        name,
        total,
        started.elapsed().as_millis()
    );
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name_from_url(
                "https://desktop.docker.com/win/main/amd64/Docker%20Desktop%20Installer.exe"
            )
            .unwrap(),
            "Docker Desktop Installer.exe"
        );
        assert!(file_name_from_url("https://example.com/").is_err());
        assert!(file_name_from_url("nonsense").is_err());
    }

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn verified_cached_file_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wsl_update_x64.msi");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let artifact = Artifact {
            // Port 9 refuses connections; only the cached file can satisfy this.
            url: "http://127.0.0.1:9/wsl_update_x64.msi".to_string(),
            sha256: Some(
                "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD".to_string(),
            ),
        };
        let got = download_artifact(&artifact, dir.path(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(got, path);
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            url: "http://127.0.0.1:9/missing.bin".to_string(),
            sha256: None,
        };
        assert!(download_artifact(&artifact, dir.path(), Duration::from_secs(2))
            .await
            .is_err());
        assert!(!dir.path().join("missing.bin").exists());
    }
}
