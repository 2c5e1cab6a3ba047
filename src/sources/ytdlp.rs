use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{AudioSourceResolver, ResolutionError, ResolvedTrack, TrackSource};

/// Resolver basado en `yt-dlp`: busca en YouTube y devuelve la URL del mejor audio
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    url: Option<String>,
    title: Option<String>,
}

impl YtDlpResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout,
        }
    }

    /// Comprueba que el binario responde y devuelve su versión
    pub async fn check_available(&self) -> Result<String, ResolutionError> {
        let output = async_process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await?;
        if !output.status.success() {
            return Err(ResolutionError::Failed(format!(
                "{} --version terminó con {}",
                self.binary, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn search_target(query: &str) -> String {
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        }
    }

    /// Interpreta la salida `--dump-json` (un objeto JSON por línea)
    fn parse_output(stdout: &str, query: &str) -> Result<ResolvedTrack, ResolutionError> {
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?;

        let info: VideoInfo = serde_json::from_str(line)?;
        let url = info
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?;

        Ok(ResolvedTrack {
            title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
            source: TrackSource::Url(url),
        })
    }
}

#[async_trait]
impl AudioSourceResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolutionError> {
        let target = Self::search_target(query);
        debug!("🔍 yt-dlp buscando: {}", target);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--dump-json",
            "--format",
            "bestaudio/best",
            "--no-playlist",
            "--default-search",
            "auto",
            "--quiet",
            "--no-warnings",
        ])
        .arg(&target)
        .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(ResolutionError::Failed(stderr.trim().to_string()));
        }

        let track = Self::parse_output(&String::from_utf8_lossy(&output.stdout), query)?;
        info!("✅ Resuelto '{}' -> {}", query, track.title);
        Ok(track)
    }
}
