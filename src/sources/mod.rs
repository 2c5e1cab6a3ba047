pub mod ytdlp;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use ytdlp::YtDlpResolver;

/// Referencia opaca a algo reproducible por el transporte de voz
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackSource {
    /// Stream HTTP(S) directo
    Url(String),
    /// Archivo local (sonidos de bienvenida)
    File(PathBuf),
}

impl TrackSource {
    /// Interpreta una referencia guardada: URLs http(s) como stream, el resto como ruta
    pub fn from_reference(reference: &str) -> Self {
        match url::Url::parse(reference) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Self::Url(reference.to_string())
            }
            _ => Self::File(PathBuf::from(reference)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Resultado de resolver una búsqueda
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub title: String,
    pub source: TrackSource,
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no results for \"{0}\"")]
    NotFound(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("resolver failed: {0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed resolver output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convierte una búsqueda en un stream reproducible y su título
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioSourceResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolutionError>;
}
