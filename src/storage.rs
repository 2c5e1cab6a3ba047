use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

const AMBIENT_FILE: &str = "ambient_sounds.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid ambient sound file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not replace ambient sound file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Contenido del archivo JSON en disco
#[derive(Debug, Default, Serialize, Deserialize)]
struct AmbientFile {
    #[serde(default)]
    sounds: BTreeMap<u64, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// Sonidos de bienvenida por usuario, más uno por defecto.
///
/// Se lee una vez al arrancar y se reescribe completo en cada cambio.
pub struct AmbientStore {
    path: PathBuf,
    default_sound: String,
    sounds: BTreeMap<u64, String>,
}

impl AmbientStore {
    pub async fn open(data_dir: PathBuf, default_sound: String) -> Result<Self, StorageError> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join(AMBIENT_FILE);

        let mut sounds = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<AmbientFile>(&content)?.sounds,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        // 0 no es un id de Discord válido
        sounds.retain(|id, _| *id != 0);

        info!(
            "📁 {} sonidos de bienvenida cargados desde {}",
            sounds.len(),
            path.display()
        );

        Ok(Self {
            path,
            default_sound,
            sounds,
        })
    }

    /// Sonido del usuario, o el de por defecto
    pub fn get(&self, user_id: UserId) -> String {
        self.sounds
            .get(&user_id.get())
            .cloned()
            .unwrap_or_else(|| self.default_sound.clone())
    }

    pub fn has_custom(&self, user_id: UserId) -> bool {
        self.sounds.contains_key(&user_id.get())
    }

    pub fn default_sound(&self) -> &str {
        &self.default_sound
    }

    /// Guarda el sonido de un usuario; devuelve el anterior si había
    pub async fn set(
        &mut self,
        user_id: UserId,
        reference: String,
    ) -> Result<Option<String>, StorageError> {
        let previous = self.sounds.insert(user_id.get(), reference);
        if let Err(e) = self.save().await {
            // Memoria y disco no deben divergir
            match &previous {
                Some(old) => self.sounds.insert(user_id.get(), old.clone()),
                None => self.sounds.remove(&user_id.get()),
            };
            return Err(e);
        }
        info!("💾 Sonido de bienvenida actualizado para {}", user_id);
        Ok(previous)
    }

    /// Devuelve `true` si el usuario tenía un sonido propio
    pub async fn remove(&mut self, user_id: UserId) -> Result<bool, StorageError> {
        let Some(previous) = self.sounds.remove(&user_id.get()) else {
            return Ok(false);
        };
        if let Err(e) = self.save().await {
            self.sounds.insert(user_id.get(), previous);
            return Err(e);
        }
        info!("🗑️ Sonido de bienvenida eliminado para {}", user_id);
        Ok(true)
    }

    pub fn list_all(&self) -> BTreeMap<UserId, String> {
        self.sounds
            .iter()
            .map(|(id, sound)| (UserId::new(*id), sound.clone()))
            .collect()
    }

    async fn save(&self) -> Result<(), StorageError> {
        let content = serde_json::to_vec_pretty(&AmbientFile {
            sounds: self.sounds.clone(),
            updated_at: Some(Utc::now()),
        })?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &content))
            .await
            .map_err(|e| {
                warn!("Tarea de escritura abortada: {}", e);
                StorageError::Io(std::io::Error::other(e))
            })?
    }
}

/// Escribe en un temporal del mismo directorio y lo renombra encima del destino
fn write_atomically(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
