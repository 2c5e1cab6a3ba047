//! Verbos del bot independientes de Discord: reciben ids ya validados y
//! devuelven resultados tipados que `handlers` convierte en respuestas.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use super::permissions::Denial;
use crate::audio::registry::SessionRegistry;
use crate::audio::session::{EnqueueOutcome, SessionError, SessionSnapshot};
use crate::sources::TrackSource;
use crate::storage::{AmbientStore, StorageError};

#[derive(Debug, Error)]
pub enum JukeboxError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("could not save welcome sounds: {0}")]
    Storage(#[from] StorageError),
    #[error("You need to be in a voice channel to use this command.")]
    NotInVoice,
    #[error("{0}")]
    PermissionDenied(#[from] Denial),
    #[error("Sound file not found: {0}")]
    UnknownSound(String),
}

pub struct Jukebox {
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) ambients: Arc<Mutex<AmbientStore>>,
    pub(crate) priority_user: Option<UserId>,
    pub(crate) ambient_for_everyone: bool,
}

impl Jukebox {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        ambients: Arc<Mutex<AmbientStore>>,
        priority_user: Option<UserId>,
        ambient_for_everyone: bool,
    ) -> Self {
        Self {
            sessions,
            ambients,
            priority_user,
            ambient_for_everyone,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn is_priority(&self, user_id: UserId) -> bool {
        self.priority_user == Some(user_id)
    }

    /// Conecta al canal de quien pide y encola. El usuario prioritario se
    /// cuela al frente de la cola.
    pub async fn play(
        &self,
        guild_id: GuildId,
        issuer: UserId,
        channel_id: Option<ChannelId>,
        query: &str,
    ) -> Result<EnqueueOutcome, JukeboxError> {
        let channel_id = channel_id.ok_or(JukeboxError::NotInVoice)?;
        let session = self.sessions.get_or_create(guild_id);

        session.request_connect(channel_id).await?;
        match session
            .enqueue_song(query, issuer, self.is_priority(issuer))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Sin canción que reproducir no tiene sentido quedarse en el canal
                session.leave_if_idle().await;
                Err(e.into())
            }
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), JukeboxError> {
        let session = self
            .sessions
            .get(guild_id)
            .ok_or(SessionError::NothingPlaying)?;
        session.pause().await?;
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), JukeboxError> {
        let session = self.sessions.get(guild_id).ok_or(SessionError::NotPaused)?;
        session.resume().await?;
        Ok(())
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<String, JukeboxError> {
        let session = self
            .sessions
            .get(guild_id)
            .ok_or(SessionError::NothingPlaying)?;
        Ok(session.skip().await?)
    }

    pub async fn clear(&self, guild_id: GuildId) -> usize {
        match self.sessions.get(guild_id) {
            Some(session) => session.clear().await,
            None => 0,
        }
    }

    pub async fn stop(&self, guild_id: GuildId) -> bool {
        match self.sessions.get(guild_id) {
            Some(session) => session.stop_all().await,
            None => false,
        }
    }

    /// `None` si el guild todavía no tiene sesión
    pub async fn list_queue(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        let session = self.sessions.get(guild_id)?;
        Some(session.snapshot().await)
    }

    /// Guarda el sonido de bienvenida de `target`. Las rutas locales deben existir.
    pub async fn set_ambient(
        &self,
        target: UserId,
        reference: &str,
    ) -> Result<Option<String>, JukeboxError> {
        let reference = reference.trim();
        if let TrackSource::File(path) = TrackSource::from_reference(reference) {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(JukeboxError::UnknownSound(reference.to_string()));
            }
        }

        let previous = self
            .ambients
            .lock()
            .await
            .set(target, reference.to_string())
            .await?;
        info!("🔔 Sonido de bienvenida de {} → {}", target, reference);
        Ok(previous)
    }

    pub async fn remove_ambient(&self, target: UserId) -> Result<bool, JukeboxError> {
        Ok(self.ambients.lock().await.remove(target).await?)
    }

    /// Sonidos propios por usuario y el de por defecto
    pub async fn list_ambients(&self) -> (BTreeMap<UserId, String>, String) {
        let store = self.ambients.lock().await;
        (store.list_all(), store.default_sound().to_string())
    }
}
