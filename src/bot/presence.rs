use serenity::model::id::{ChannelId, GuildId, UserId};
use tracing::{debug, info};

use super::facade::{Jukebox, JukeboxError};
use crate::audio::session::AmbientOutcome;
use crate::sources::TrackSource;

impl Jukebox {
    /// Un usuario entró a un canal de voz (antes no estaba en ninguno).
    ///
    /// Devuelve `None` si el usuario no tiene bienvenida o el archivo no existe.
    pub async fn on_user_joined_channel(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<AmbientOutcome>, JukeboxError> {
        let reference = {
            let store = self.ambients.lock().await;
            let eligible = self.ambient_for_everyone
                || self.priority_user == Some(user_id)
                || store.has_custom(user_id);
            if !eligible {
                return Ok(None);
            }
            store.get(user_id)
        };

        let source = TrackSource::from_reference(&reference);
        if let TrackSource::File(path) = &source {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                info!("🔕 Sonido de bienvenida no encontrado: {}", path.display());
                return Ok(None);
            }
        }

        debug!("🔔 {} entró al canal {} en guild {}", user_id, channel_id, guild_id);
        let session = self.sessions.get_or_create(guild_id);
        let outcome = session.play_ambient(user_id, channel_id, source).await?;
        Ok(Some(outcome))
    }
}
