use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::time::Duration;
use thiserror::Error;

use crate::sources::TrackSource;

/// Señal de fin de reproducción. El transporte la invoca exactamente una vez
/// por `play` aceptado: al terminar, al detenerse o con el error que la cortó.
pub type CompletionSignal = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// Conexión de voz activa de un guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConnection {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("voice connection failed: {0}")]
    Connect(String),
    #[error("could not move to channel {channel}: {reason}")]
    Move { channel: ChannelId, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no active voice connection")]
    NotConnected,
    #[error("source rejected: {0}")]
    Rejected(String),
    #[error("track control failed: {0}")]
    Control(String),
}

/// Transporte de voz en tiempo real compartido por todos los guilds.
///
/// Si `play` devuelve error la señal se descarta sin invocarse.
/// `stop` siempre provoca la señal de la reproducción en curso.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<VoiceConnection, TransportError>;

    async fn move_to(
        &self,
        connection: &VoiceConnection,
        channel_id: ChannelId,
    ) -> Result<(), TransportError>;

    /// Idempotente
    async fn disconnect(&self, connection: &VoiceConnection);

    async fn play(
        &self,
        connection: &VoiceConnection,
        source: TrackSource,
        on_complete: CompletionSignal,
    ) -> Result<(), TransportError>;

    async fn is_playing(&self, connection: &VoiceConnection) -> bool;

    async fn is_paused(&self, connection: &VoiceConnection) -> bool;

    async fn pause(&self, connection: &VoiceConnection) -> Result<(), TransportError>;

    async fn resume(&self, connection: &VoiceConnection) -> Result<(), TransportError>;

    async fn stop(&self, connection: &VoiceConnection) -> Result<(), TransportError>;
}
