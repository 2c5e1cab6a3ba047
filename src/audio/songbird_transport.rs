use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transport::{CompletionSignal, TransportError, VoiceConnection, VoiceTransport};
use crate::sources::TrackSource;

/// `VoiceTransport` sobre songbird: una `Call` por guild y un track activo por guild
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    current_tracks: DashMap<GuildId, TrackHandle>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            current_tracks: DashMap::new(),
        }
    }

    fn input_for(&self, source: TrackSource) -> Result<Input, TransportError> {
        match source {
            TrackSource::Url(url) => Ok(Input::from(HttpRequest::new(self.http.clone(), url))),
            TrackSource::File(path) => {
                if !path.is_file() {
                    return Err(TransportError::Rejected(format!(
                        "file not found: {}",
                        path.display()
                    )));
                }
                Ok(Input::from(File::new(path)))
            }
        }
    }

    fn track(&self, guild_id: GuildId) -> Option<TrackHandle> {
        self.current_tracks.get(&guild_id).map(|t| t.clone())
    }

    async fn play_mode(&self, guild_id: GuildId) -> Option<PlayMode> {
        let track = self.track(guild_id)?;
        track.get_info().await.ok().map(|info| info.playing)
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<VoiceConnection, TransportError> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(VoiceConnection {
            guild_id,
            channel_id,
        })
    }

    async fn move_to(
        &self,
        connection: &VoiceConnection,
        channel_id: ChannelId,
    ) -> Result<(), TransportError> {
        // join sobre una Call existente la mueve de canal
        self.manager
            .join(connection.guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Move {
                channel: channel_id,
                reason: e.to_string(),
            })?;

        info!(
            "🔀 Movido de {} a {} en guild {}",
            connection.channel_id, channel_id, connection.guild_id
        );
        Ok(())
    }

    async fn disconnect(&self, connection: &VoiceConnection) {
        self.current_tracks.remove(&connection.guild_id);
        if let Err(e) = self.manager.remove(connection.guild_id).await {
            debug!("Desconexión sin llamada activa en guild {}: {}", connection.guild_id, e);
        }
    }

    async fn play(
        &self,
        connection: &VoiceConnection,
        source: TrackSource,
        on_complete: CompletionSignal,
    ) -> Result<(), TransportError> {
        let call = self
            .manager
            .get(connection.guild_id)
            .ok_or(TransportError::NotConnected)?;
        let input = self.input_for(source)?;

        let track = {
            let mut call = call.lock().await;
            call.play_only_input(input)
        };

        let notifier = CompletionNotifier::new(on_complete);
        for event in [TrackEvent::End, TrackEvent::Error] {
            track
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| TransportError::Rejected(e.to_string()))?;
        }

        self.current_tracks.insert(connection.guild_id, track);
        Ok(())
    }

    async fn is_playing(&self, connection: &VoiceConnection) -> bool {
        matches!(self.play_mode(connection.guild_id).await, Some(PlayMode::Play))
    }

    async fn is_paused(&self, connection: &VoiceConnection) -> bool {
        matches!(self.play_mode(connection.guild_id).await, Some(PlayMode::Pause))
    }

    async fn pause(&self, connection: &VoiceConnection) -> Result<(), TransportError> {
        let track = self
            .track(connection.guild_id)
            .ok_or(TransportError::NotConnected)?;
        track
            .pause()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn resume(&self, connection: &VoiceConnection) -> Result<(), TransportError> {
        let track = self
            .track(connection.guild_id)
            .ok_or(TransportError::NotConnected)?;
        track
            .play()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn stop(&self, connection: &VoiceConnection) -> Result<(), TransportError> {
        let track = self
            .track(connection.guild_id)
            .ok_or(TransportError::NotConnected)?;
        track
            .stop()
            .map_err(|e| TransportError::Control(e.to_string()))
    }
}

/// Dispara la señal de fin una sola vez, venga de `End` o de `Error`
#[derive(Clone)]
struct CompletionNotifier {
    signal: Arc<Mutex<Option<CompletionSignal>>>,
}

impl CompletionNotifier {
    fn new(signal: CompletionSignal) -> Self {
        Self {
            signal: Arc::new(Mutex::new(Some(signal))),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{e:?}")),
                _ => None,
            }),
            _ => None,
        };

        if let Some(error) = &error {
            warn!("❌ Error en track: {}", error);
        }

        let signal = self.signal.lock().take();
        if let Some(signal) = signal {
            signal(error);
        }

        Some(Event::Cancel)
    }
}
