use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::session::{GuildSession, SessionSettings};
use super::transport::VoiceTransport;
use crate::sources::AudioSourceResolver;

/// guild -> sesión. Las sesiones se crean bajo demanda y se pueden recrear
/// desde el id en cualquier momento.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    transport: Arc<dyn VoiceTransport>,
    resolver: Arc<dyn AudioSourceResolver>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<dyn AudioSourceResolver>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            resolver,
            settings,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Nueva sesión para guild {}", guild_id);
                GuildSession::new(
                    guild_id,
                    self.transport.clone(),
                    self.resolver.clone(),
                    self.settings,
                )
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Elimina sesiones ociosas que nadie más está usando
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        // `retain` tiene el shard bloqueado: nadie puede clonar el Arc mientras tanto
        self.sessions
            .retain(|_, session| Arc::strong_count(session) > 1 || !session.is_idle_for(max_idle));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!("🧹 {} sesiones ociosas eliminadas", evicted);
        }
        evicted
    }
}
