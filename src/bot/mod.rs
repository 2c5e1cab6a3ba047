//! # Bot Module
//!
//! Discord front end of the jukebox.
//!
//! This module contains:
//! - Slash command registration ([`commands`]) and dispatch ([`handlers`])
//! - The permission gate applied to every command ([`permissions`])
//! - Discord-independent verbs over the session registry ([`facade`])
//! - The welcome sound trigger for users joining voice ([`presence`])
//! - Background maintenance (idle session eviction)
//!
//! ## Architecture
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]. Commands are checked
//! against the [`PermissionPolicy`], then translated into calls on the
//! [`Jukebox`], which owns the [`SessionRegistry`](crate::audio::registry::SessionRegistry).
//! Voice state updates feed the presence trigger.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    prelude::Mentionable,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod facade;
pub mod handlers;
pub mod permissions;
pub mod presence;

use crate::{audio::session::AmbientOutcome, config::Config};
pub use facade::{Jukebox, JukeboxError};
pub use permissions::PermissionPolicy;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Discord event handler for the jukebox.
///
/// Holds the configuration, the permission policy built from it and the
/// shared [`Jukebox`]. All fields are cheap to share across the event tasks
/// Serenity spawns.
pub struct JukeboxBot {
    config: Arc<Config>,
    pub(crate) policy: PermissionPolicy,
    pub(crate) jukebox: Arc<Jukebox>,
}

impl JukeboxBot {
    pub fn new(config: Config, jukebox: Arc<Jukebox>) -> Self {
        let policy = PermissionPolicy::from_config(&config);

        Self {
            config: Arc::new(config),
            policy,
            jukebox,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (they propagate
    /// almost immediately), globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    /// Called once the gateway session is established.
    ///
    /// Registers the slash commands and starts the maintenance loop.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        let jukebox = self.jukebox.clone();
        let max_idle = self.config.session_idle();

        tokio::spawn(async move {
            maintenance_tasks(jukebox, max_idle).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Fires the welcome sound when a user enters voice from outside any channel.
    ///
    /// Moves between channels, leaves, bots (including this one) are ignored.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let (Some(guild_id), Some(channel_id)) = (new.guild_id, new.channel_id) else {
            return;
        };
        if old.as_ref().and_then(|state| state.channel_id).is_some() {
            return;
        }
        if new.user_id == ctx.cache.current_user().id
            || new.member.as_ref().is_some_and(|member| member.user.bot)
        {
            return;
        }

        let jukebox = self.jukebox.clone();
        let user_id = new.user_id;

        tokio::spawn(async move {
            match jukebox
                .on_user_joined_channel(guild_id, user_id, channel_id)
                .await
            {
                Ok(Some(AmbientOutcome::Played)) => {
                    let system_channel = guild_id
                        .to_guild_cached(&ctx.cache)
                        .and_then(|guild| guild.system_channel_id);
                    if let Some(system_channel) = system_channel {
                        let message = format!("Playing welcome sound for {}!", user_id.mention());
                        if let Err(e) = system_channel.say(&ctx.http, message).await {
                            warn!("No se pudo anunciar la bienvenida: {:?}", e);
                        }
                    }
                }
                Ok(_) => debug!("Sin bienvenida para {} en guild {}", user_id, guild_id),
                Err(e) => error!("Error reproduciendo bienvenida en guild {}: {}", guild_id, e),
            }
        });
    }
}

/// Runs periodic maintenance in the background.
///
/// Every hour, drops sessions that have been disconnected and untouched for
/// longer than `max_idle`. They are recreated on the next command.
async fn maintenance_tasks(jukebox: Arc<Jukebox>, max_idle: Duration) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        let evicted = jukebox.sessions().evict_idle(max_idle);

        info!(
            "🧹 Tareas de mantenimiento completadas ({} sesiones eliminadas, {} activas)",
            evicted,
            jukebox.sessions().len()
        );
    }
}
