use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandDataOption, CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::{Context, Mentionable},
};
use tracing::{error, info, warn};

use super::facade::JukeboxError;
use super::permissions::{PermissionPolicy, Verb};
use crate::{
    audio::{
        session::{EnqueueOutcome, SessionError, SessionSnapshot},
        transport::TransportError,
    },
    bot::JukeboxBot,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let (sub_name, sub_options) = match subcommand(&command) {
        Some((name, options)) => (Some(name), options),
        None => (None, command.data.options.as_slice()),
    };

    info!(
        "📝 Comando /{}{} usado por {} en guild {}",
        command.data.name,
        sub_name.map(|s| format!(" {s}")).unwrap_or_default(),
        command.user.name,
        guild_id
    );

    let Some(verb) = Verb::from_command(&command.data.name, sub_name) else {
        return respond(ctx, &command, "❌ Comando no reconocido", true).await;
    };

    let roles = member_role_names(ctx, &command, guild_id);
    if let Err(e) = authorize(&bot.policy, verb, command.user.id, &roles) {
        warn!("🚫 {} no puede usar /{}: {}", command.user.name, command.data.name, e);
        return respond(ctx, &command, &render_error(&e), true).await;
    }

    let jukebox = &bot.jukebox;
    let issuer = command.user.id;

    let reply = match verb {
        Verb::Play => return handle_play(ctx, &command, bot, guild_id).await,
        Verb::Pause => jukebox
            .pause(guild_id)
            .await
            .map(|()| "Paused the current song.".to_string()),
        Verb::Resume => jukebox
            .resume(guild_id)
            .await
            .map(|()| "Resumed the song.".to_string()),
        Verb::Skip => jukebox
            .skip(guild_id)
            .await
            .map(|_| "Skipped the current song.".to_string()),
        Verb::Queue => Ok(render_queue(
            &jukebox.list_queue(guild_id).await.unwrap_or_default(),
        )),
        Verb::Clear => Ok(match jukebox.clear(guild_id).await {
            0 => "The music queue is already empty.".to_string(),
            _ => "Cleared the music queue.".to_string(),
        }),
        Verb::Stop => Ok(if jukebox.stop(guild_id).await {
            "Stopped playing and disconnected from the voice channel.".to_string()
        } else {
            "I'm not connected to any voice channel.".to_string()
        }),
        Verb::AmbientSet => {
            let target = user_option(sub_options, "user").unwrap_or(issuer);
            match string_option(sub_options, "sound") {
                Some(sound) => jukebox
                    .set_ambient(target, sound)
                    .await
                    .map(|_| format!("Welcome sound for {} set to `{}`.", target.mention(), sound)),
                None => Err(JukeboxError::UnknownSound(String::new())),
            }
        }
        Verb::AmbientRemove => {
            let target = user_option(sub_options, "user").unwrap_or(issuer);
            jukebox.remove_ambient(target).await.map(|removed| {
                if removed {
                    format!("Removed the welcome sound for {}.", target.mention())
                } else {
                    format!("{} has no custom welcome sound.", target.mention())
                }
            })
        }
        Verb::AmbientList => {
            let (sounds, default_sound) = jukebox.list_ambients().await;
            Ok(render_ambients(&sounds, &default_sound))
        }
    };

    match reply {
        Ok(content) => respond(ctx, &command, &content, false).await,
        Err(e) => respond(ctx, &command, &render_error(&e), true).await,
    }
}

fn authorize(
    policy: &PermissionPolicy,
    verb: Verb,
    user_id: UserId,
    roles: &[String],
) -> Result<(), JukeboxError> {
    policy.check(verb, user_id, roles).map_err(JukeboxError::from)
}

// Handlers específicos

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(&command.data.options, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id);

    let content = match bot
        .jukebox
        .play(guild_id, command.user.id, voice_channel_id, query)
        .await
    {
        Ok(outcome) => render_enqueue(&outcome),
        Err(e) => render_error(&e),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

// Mensajes

fn render_enqueue(outcome: &EnqueueOutcome) -> String {
    match outcome {
        EnqueueOutcome::Started { title } => format!("Now playing: **{title}**"),
        EnqueueOutcome::Queued {
            title,
            priority: true,
            ..
        } => format!("Priority song added to the front of the queue: **{title}**"),
        EnqueueOutcome::Queued {
            title, position, ..
        } => format!("Added to queue: **{title}** (#{position})"),
        EnqueueOutcome::Rejected { .. } => "Failed to prepare the audio source.".to_string(),
    }
}

fn render_queue(snapshot: &SessionSnapshot) -> String {
    let mut lines = Vec::new();
    if let (Some(title), Some(channel)) = (&snapshot.now_playing, snapshot.channel_id) {
        lines.push(format!("Now playing: **{}** in {}", title, channel.mention()));
    }

    if snapshot.queue.is_empty() {
        lines.push("The music queue is empty.".to_string());
    } else {
        lines.push("Current Music Queue:".to_string());
        lines.extend(
            snapshot
                .queue
                .iter()
                .enumerate()
                .map(|(idx, title)| format!("{}. {}", idx + 1, title)),
        );
    }
    lines.join("\n")
}

fn render_ambients(
    sounds: &std::collections::BTreeMap<UserId, String>,
    default_sound: &str,
) -> String {
    let mut lines = vec![format!("Default welcome sound: `{default_sound}`")];
    lines.extend(
        sounds
            .iter()
            .map(|(user, sound)| format!("{}: `{}`", user.mention(), sound)),
    );
    lines.join("\n")
}

fn render_error(error: &JukeboxError) -> String {
    match error {
        JukeboxError::NotInVoice => "You need to be in a voice channel to play music.".to_string(),
        JukeboxError::PermissionDenied(denial) => denial.to_string(),
        JukeboxError::UnknownSound(sound) => format!("Sound file not found: `{sound}`"),
        JukeboxError::Session(SessionError::Connection(TransportError::Move { .. })) => {
            "Failed to move to the voice channel.".to_string()
        }
        JukeboxError::Session(SessionError::Connection(_)) => {
            "Failed to connect to the voice channel.".to_string()
        }
        JukeboxError::Session(SessionError::Resolution(_)) => {
            "Sorry, I couldn't find the song.".to_string()
        }
        JukeboxError::Session(SessionError::Playback(_)) => {
            "Failed to prepare the audio source.".to_string()
        }
        JukeboxError::Session(SessionError::NothingPlaying) => {
            "No song is currently playing.".to_string()
        }
        JukeboxError::Session(SessionError::NotPaused) => "The song is not paused.".to_string(),
        JukeboxError::Storage(e) => {
            error!("❌ Error guardando sonidos de bienvenida: {}", e);
            "An unexpected error occurred. Please try again later.".to_string()
        }
    }
}

// Funciones auxiliares

fn subcommand(command: &CommandInteraction) -> Option<(&str, &[CommandDataOption])> {
    command.data.options.first().and_then(|opt| match &opt.value {
        CommandDataOptionValue::SubCommand(options) => Some((opt.name.as_str(), options.as_slice())),
        _ => None,
    })
}

fn string_option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn user_option(options: &[CommandDataOption], name: &str) -> Option<UserId> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_user_id())
}

/// Nombres de los roles del miembro, resueltos desde la caché del guild
fn member_role_names(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Vec<String> {
    let Some(member) = command.member.as_ref() else {
        return Vec::new();
    };
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        warn!("Guild {} no encontrada en caché", guild_id);
        return Vec::new();
    };
    member
        .roles
        .iter()
        .filter_map(|role_id| guild.roles.get(role_id).map(|role| role.name.clone()))
        .collect()
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
