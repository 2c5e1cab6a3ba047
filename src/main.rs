use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, model::id::UserId, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod sources;
mod storage;

use crate::audio::registry::SessionRegistry;
use crate::audio::session::SessionSettings;
use crate::audio::songbird_transport::SongbirdTransport;
use crate::bot::{Jukebox, JukeboxBot};
use crate::config::Config;
use crate::sources::YtDlpResolver;
use crate::storage::AmbientStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Sonidos de bienvenida persistidos
    let ambients = Arc::new(tokio::sync::Mutex::new(
        AmbientStore::open(config.data_dir.clone(), config.ambient_default_sound.clone()).await?,
    ));

    // Transporte de voz y sesiones por guild
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let resolver = Arc::new(YtDlpResolver::new(config.resolve_timeout()));
    let sessions = Arc::new(SessionRegistry::new(
        transport,
        resolver,
        SessionSettings {
            connect_timeout: config.connect_timeout(),
        },
    ));

    let jukebox = Arc::new(Jukebox::new(
        sessions,
        ambients,
        config.priority_user_id.map(UserId::new),
        config.ambient_for_everyone,
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = JukeboxBot::new(config.clone(), jukebox);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // ffmpeg no se usa: songbird decodifica con symphonia
    let version = YtDlpResolver::new(Duration::from_secs(5))
        .check_available()
        .await?;
    println!("OK (yt-dlp {version})");
    Ok(())
}
