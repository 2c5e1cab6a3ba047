//! Sesión de reproducción por guild.
//!
//! Un único `tokio::sync::Mutex` serializa cola, estado de conexión y la
//! reproducción actual. Las llamadas lentas al transporte (connect, disconnect)
//! y la resolución de fuentes se hacen con el lock liberado: el estado
//! transitorio (`Connecting`, `Disconnecting`) se fija antes del await y se
//! finaliza después, y quien lo encuentre espera en `settled`.
//!
//! `move_to` es la excepción: corre con el lock tomado, acotado por
//! `connect_timeout`. La conexión sigue activa en el canal viejo durante el
//! movimiento, así que comandos y señales de fin esperan y se aplican después
//! sobre el canal nuevo.
//!
//! Cada `play` lleva un número de generación; una señal de fin cuya generación
//! no coincide con la reproducción actual se ignora.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::queue::{PlaybackQueue, QueueEntry};
use super::transport::{CompletionSignal, TransportError, VoiceConnection, VoiceTransport};
use crate::sources::{AudioSourceResolver, ResolutionError, TrackSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not join the voice channel: {0}")]
    Connection(TransportError),
    #[error("could not find that song: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("playback failed: {0}")]
    Playback(TransportError),
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("playback is not paused")]
    NotPaused,
}

/// Resultado de `enqueue_song`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// La canción pedida empezó a sonar
    Started { title: String },
    /// Quedó en la cola, `position` empieza en 1
    Queued {
        title: String,
        position: usize,
        priority: bool,
    },
    /// El transporte la rechazó al intentar reproducirla
    Rejected { title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientOutcome {
    Played,
    Dropped,
}

/// Lo que ocupa la conexión de voz
#[derive(Debug, Clone)]
pub enum Playing {
    Queued(QueueEntry),
    Ambient { user_id: UserId, source: TrackSource },
}

impl Playing {
    fn source(&self) -> TrackSource {
        match self {
            Self::Queued(entry) => entry.source.clone(),
            Self::Ambient { source, .. } => source.clone(),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Queued(entry) => entry.title.clone(),
            Self::Ambient { source, .. } => format!("ambient: {}", source.describe()),
        }
    }
}

#[derive(Debug)]
struct NowPlaying {
    generation: u64,
    what: Playing,
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    active: Option<VoiceConnection>,
    queue: PlaybackQueue,
    now_playing: Option<NowPlaying>,
    next_generation: u64,
    last_activity: Instant,
}

impl SessionState {
    fn is_idle_connected(&self) -> bool {
        self.connection == ConnectionState::Connected && self.now_playing.is_none()
    }

    fn accepts_ambient(&self) -> bool {
        match self.connection {
            // Una cola pendiente espera al próximo comando, no a un disparo ambiental
            ConnectionState::Disconnected => self.queue.is_empty(),
            ConnectionState::Connected => self.now_playing.is_none() && self.queue.is_empty(),
            ConnectionState::Connecting | ConnectionState::Disconnecting => false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Vista de solo lectura de una sesión
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub channel_id: Option<ChannelId>,
    pub now_playing: Option<String>,
    pub queue: Vec<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            channel_id: None,
            now_playing: None,
            queue: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    /// Espera estados transitorios y mueve aunque haya algo sonando
    Command,
    /// Desiste si la sesión está ocupada o en transición
    Ambient,
}

pub struct GuildSession {
    guild_id: GuildId,
    transport: Arc<dyn VoiceTransport>,
    resolver: Arc<dyn AudioSourceResolver>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    settled: Notify,
    me: Weak<GuildSession>,
}

impl GuildSession {
    pub fn new(
        guild_id: GuildId,
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<dyn AudioSourceResolver>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            guild_id,
            transport,
            resolver,
            settings,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                active: None,
                queue: PlaybackQueue::new(),
                now_playing: None,
                next_generation: 0,
                last_activity: Instant::now(),
            }),
            settled: Notify::new(),
            me: me.clone(),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock().await;
        SessionSnapshot {
            connection: st.connection,
            channel_id: st.active.as_ref().map(|c| c.channel_id),
            now_playing: st.now_playing.as_ref().map(|np| np.what.title()),
            queue: st.queue.snapshot(),
        }
    }

    /// Sesión desconectada, sin cola y sin actividad desde hace `max_idle`.
    /// Una sesión con el lock tomado nunca se considera ociosa.
    pub fn is_idle_for(&self, max_idle: Duration) -> bool {
        match self.state.try_lock() {
            Ok(st) => {
                st.connection == ConnectionState::Disconnected
                    && st.now_playing.is_none()
                    && st.queue.is_empty()
                    && st.last_activity.elapsed() >= max_idle
            }
            Err(_) => false,
        }
    }

    /// Conecta (o mueve) la sesión al canal indicado.
    ///
    /// Si tras conectar la sesión queda libre con canciones en cola, empieza
    /// a reproducir la primera.
    pub async fn request_connect(&self, channel_id: ChannelId) -> Result<(), SessionError> {
        self.acquire_connection(channel_id, ConnectMode::Command)
            .await?;

        let st = self.state.lock().await;
        if st.is_idle_connected() && !st.queue.is_empty() {
            self.advance_locked(st).await;
        }
        Ok(())
    }

    /// Resuelve, encola y, si la sesión está conectada y libre, reproduce.
    pub async fn enqueue_song(
        &self,
        query: &str,
        requested_by: UserId,
        priority: bool,
    ) -> Result<EnqueueOutcome, SessionError> {
        // Sin lock: la resolución puede tardar segundos
        let track = self.resolver.resolve(query).await?;
        let entry = QueueEntry::new(track, requested_by, priority);
        let title = entry.title.clone();

        let mut st = self.state.lock().await;
        st.touch();
        st.queue.enqueue(entry, priority);
        let position = if priority { 1 } else { st.queue.len() };

        if !st.is_idle_connected() {
            return Ok(EnqueueOutcome::Queued {
                title,
                position,
                priority,
            });
        }

        let queued_before = st.queue.len();
        let started = self.start_next_locked(&mut st).await;
        let consumed = queued_before - st.queue.len();

        let outcome = match &started {
            Some(_) if consumed == position => EnqueueOutcome::Started { title },
            _ if consumed < position => EnqueueOutcome::Queued {
                title,
                position: position - consumed,
                priority,
            },
            _ => EnqueueOutcome::Rejected { title },
        };

        if started.is_none() {
            // Nada pudo sonar y la cola quedó vacía
            self.disconnect_locked(st).await;
        }
        Ok(outcome)
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        let st = self.state.lock().await;
        let connection = match (&st.active, &st.now_playing) {
            (Some(connection), Some(_)) => connection,
            _ => return Err(SessionError::NothingPlaying),
        };
        if !self.transport.is_playing(connection).await {
            return Err(SessionError::NothingPlaying);
        }
        self.transport
            .pause(connection)
            .await
            .map_err(SessionError::Playback)?;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        let st = self.state.lock().await;
        let connection = match (&st.active, &st.now_playing) {
            (Some(connection), Some(_)) => connection,
            _ => return Err(SessionError::NotPaused),
        };
        if !self.transport.is_paused(connection).await {
            return Err(SessionError::NotPaused);
        }
        self.transport
            .resume(connection)
            .await
            .map_err(SessionError::Playback)?;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    /// Detiene lo que suena; la señal de fin se encarga de avanzar.
    /// Devuelve el título saltado.
    pub async fn skip(&self) -> Result<String, SessionError> {
        let mut st = self.state.lock().await;
        st.touch();
        let (connection, title) = match (&st.active, &st.now_playing) {
            (Some(connection), Some(np)) => (connection.clone(), np.what.title()),
            _ => return Err(SessionError::NothingPlaying),
        };
        self.transport
            .stop(&connection)
            .await
            .map_err(SessionError::Playback)?;
        info!("⏭️ Saltado '{}' en guild {}", title, self.guild_id);
        Ok(title)
    }

    /// Desconecta si la sesión quedó conectada sin nada que sonar.
    /// Devuelve `true` si desconectó.
    pub async fn leave_if_idle(&self) -> bool {
        let st = self.state.lock().await;
        if !st.is_idle_connected() || !st.queue.is_empty() {
            return false;
        }
        info!("📭 Nada que reproducir en guild {}, desconectando", self.guild_id);
        self.disconnect_locked(st).await;
        true
    }

    /// Vacía la cola sin tocar lo que suena
    pub async fn clear(&self) -> usize {
        let mut st = self.state.lock().await;
        st.touch();
        st.queue.clear()
    }

    /// Vacía la cola y fuerza la desconexión. Idempotente.
    /// Devuelve `true` si había una conexión que cerrar.
    pub async fn stop_all(&self) -> bool {
        loop {
            let mut st = self.state.lock().await;
            st.touch();
            st.queue.clear();
            match st.connection {
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    let settled = self.settled.notified();
                    drop(st);
                    settled.await;
                }
                ConnectionState::Disconnected => {
                    st.now_playing = None;
                    return false;
                }
                ConnectionState::Connected => {
                    // Se descarta antes del stop: su señal de fin llegará obsoleta
                    if st.now_playing.take().is_some() {
                        if let Some(connection) = st.active.clone() {
                            if let Err(e) = self.transport.stop(&connection).await {
                                debug!("stop durante stop_all en guild {}: {}", self.guild_id, e);
                            }
                        }
                    }
                    self.disconnect_locked(st).await;
                    info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
                    return true;
                }
            }
        }
    }

    /// Disparo ambiental: solo suena si la sesión está desconectada, o
    /// conectada sin nada sonando y con la cola vacía. Si no, se descarta.
    pub async fn play_ambient(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        source: TrackSource,
    ) -> Result<AmbientOutcome, SessionError> {
        {
            let st = self.state.lock().await;
            if !st.accepts_ambient() {
                info!(
                    "🔕 Sonido de bienvenida descartado en guild {}: sesión ocupada ({:?})",
                    self.guild_id, st.connection
                );
                return Ok(AmbientOutcome::Dropped);
            }
        }

        if !self
            .acquire_connection(channel_id, ConnectMode::Ambient)
            .await?
        {
            info!("🔕 Sonido de bienvenida descartado en guild {}", self.guild_id);
            return Ok(AmbientOutcome::Dropped);
        }

        let mut st = self.state.lock().await;
        st.touch();
        if !st.is_idle_connected() {
            return Ok(AmbientOutcome::Dropped);
        }
        if !st.queue.is_empty() {
            // Llegó una canción mientras conectábamos: la cola manda
            info!("🔕 Cola pendiente en guild {}, sonido de bienvenida descartado", self.guild_id);
            self.advance_locked(st).await;
            return Ok(AmbientOutcome::Dropped);
        }

        let Some(connection) = st.active.clone() else {
            return Ok(AmbientOutcome::Dropped);
        };
        match self
            .begin_playback_locked(&mut st, &connection, Playing::Ambient { user_id, source })
            .await
        {
            Ok(()) => Ok(AmbientOutcome::Played),
            Err(e) => {
                warn!("❌ Sonido de bienvenida falló en guild {}: {}", self.guild_id, e);
                self.disconnect_locked(st).await;
                Err(e)
            }
        }
    }

    /// Punto de entrada de la señal de fin del transporte
    async fn on_playback_finished(&self, generation: u64, error: Option<String>) {
        let mut st = self.state.lock().await;
        let finished = match st.now_playing.take() {
            Some(np) if np.generation == generation => np,
            other => {
                st.now_playing = other;
                debug!("Señal de fin obsoleta ({}) en guild {}", generation, self.guild_id);
                return;
            }
        };
        st.touch();

        if let Some(error) = error {
            warn!(
                "⚠️ {} terminó con error en guild {}: {}",
                finished.what.title(),
                self.guild_id,
                error
            );
        }

        match finished.what {
            Playing::Ambient { user_id, .. } => {
                debug!("🔔 Bienvenida de {} terminada en guild {}", user_id, self.guild_id);
                self.disconnect_locked(st).await;
            }
            Playing::Queued(entry) => {
                debug!("🎵 Track terminado en guild {}: {}", self.guild_id, entry.title);
                self.advance_locked(st).await;
            }
        }
    }

    /// Reproduce la siguiente de la cola o, si no queda nada, desconecta
    async fn advance_locked(&self, mut st: MutexGuard<'_, SessionState>) {
        if st.connection == ConnectionState::Connected
            && self.start_next_locked(&mut st).await.is_some()
        {
            return;
        }
        info!("📭 Cola vacía en guild {}, desconectando", self.guild_id);
        self.disconnect_locked(st).await;
    }

    /// Saca entradas hasta que una suene. Las rechazadas se registran y se saltan.
    async fn start_next_locked(&self, st: &mut SessionState) -> Option<String> {
        let connection = st.active.clone()?;
        while let Some(entry) = st.queue.dequeue_front() {
            let title = entry.title.clone();
            match self
                .begin_playback_locked(st, &connection, Playing::Queued(entry))
                .await
            {
                Ok(()) => return Some(title),
                Err(e) => warn!("⏭️ '{}' no se pudo reproducir en guild {}: {}", title, self.guild_id, e),
            }
        }
        None
    }

    async fn begin_playback_locked(
        &self,
        st: &mut SessionState,
        connection: &VoiceConnection,
        what: Playing,
    ) -> Result<(), SessionError> {
        let generation = st.next_generation;
        st.next_generation += 1;

        let signal = self.completion_signal(generation);
        self.transport
            .play(connection, what.source(), signal)
            .await
            .map_err(SessionError::Playback)?;

        info!("🎵 Reproduciendo: {} en guild {}", what.title(), self.guild_id);
        if let Playing::Queued(entry) = &what {
            debug!(
                "Pedida por {} hace {}s",
                entry.requested_by,
                (chrono::Utc::now() - entry.added_at).num_seconds()
            );
        }
        st.now_playing = Some(NowPlaying { generation, what });
        Ok(())
    }

    fn completion_signal(&self, generation: u64) -> CompletionSignal {
        let session = self.me.clone();
        let runtime = tokio::runtime::Handle::current();
        Box::new(move |error| {
            let Some(session) = session.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                session.on_playback_finished(generation, error).await;
            });
        })
    }

    /// Connected -> Disconnecting -> Disconnected. Libera el lock durante la desconexión.
    async fn disconnect_locked(&self, mut st: MutexGuard<'_, SessionState>) {
        st.now_playing = None;
        let Some(connection) = st.active.take() else {
            st.connection = ConnectionState::Disconnected;
            return;
        };
        st.connection = ConnectionState::Disconnecting;
        drop(st);

        self.transport.disconnect(&connection).await;

        self.state.lock().await.connection = ConnectionState::Disconnected;
        self.settled.notify_waiters();
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }

    /// Devuelve `Ok(false)` solo en modo ambiente, cuando la sesión no está libre.
    async fn acquire_connection(
        &self,
        channel_id: ChannelId,
        mode: ConnectMode,
    ) -> Result<bool, SessionError> {
        loop {
            let mut st = self.state.lock().await;
            st.touch();
            match st.connection {
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    if mode == ConnectMode::Ambient {
                        return Ok(false);
                    }
                    let settled = self.settled.notified();
                    drop(st);
                    debug!("⏳ Esperando transición de conexión en guild {}", self.guild_id);
                    settled.await;
                }
                ConnectionState::Disconnected => {
                    st.connection = ConnectionState::Connecting;
                    drop(st);
                    return self.connect_unlocked(channel_id).await.map(|()| true);
                }
                ConnectionState::Connected => {
                    let Some(active) = st.active.clone() else {
                        error!("Sesión conectada sin conexión activa en guild {}", self.guild_id);
                        st.connection = ConnectionState::Disconnected;
                        continue;
                    };
                    if active.channel_id == channel_id {
                        return Ok(true);
                    }
                    if mode == ConnectMode::Ambient && !st.accepts_ambient() {
                        return Ok(false);
                    }

                    let moved = match timeout(
                        self.settings.connect_timeout,
                        self.transport.move_to(&active, channel_id),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout(self.settings.connect_timeout)),
                    };
                    return match moved {
                        Ok(()) => {
                            if let Some(active) = st.active.as_mut() {
                                active.channel_id = channel_id;
                            }
                            Ok(true)
                        }
                        Err(e) => {
                            warn!("❌ No se pudo mover en guild {}: {}", self.guild_id, e);
                            Err(SessionError::Connection(e))
                        }
                    };
                }
            }
        }
    }

    /// Se llama con el estado ya en `Connecting`
    async fn connect_unlocked(&self, channel_id: ChannelId) -> Result<(), SessionError> {
        info!("🔌 Conectando al canal {} en guild {}", channel_id, self.guild_id);
        let result = match timeout(
            self.settings.connect_timeout,
            self.transport.connect(self.guild_id, channel_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // El join abortado puede haber dejado una llamada a medias
                let stale = VoiceConnection {
                    guild_id: self.guild_id,
                    channel_id,
                };
                self.transport.disconnect(&stale).await;
                Err(TransportError::Timeout(self.settings.connect_timeout))
            }
        };

        let outcome = {
            let mut st = self.state.lock().await;
            match result {
                Ok(connection) => {
                    st.active = Some(connection);
                    st.connection = ConnectionState::Connected;
                    Ok(())
                }
                Err(e) => {
                    error!("❌ Error al conectar al canal de voz en guild {}: {}", self.guild_id, e);
                    st.connection = ConnectionState::Disconnected;
                    Err(SessionError::Connection(e))
                }
            }
        };
        self.settled.notify_waiters();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{settle, FakeTransport, TransportCall};
    use crate::sources::{MockAudioSourceResolver, ResolvedTrack};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const GUILD: GuildId = GuildId::new(10);
    const LOBBY: ChannelId = ChannelId::new(100);
    const STAGE: ChannelId = ChannelId::new(200);
    const ALICE: UserId = UserId::new(1);

    fn url(title: &str) -> TrackSource {
        TrackSource::Url(format!("https://cdn.test/{title}"))
    }

    fn echo_resolver() -> MockAudioSourceResolver {
        let mut resolver = MockAudioSourceResolver::new();
        resolver.expect_resolve().returning(|query| {
            Ok(ResolvedTrack {
                title: query.to_string(),
                source: url(query),
            })
        });
        resolver
    }

    fn session_with(transport: &Arc<FakeTransport>, resolver: MockAudioSourceResolver) -> Arc<GuildSession> {
        GuildSession::new(
            GUILD,
            transport.clone(),
            Arc::new(resolver),
            SessionSettings {
                connect_timeout: Duration::from_millis(200),
            },
        )
    }

    fn session(transport: &Arc<FakeTransport>) -> Arc<GuildSession> {
        session_with(transport, echo_resolver())
    }

    fn ambient() -> TrackSource {
        TrackSource::File(PathBuf::from("audio/welcome.mp3"))
    }

    #[tokio::test]
    async fn first_song_starts_immediately_when_connected() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        session.request_connect(LOBBY).await.unwrap();
        let outcome = session.enqueue_song("a", ALICE, false).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Started { title: "a".into() });
        let snap = session.snapshot().await;
        assert_eq!(snap.connection, ConnectionState::Connected);
        assert_eq!(snap.now_playing.as_deref(), Some("a"));
        assert!(snap.queue.is_empty());
        assert_eq!(transport.plays(), vec![url("a")]);
    }

    #[tokio::test]
    async fn priority_song_plays_before_earlier_normal_song() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("current", ALICE, false).await.unwrap();

        let a = session.enqueue_song("a", ALICE, false).await.unwrap();
        let b = session.enqueue_song("b", ALICE, true).await.unwrap();
        assert_eq!(a, EnqueueOutcome::Queued { title: "a".into(), position: 1, priority: false });
        assert_eq!(b, EnqueueOutcome::Queued { title: "b".into(), position: 1, priority: true });
        assert_eq!(session.snapshot().await.queue, vec!["b", "a"]);

        transport.finish_current();
        settle().await;
        transport.finish_current();
        settle().await;

        assert_eq!(transport.plays(), vec![url("current"), url("b"), url("a")]);
    }

    #[tokio::test]
    async fn songs_queued_while_disconnected_start_on_connect() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        let a = session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, true).await.unwrap();
        assert!(matches!(a, EnqueueOutcome::Queued { .. }));
        assert!(transport.plays().is_empty());

        session.request_connect(LOBBY).await.unwrap();
        assert_eq!(transport.plays(), vec![url("b")]);
        assert_eq!(session.snapshot().await.queue, vec!["a"]);
    }

    #[tokio::test]
    async fn completion_with_empty_queue_disconnects_exactly_once() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.request_connect(LOBBY).await.unwrap();
        transport.finish_current();
        settle().await;

        let snap = session.snapshot().await;
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert_eq!(snap.now_playing, None);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Disconnect)), 1);
    }

    #[tokio::test]
    async fn now_playing_tracks_transport_playing_state() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();

        let connection = VoiceConnection { guild_id: GUILD, channel_id: LOBBY };
        assert!(session.snapshot().await.now_playing.is_none());
        assert!(!transport.is_playing(&connection).await);

        session.enqueue_song("a", ALICE, false).await.unwrap();
        assert!(session.snapshot().await.now_playing.is_some());
        assert!(transport.is_playing(&connection).await);

        transport.finish_current();
        settle().await;
        assert!(session.snapshot().await.now_playing.is_none());
        assert!(!transport.is_playing(&connection).await);
    }

    #[tokio::test]
    async fn rejected_source_is_skipped() {
        let transport = FakeTransport::new();
        transport.reject(url("broken"));
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("first", ALICE, false).await.unwrap();
        session.enqueue_song("broken", ALICE, false).await.unwrap();
        session.enqueue_song("good", ALICE, false).await.unwrap();

        transport.finish_current();
        settle().await;

        let snap = session.snapshot().await;
        assert_eq!(snap.now_playing.as_deref(), Some("good"));
        assert!(snap.queue.is_empty());
    }

    #[tokio::test]
    async fn rejected_only_song_reports_and_disconnects() {
        let transport = FakeTransport::new();
        transport.reject(url("broken"));
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();

        let outcome = session.enqueue_song("broken", ALICE, false).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Rejected { title: "broken".into() });
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn playback_error_advances_the_queue() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, false).await.unwrap();

        transport.fail_current("decoder exploded");
        settle().await;

        assert_eq!(session.snapshot().await.now_playing.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn resolution_failure_leaves_queue_untouched() {
        let transport = FakeTransport::new();
        let mut resolver = MockAudioSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|q| Err(ResolutionError::NotFound(q.to_string())));
        let session = session_with(&transport, resolver);
        session.request_connect(LOBBY).await.unwrap();

        let err = session.enqueue_song("???", ALICE, false).await.unwrap_err();

        assert!(matches!(err, SessionError::Resolution(ResolutionError::NotFound(_))));
        assert!(session.snapshot().await.queue.is_empty());
        assert!(transport.plays().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_stays_disconnected() {
        let transport = FakeTransport::new();
        transport.fail_connects(true);
        let session = session(&transport);

        let err = session.request_connect(LOBBY).await.unwrap_err();

        assert!(matches!(err, SessionError::Connection(_)));
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Connect(_))), 1);
    }

    #[tokio::test]
    async fn connect_timeout_is_a_connection_error() {
        let transport = FakeTransport::new();
        transport.delay_connects(Duration::from_secs(2));
        let session = session(&transport);

        let err = session.request_connect(LOBBY).await.unwrap_err();

        assert!(matches!(err, SessionError::Connection(TransportError::Timeout(_))));
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connecting_to_the_active_channel_is_a_no_op() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        session.request_connect(LOBBY).await.unwrap();
        session.request_connect(LOBBY).await.unwrap();

        assert_eq!(transport.calls(), vec![TransportCall::Connect(LOBBY)]);
    }

    #[tokio::test]
    async fn move_keeps_connection_and_failed_move_stays_put() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();

        session.request_connect(STAGE).await.unwrap();
        assert_eq!(session.snapshot().await.channel_id, Some(STAGE));

        transport.fail_moves(true);
        let err = session.request_connect(LOBBY).await.unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
        let snap = session.snapshot().await;
        assert_eq!(snap.connection, ConnectionState::Connected);
        assert_eq!(snap.channel_id, Some(STAGE));
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Disconnect)), 0);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_transport_connect() {
        let transport = FakeTransport::new();
        transport.delay_connects(Duration::from_millis(50));
        let session = session(&transport);

        let (a, b) = tokio::join!(session.request_connect(LOBBY), session.request_connect(LOBBY));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Connect(_))), 1);
    }

    #[tokio::test]
    async fn concurrent_enqueues_never_play_twice() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();

        let (a, b) = tokio::join!(
            session.enqueue_song("a", ALICE, false),
            session.enqueue_song("b", ALICE, false)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(transport.plays().len(), 1);
        assert_eq!(transport.overlapping_plays(), 0);
        assert_eq!(session.snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn skip_while_idle_makes_no_transport_calls() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        let err = session.skip().await.unwrap_err();

        assert!(matches!(err, SessionError::NothingPlaying));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn skip_advances_to_next_song() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, false).await.unwrap();

        assert_eq!(session.skip().await.unwrap(), "a");
        settle().await;

        assert_eq!(session.snapshot().await.now_playing.as_deref(), Some("b"));
        assert_eq!(transport.overlapping_plays(), 0);
    }

    #[tokio::test]
    async fn pause_and_resume_require_matching_state() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        assert!(matches!(session.pause().await, Err(SessionError::NothingPlaying)));
        assert!(matches!(session.resume().await, Err(SessionError::NotPaused)));

        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();

        assert!(matches!(session.resume().await, Err(SessionError::NotPaused)));
        session.pause().await.unwrap();
        assert!(matches!(session.pause().await, Err(SessionError::NothingPlaying)));
        session.resume().await.unwrap();

        assert_eq!(session.snapshot().await.connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn clear_keeps_current_song() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, false).await.unwrap();
        session.enqueue_song("c", ALICE, false).await.unwrap();

        assert_eq!(session.clear().await, 2);

        let snap = session.snapshot().await;
        assert_eq!(snap.now_playing.as_deref(), Some("a"));
        assert!(snap.queue.is_empty());
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, false).await.unwrap();

        assert!(session.stop_all().await);
        settle().await;
        assert!(!session.stop_all().await);

        let snap = session.snapshot().await;
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert!(snap.queue.is_empty());
        assert!(snap.now_playing.is_none());
        // El stop no debe encadenar "b" ni desconectar dos veces
        assert_eq!(transport.plays(), vec![url("a")]);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Disconnect)), 1);
    }

    #[tokio::test]
    async fn stop_all_on_fresh_session_is_quiet() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        assert!(!session.stop_all().await);
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn ambient_plays_when_disconnected_and_always_disconnects() {
        let transport = FakeTransport::new();
        let session = session(&transport);

        let outcome = session.play_ambient(ALICE, LOBBY, ambient()).await.unwrap();
        assert_eq!(outcome, AmbientOutcome::Played);
        assert_eq!(transport.plays(), vec![ambient()]);

        transport.finish_current();
        settle().await;

        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Disconnect)), 1);
    }

    #[tokio::test]
    async fn ambient_is_dropped_while_queue_plays() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();
        session.enqueue_song("b", ALICE, false).await.unwrap();
        let before = session.snapshot().await;
        let calls_before = transport.calls().len();

        let outcome = session.play_ambient(ALICE, STAGE, ambient()).await.unwrap();

        assert_eq!(outcome, AmbientOutcome::Dropped);
        assert_eq!(session.snapshot().await, before);
        assert_eq!(transport.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn ambient_is_dropped_when_idle_with_pending_queue() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.enqueue_song("a", ALICE, false).await.unwrap();

        let outcome = session.play_ambient(ALICE, LOBBY, ambient()).await.unwrap();

        assert_eq!(outcome, AmbientOutcome::Dropped);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn ambient_is_dropped_while_connecting() {
        let transport = FakeTransport::new();
        transport.delay_connects(Duration::from_millis(50));
        let session = session(&transport);

        let (connect, ambient_outcome) = tokio::join!(
            session.request_connect(LOBBY),
            async {
                tokio::task::yield_now().await;
                session.play_ambient(ALICE, LOBBY, ambient()).await
            }
        );

        connect.unwrap();
        assert_eq!(ambient_outcome.unwrap(), AmbientOutcome::Dropped);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Connect(_))), 1);
        assert!(transport.plays().is_empty());
    }

    #[tokio::test]
    async fn song_admitted_while_ambient_connects_wins() {
        let transport = FakeTransport::new();
        transport.delay_connects(Duration::from_millis(50));
        let session = session(&transport);

        let (ambient_outcome, enqueued) = tokio::join!(
            session.play_ambient(ALICE, LOBBY, ambient()),
            async {
                tokio::task::yield_now().await;
                session.enqueue_song("a", ALICE, false).await
            }
        );

        assert_eq!(ambient_outcome.unwrap(), AmbientOutcome::Dropped);
        assert!(matches!(enqueued.unwrap(), EnqueueOutcome::Queued { .. }));
        assert_eq!(transport.plays(), vec![url("a")]);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Connect(_))), 1);
        assert_eq!(session.snapshot().await.now_playing.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn commands_wait_for_a_slow_move() {
        let transport = FakeTransport::new();
        transport.delay_moves(Duration::from_millis(50));
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();

        let (moved, snapshot) = tokio::join!(session.request_connect(STAGE), async {
            tokio::task::yield_now().await;
            session.snapshot().await
        });

        moved.unwrap();
        assert_eq!(snapshot.channel_id, Some(STAGE));
        assert_eq!(snapshot.now_playing.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn leave_if_idle_only_disconnects_an_idle_session() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();

        assert!(!session.leave_if_idle().await);
        assert_eq!(session.snapshot().await.connection, ConnectionState::Connected);

        session.stop_all().await;
        session.request_connect(LOBBY).await.unwrap();
        assert!(session.leave_if_idle().await);
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
        assert!(!session.leave_if_idle().await);
    }

    #[tokio::test]
    async fn song_enqueued_during_ambient_waits_for_next_command() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.play_ambient(ALICE, LOBBY, ambient()).await.unwrap();

        let outcome = session.enqueue_song("a", ALICE, false).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Queued { .. }));

        transport.finish_current();
        settle().await;
        assert_eq!(session.snapshot().await.connection, ConnectionState::Disconnected);
        assert_eq!(session.snapshot().await.queue, vec!["a"]);

        session.request_connect(LOBBY).await.unwrap();
        assert_eq!(session.snapshot().await.now_playing.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn stale_completion_is_ignored() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        session.request_connect(LOBBY).await.unwrap();
        session.enqueue_song("a", ALICE, false).await.unwrap();

        session.on_playback_finished(999, None).await;

        assert_eq!(session.snapshot().await.now_playing.as_deref(), Some("a"));
        assert_eq!(session.snapshot().await.connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn idle_detection_requires_disconnected_empty_session() {
        let transport = FakeTransport::new();
        let session = session(&transport);
        assert!(session.is_idle_for(Duration::ZERO));

        session.request_connect(LOBBY).await.unwrap();
        assert!(!session.is_idle_for(Duration::ZERO));

        session.stop_all().await;
        assert!(session.is_idle_for(Duration::ZERO));
        assert!(!session.is_idle_for(Duration::from_secs(3600)));
    }
}
