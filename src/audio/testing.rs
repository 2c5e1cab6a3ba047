//! Transporte falso para pruebas: registra llamadas y guarda la señal de fin
//! de la reproducción en curso para dispararla a mano.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::transport::{CompletionSignal, TransportError, VoiceConnection, VoiceTransport};
use crate::sources::TrackSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(ChannelId),
    Move(ChannelId),
    Disconnect,
    Play(TrackSource),
    Pause,
    Resume,
    Stop,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<TransportCall>,
    current: Option<CompletionSignal>,
    playing: bool,
    paused: bool,
    overlapping_plays: usize,
    rejected: HashSet<TrackSource>,
    fail_connects: bool,
    fail_moves: bool,
    connect_delay: Option<Duration>,
    move_delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn plays(&self) -> Vec<TrackSource> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Play(source) => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    /// Veces que se llamó a `play` con otra reproducción aún sin terminar
    pub fn overlapping_plays(&self) -> usize {
        self.state.lock().overlapping_plays
    }

    pub fn reject(&self, source: TrackSource) {
        self.state.lock().rejected.insert(source);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    pub fn fail_moves(&self, fail: bool) {
        self.state.lock().fail_moves = fail;
    }

    pub fn delay_connects(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn delay_moves(&self, delay: Duration) {
        self.state.lock().move_delay = Some(delay);
    }

    /// La reproducción actual termina con normalidad
    pub fn finish_current(&self) {
        self.complete(None);
    }

    /// La reproducción actual muere con un error del transporte
    pub fn fail_current(&self, error: &str) {
        self.complete(Some(error.to_string()));
    }

    fn complete(&self, error: Option<String>) {
        let signal = {
            let mut st = self.state.lock();
            st.playing = false;
            st.paused = false;
            st.current.take()
        };
        if let Some(signal) = signal {
            signal(error);
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<VoiceConnection, TransportError> {
        let (delay, fail) = {
            let mut st = self.state.lock();
            st.calls.push(TransportCall::Connect(channel_id));
            (st.connect_delay, st.fail_connects)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::Connect("channel is full".into()));
        }
        Ok(VoiceConnection {
            guild_id,
            channel_id,
        })
    }

    async fn move_to(
        &self,
        _connection: &VoiceConnection,
        channel_id: ChannelId,
    ) -> Result<(), TransportError> {
        let (delay, fail) = {
            let mut st = self.state.lock();
            st.calls.push(TransportCall::Move(channel_id));
            (st.move_delay, st.fail_moves)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::Move {
                channel: channel_id,
                reason: "missing permissions".into(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, _connection: &VoiceConnection) {
        let mut st = self.state.lock();
        st.calls.push(TransportCall::Disconnect);
        st.playing = false;
        st.paused = false;
        st.current = None;
    }

    async fn play(
        &self,
        _connection: &VoiceConnection,
        source: TrackSource,
        on_complete: CompletionSignal,
    ) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        st.calls.push(TransportCall::Play(source.clone()));
        if st.rejected.contains(&source) {
            return Err(TransportError::Rejected(source.describe()));
        }
        if st.current.is_some() {
            st.overlapping_plays += 1;
        }
        st.current = Some(on_complete);
        st.playing = true;
        st.paused = false;
        Ok(())
    }

    async fn is_playing(&self, _connection: &VoiceConnection) -> bool {
        let st = self.state.lock();
        st.playing && !st.paused
    }

    async fn is_paused(&self, _connection: &VoiceConnection) -> bool {
        let st = self.state.lock();
        st.playing && st.paused
    }

    async fn pause(&self, _connection: &VoiceConnection) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        st.calls.push(TransportCall::Pause);
        st.paused = true;
        Ok(())
    }

    async fn resume(&self, _connection: &VoiceConnection) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        st.calls.push(TransportCall::Resume);
        st.paused = false;
        Ok(())
    }

    async fn stop(&self, _connection: &VoiceConnection) -> Result<(), TransportError> {
        self.state.lock().calls.push(TransportCall::Stop);
        self.complete(None);
        Ok(())
    }
}

/// Deja correr las tareas lanzadas por las señales de fin
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
