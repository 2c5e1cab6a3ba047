use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::sources::{ResolvedTrack, TrackSource};

/// Una canción admitida en la cola. Inmutable una vez creada.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub title: String,
    pub source: TrackSource,
    pub priority: bool,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(track: ResolvedTrack, requested_by: UserId, priority: bool) -> Self {
        Self {
            title: track.title,
            source: track.source,
            priority,
            requested_by,
            added_at: Utc::now(),
        }
    }
}

/// Cola FIFO por guild. Las entradas prioritarias van al frente; la más
/// reciente gana la primera posición.
///
/// No es thread-safe por sí sola: solo se toca con el lock de la sesión.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<QueueEntry>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega una entrada; si `priority`, en la posición 0
    pub fn enqueue(&mut self, entry: QueueEntry, priority: bool) {
        if priority {
            info!("⏫ Prioritaria al frente de la cola: {}", entry.title);
            self.items.push_front(entry);
        } else {
            info!("➕ Agregado a la cola: {}", entry.title);
            self.items.push_back(entry);
        }
    }

    /// Saca la cabeza de la cola
    pub fn dequeue_front(&mut self) -> Option<QueueEntry> {
        let next = self.items.pop_front();
        match &next {
            Some(item) => debug!("➡️ Siguiente en cola: {}", item.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Limpia la cola y devuelve cuántas entradas se eliminaron
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    /// Títulos en orden de reproducción
    pub fn snapshot(&self) -> Vec<String> {
        self.items.iter().map(|item| item.title.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
