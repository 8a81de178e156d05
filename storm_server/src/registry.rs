//! Session registry.
//!
//! Maps opaque `SessionId`s to per-connection state. The accept loop inserts,
//! session handlers update energies and remove themselves, and the broadcast
//! loop reads a point-in-time snapshot and removes sessions whose writes fail.
//!
//! The map lock is only held for short synchronous sections, never across an
//! `.await`. Writers sit behind their own async mutex so a broadcast can write
//! to one session while the map stays free for everyone else.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use storm_shared::net::SessionId;
use tokio::{
    net::tcp::OwnedWriteHalf,
    sync::{Mutex as AsyncMutex, Notify},
};

/// Shared write side of one session.
pub type SessionWriter<W> = Arc<AsyncMutex<W>>;

struct Session<W> {
    peer: SocketAddr,
    energy: f32,
    writer: SessionWriter<W>,
    closed: Arc<Notify>,
}

/// Read-only view of one session, for status output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub energy: f32,
}

/// Given to the task that reads from a session.
#[derive(Debug)]
pub struct SessionTicket {
    pub id: SessionId,
    closed: Arc<Notify>,
}

impl SessionTicket {
    /// Resolves once the session has been removed by anyone.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

/// Live sessions keyed by id.
pub struct Registry<W = OwnedWriteHalf> {
    sessions: Mutex<HashMap<SessionId, Session<W>>>,
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session with energy 0 under a fresh id.
    pub fn register(&self, peer: SocketAddr, writer: W) -> SessionTicket {
        let id = SessionId::new_unique();
        let closed = Arc::new(Notify::new());
        self.sessions.lock().insert(
            id,
            Session {
                peer,
                energy: 0.0,
                writer: Arc::new(AsyncMutex::new(writer)),
                closed: closed.clone(),
            },
        );
        SessionTicket { id, closed }
    }

    /// Overwrites the session's energy. Returns `false` if the id is gone.
    pub fn set_energy(&self, id: SessionId, energy: f32) -> bool {
        match self.sessions.lock().get_mut(&id) {
            Some(session) => {
                session.energy = energy;
                true
            }
            None => false,
        }
    }

    pub fn energy(&self, id: SessionId) -> Option<f32> {
        self.sessions.lock().get(&id).map(|s| s.energy)
    }

    /// Removes the session and wakes its reader. Idempotent.
    ///
    /// The connection closes once the reader and any in-flight broadcast have
    /// dropped their halves.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id);
        match removed {
            Some(session) => {
                session.closed.notify_one();
                true
            }
            None => false,
        }
    }

    /// Removes every session. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (_, session) in &drained {
            session.closed.notify_one();
        }
        drained.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Current energies of all sessions, in no particular order.
    pub fn energies(&self) -> Vec<f32> {
        self.sessions.lock().values().map(|s| s.energy).collect()
    }

    /// Point-in-time list of writers, ordered by id.
    pub fn snapshot(&self) -> Vec<(SessionId, SessionWriter<W>)> {
        let mut out: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, s)| (*id, s.writer.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut out: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                peer: s.peer,
                energy: s.energy,
            })
            .collect();
        out.sort_by_key(|info| info.id);
        out
    }
}
