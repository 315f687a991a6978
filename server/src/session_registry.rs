use crate::session::{Session, SessionCommand, SessionSummary};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use syncout_system::chrono::{DateTime, Utc};
use syncout_system::SessionId;
use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::oneshot;

pub type SessionTx = Sender<SessionCommand>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("session {0} is no longer running")]
    SessionClosed(SessionId),
}

/// Cheap, cloneable reference to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    tx: SessionTx,
}

impl SessionHandle {
    pub fn sender(&self) -> SessionTx {
        self.tx.clone()
    }

    pub async fn describe(&self) -> Result<SessionSummary, HubError> {
        let (reply, summary) = oneshot::channel();
        self.tx
            .send(SessionCommand::Describe { reply })
            .await
            .map_err(|_| HubError::SessionClosed(self.id.clone()))?;
        summary
            .await
            .map_err(|_| HubError::SessionClosed(self.id.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub total_users: usize,
}

/// Every session known to this process. Sessions live until shutdown.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    command_buffer: usize,
}

impl SessionRegistry {
    pub fn new(command_buffer: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            command_buffer: command_buffer.max(1),
        }
    }

    pub fn create(&self) -> SessionHandle {
        let mut sessions = self.lock();
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        let handle = self.spawn(id.clone());
        sessions.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().get(&SessionId::new(id)).cloned()
    }

    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        let id = SessionId::new(id);
        let mut sessions = self.lock();
        if let Some(handle) = sessions.get(&id) {
            return handle.clone();
        }
        let handle = self.spawn(id.clone());
        sessions.insert(id, handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.lock().values().cloned().collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let handles = self.handles();
        let mut stats = RegistryStats {
            active_sessions: handles.len(),
            total_users: 0,
        };
        for handle in handles {
            match handle.describe().await {
                Ok(summary) => stats.total_users += summary.users_count,
                Err(err) => log::warn!("{}", err),
            }
        }
        stats
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self, id: SessionId) -> SessionHandle {
        let session = Session::new(id.clone());
        let created_at = session.created_at;
        let tx = spawn_session(session, self.command_buffer);
        log::info!("Created session: {}", id);
        SessionHandle { id, created_at, tx }
    }
}

/// Runs `session` on its own task. Commands are applied one at a time, so the
/// task is the only writer of that session's state.
pub fn spawn_session(session: Session, buffer: usize) -> SessionTx {
    let (tx, mut rx) = channel::<SessionCommand>(buffer);

    tokio::spawn(async move {
        let mut session = session;
        log::debug!("session {} task - started", session.id);
        while let Some(command) = rx.recv().await {
            session.handle(command);
        }
        log::debug!("session {} task - terminated", session.id);
    });

    tx
}
