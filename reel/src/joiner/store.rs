use std::collections::HashMap;

use metrics::gauge;
use reel_config::shared::SessionLimitsConfig;

use crate::bail;
use crate::clients::FinishedClients;
use crate::error::{ErrorKind, ReelResult};
use crate::joiner::session::JoinSession;
use crate::metrics::{REEL_JOIN_SESSIONS, WORKER_LABEL};
use crate::types::ClientId;

/// Whether an inbound batch may be processed for its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The client has a live session, created when this is the first batch seen for it.
    Live,
    /// The client already finished, was discarded or was refused; the batch must be dropped.
    Finished,
}

/// Arena of the join sessions of one joiner shard, keyed by client.
///
/// Only the join loop of the shard touches the store, so no locking is involved.
#[derive(Debug)]
pub struct SessionStore {
    worker: String,
    sessions: HashMap<ClientId, JoinSession>,
    finished: FinishedClients,
    limits: SessionLimitsConfig,
}

impl SessionStore {
    pub fn new(worker: impl Into<String>, limits: SessionLimitsConfig) -> Self {
        Self {
            worker: worker.into(),
            sessions: HashMap::new(),
            finished: FinishedClients::new(limits.finished_clients_memory),
            limits,
        }
    }

    /// Admits a batch of `client_id`, creating its session on first sight.
    ///
    /// Fails with [`ErrorKind::SessionLimitExceeded`] when a new session would exceed the
    /// configured bound.
    pub fn admit(&mut self, client_id: &ClientId) -> ReelResult<Admission> {
        if self.finished.contains(client_id) {
            return Ok(Admission::Finished);
        }

        if self.sessions.contains_key(client_id) {
            return Ok(Admission::Live);
        }

        if self.sessions.len() >= self.limits.max_sessions {
            bail!(
                ErrorKind::SessionLimitExceeded,
                "Too many live join sessions",
                format!(
                    "refusing client {client_id}, {} sessions are live",
                    self.sessions.len()
                )
            );
        }

        self.sessions.insert(
            client_id.clone(),
            JoinSession::new(client_id.clone(), self.limits.max_pending_batches),
        );
        self.record_sessions();

        Ok(Admission::Live)
    }

    pub fn get_mut(&mut self, client_id: &ClientId) -> Option<&mut JoinSession> {
        self.sessions.get_mut(client_id)
    }

    /// Destroys the session of `client_id`, if any, and remembers the client as finished so that
    /// its later batches are dropped. Returns the removed session.
    pub fn finish(&mut self, client_id: &ClientId) -> Option<JoinSession> {
        let session = self.sessions.remove(client_id);
        self.finished.insert(client_id.clone());
        self.record_sessions();

        session
    }

    pub fn is_finished(&self, client_id: &ClientId) -> bool {
        self.finished.contains(client_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the number of probe batches buffered across all sessions.
    pub fn pending_batches(&self) -> usize {
        self.sessions.values().map(JoinSession::pending_len).sum()
    }

    fn record_sessions(&self) {
        gauge!(REEL_JOIN_SESSIONS, WORKER_LABEL => self.worker.clone()).set(self.sessions.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_sessions: usize) -> SessionLimitsConfig {
        SessionLimitsConfig {
            max_sessions,
            ..Default::default()
        }
    }

    #[test]
    fn sessions_are_created_lazily_once() {
        let mut store = SessionStore::new("joiner-0", limits(4));
        let client_id = ClientId::new("a");

        assert_eq!(store.admit(&client_id).unwrap(), Admission::Live);
        assert_eq!(store.admit(&client_id).unwrap(), Admission::Live);
        assert_eq!(store.len(), 1);
        assert!(store.get_mut(&client_id).is_some());
    }

    #[test]
    fn session_limit_rejects_new_clients_only() {
        let mut store = SessionStore::new("joiner-0", limits(1));
        store.admit(&ClientId::new("a")).unwrap();

        let err = store.admit(&ClientId::new("b")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SessionLimitExceeded);
        assert!(store.admit(&ClientId::new("a")).is_ok());
    }

    #[test]
    fn finished_clients_do_not_reopen_sessions() {
        let mut store = SessionStore::new("joiner-0", limits(4));
        let client_id = ClientId::new("a");
        store.admit(&client_id).unwrap();

        assert!(store.finish(&client_id).is_some());

        assert_eq!(store.admit(&client_id).unwrap(), Admission::Finished);
        assert!(store.is_empty());
        assert!(store.is_finished(&client_id));
    }

    #[test]
    fn refused_clients_stay_out_once_remembered() {
        let mut store = SessionStore::new("joiner-0", limits(1));
        let (a, b) = (ClientId::new("a"), ClientId::new("b"));
        store.admit(&a).unwrap();
        assert!(store.admit(&b).is_err());

        assert!(store.finish(&b).is_none());
        store.finish(&a);

        assert_eq!(store.admit(&b).unwrap(), Admission::Finished);
    }
}
