use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use uuid::Uuid;

/// Messages a session may have queued before it is dropped as too slow
pub const SESSION_QUEUE_CAPACITY: usize = 256;

struct Session {
    organization_id: Uuid,
    sender: Sender<String>,
}

/// Registry of live WebSocket sessions, each tagged with its organization.
///
/// Messages are serialized once per broadcast and queued on each session's
/// bounded channel; the socket task drains the channel. A session whose queue
/// is full is removed, which closes its channel and ends the socket task.
pub struct TelemetryHub {
    sessions: RwLock<HashMap<Uuid, Session>>,
    capacity: usize,
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::with_capacity(SESSION_QUEUE_CAPACITY)
    }
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a session and return its id with the receiving end of its queue
    pub fn register(&self, organization_id: Uuid) -> (Uuid, Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let session_id = Uuid::new_v4();
        let total = {
            let mut sessions = self.write();
            sessions.insert(session_id, Session { organization_id, sender });
            sessions.len()
        };
        tracing::info!(
            "WebSocket session {} opened for organization {} ({} connected)",
            session_id,
            organization_id,
            total
        );
        (session_id, receiver)
    }

    pub fn unregister(&self, session_id: Uuid) {
        if self.write().remove(&session_id).is_some() {
            tracing::debug!("WebSocket session {} removed", session_id);
        }
    }

    /// Send to every open session of the organization. Returns how many received it.
    pub fn broadcast_to_org(&self, organization_id: Uuid, message: &Value) -> usize {
        let text = message.to_string();
        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut lagging = Vec::new();

        for (id, session) in self.read().iter() {
            if session.organization_id != organization_id {
                continue;
            }
            match session.sender.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => lagging.push(*id),
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if !closed.is_empty() || !lagging.is_empty() {
            let mut sessions = self.write();
            for id in closed.iter().chain(&lagging) {
                sessions.remove(id);
            }
        }
        if !closed.is_empty() {
            tracing::warn!("Dropped {} closed WebSocket sessions", closed.len());
        }
        if !lagging.is_empty() {
            tracing::warn!(
                "Dropped {} WebSocket sessions with {} undelivered messages",
                lagging.len(),
                self.capacity
            );
        }

        delivered
    }

    pub fn connected_sessions(&self) -> usize {
        self.read().len()
    }

    pub fn sessions_for_org(&self, organization_id: Uuid) -> usize {
        self.read()
            .values()
            .filter(|s| s.organization_id == organization_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_registered_sessions() {
        let hub = TelemetryHub::new();
        let org = Uuid::new_v4();
        let (a, _rx_a) = hub.register(org);
        let (_b, _rx_b) = hub.register(Uuid::new_v4());
        assert_eq!(hub.connected_sessions(), 2);
        assert_eq!(hub.sessions_for_org(org), 1);

        hub.unregister(a);
        assert_eq!(hub.connected_sessions(), 1);
        hub.unregister(a);
        assert_eq!(hub.connected_sessions(), 1);
    }

    #[test]
    fn broadcast_stays_within_the_organization() {
        let hub = TelemetryHub::new();
        let org = Uuid::new_v4();
        let (_s1, mut rx1) = hub.register(org);
        let (_s2, mut rx2) = hub.register(org);
        let (_s3, mut other) = hub.register(Uuid::new_v4());

        let delivered = hub.broadcast_to_org(org, &json!({"type": "DYNAMIC_TELEMETRY"}));
        assert_eq!(delivered, 2);
        assert_eq!(rx1.try_recv().unwrap(), r#"{"type":"DYNAMIC_TELEMETRY"}"#);
        assert!(rx2.try_recv().is_ok());
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn closed_sessions_are_removed_after_broadcast() {
        let hub = TelemetryHub::new();
        let org = Uuid::new_v4();
        let (_live, _rx) = hub.register(org);
        let (_gone, rx_gone) = hub.register(org);
        drop(rx_gone);

        assert_eq!(hub.broadcast_to_org(org, &json!({"n": 1})), 1);
        assert_eq!(hub.connected_sessions(), 1);
    }

    #[test]
    fn slow_sessions_are_dropped_when_their_queue_fills() {
        let hub = TelemetryHub::with_capacity(2);
        let org = Uuid::new_v4();
        let (_fast, mut fast_rx) = hub.register(org);
        let (_slow, mut slow_rx) = hub.register(org);

        for n in 0..2 {
            assert_eq!(hub.broadcast_to_org(org, &json!({ "n": n })), 2);
            assert!(fast_rx.try_recv().is_ok());
        }
        assert_eq!(hub.broadcast_to_org(org, &json!({"n": 2})), 1);
        assert_eq!(hub.connected_sessions(), 1);

        // queued messages still drain, then the channel reports closed
        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_ok());
        assert!(matches!(
            slow_rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(fast_rx.try_recv().is_ok());
    }
}
