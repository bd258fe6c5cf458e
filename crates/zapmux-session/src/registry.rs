//! Process-wide session registry.
//!
//! Owns the map from connection id to live session and enforces the one
//! invariant everything else leans on: at most one live session, and so at
//! most one protocol socket, per connection id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zapmux_core::traits::{CredentialStore, ProtocolConnector};
use zapmux_core::types::SessionStatus;
use zapmux_core::ZapError;

use crate::backoff::ReconnectPolicy;
use crate::session::Session;
use crate::version::VersionResolver;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    connector: Arc<dyn ProtocolConnector>,
    credentials: Arc<dyn CredentialStore>,
    versions: Arc<VersionResolver>,
    policy: ReconnectPolicy,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn ProtocolConnector>,
        credentials: Arc<dyn CredentialStore>,
        versions: Arc<VersionResolver>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            connector,
            credentials,
            versions,
            policy,
        }
    }

    /// Start (or return) the session for `connection_id`.
    ///
    /// Idempotent: a live session is returned as-is, a dead one (stopped or
    /// logged out) is replaced with a fresh driver. The session is created
    /// and inserted under the map lock, so concurrent calls for the same id
    /// can never race into two sockets.
    pub async fn connect(&self, connection_id: &str) -> SessionStatus {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(connection_id) {
            if existing.is_live().await {
                debug!(connection_id, "connect on an already-live session");
                return existing.status().await;
            }
        }

        info!(connection_id, "starting session");
        let session = Session::spawn(
            connection_id,
            self.connector.clone(),
            self.credentials.clone(),
            self.versions.clone(),
            self.policy,
        );
        sessions.insert(connection_id.to_string(), session.clone());
        drop(sessions);

        session.status().await
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(connection_id).cloned()
    }

    pub async fn status(&self, connection_id: &str) -> Option<SessionStatus> {
        match self.get(connection_id).await {
            Some(session) => Some(session.status().await),
            None => None,
        }
    }

    /// Stop the session and forget it. Credentials stay in the store, so a
    /// later connect resumes without re-pairing. Returns false when there
    /// was nothing to stop.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        let session = self.sessions.lock().await.remove(connection_id);
        match session {
            Some(session) => {
                session.stop().await;
                info!(connection_id, "session disconnected");
                true
            }
            None => false,
        }
    }

    /// Stop the session and delete its credentials. The next connect starts
    /// a fresh pairing.
    pub async fn destroy(&self, connection_id: &str) -> Result<(), ZapError> {
        if let Some(session) = self.sessions.lock().await.remove(connection_id) {
            session.stop().await;
        }
        self.credentials.delete(connection_id).await?;
        info!(connection_id, "session destroyed, credentials deleted");
        Ok(())
    }

    /// Snapshot of every known session.
    pub async fn list(&self) -> Vec<(String, SessionStatus)> {
        let sessions: Vec<(String, Arc<Session>)> = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();

        let mut out = Vec::with_capacity(sessions.len());
        for (id, session) in sessions {
            out.push((id, session.status().await));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Stop every session for process shutdown. Credentials remain, so all
    /// of them resume on the next boot.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, Arc<Session>)> =
            self.sessions.lock().await.drain().collect();
        for (id, session) in sessions {
            debug!(connection_id = %id, "stopping session for shutdown");
            session.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_for_status, MockConnector, MockPlan};
    use zapmux_core::traits::{CredentialStore, DisconnectReason, ProtocolEvent};
    use zapmux_core::types::{ConnectionStatus, Credentials};
    use zapmux_store::MemoryStore;

    fn registry_with(connector: Arc<MockConnector>, store: Arc<MemoryStore>) -> SessionRegistry {
        SessionRegistry::new(
            connector,
            store,
            Arc::new(VersionResolver::pinned((2, 3000, 1).into())),
            ReconnectPolicy::from_millis(40, 160),
        )
    }

    #[tokio::test]
    async fn concurrent_connects_open_exactly_one_socket() {
        let connector = Arc::new(MockConnector::default());
        let registry = Arc::new(registry_with(
            connector.clone(),
            Arc::new(MemoryStore::new()),
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.connect("conn-1").await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn connect_is_idempotent_for_a_live_session() {
        let connector = Arc::new(MockConnector::with_plans(vec![MockPlan {
            events: vec![ProtocolEvent::Connected {
                phone_number: None,
                credentials: None,
            }],
            ..MockPlan::default()
        }]));
        let registry = registry_with(connector.clone(), Arc::new(MemoryStore::new()));

        registry.connect("conn-1").await;
        let session = registry.get("conn-1").await.unwrap();
        wait_for_status(&session, ConnectionStatus::Connected).await;

        let status = registry.connect("conn-1").await;
        assert_eq!(status.status, ConnectionStatus::Connected);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn logged_out_session_is_replaced_on_reconnect() {
        let connector = Arc::new(MockConnector::with_plans(vec![
            MockPlan {
                events: vec![ProtocolEvent::Disconnected {
                    reason: DisconnectReason::LoggedOut,
                }],
                ..MockPlan::default()
            },
            MockPlan {
                events: vec![ProtocolEvent::PairingQr { code: "qr-new".into() }],
                ..MockPlan::default()
            },
        ]));
        let registry = registry_with(connector.clone(), Arc::new(MemoryStore::new()));

        registry.connect("conn-1").await;
        let first = registry.get("conn-1").await.unwrap();
        wait_for_status(&first, ConnectionStatus::Error).await;

        // The dead session gets swapped for a fresh pairing.
        registry.connect("conn-1").await;
        let second = registry.get("conn-1").await.unwrap();
        wait_for_status(&second, ConnectionStatus::WaitingQr).await;
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn disconnect_keeps_credentials_destroy_deletes_them() {
        let store = Arc::new(MemoryStore::new());
        store
            .save("conn-1", &Credentials::new(vec![5]))
            .await
            .unwrap();
        let connector = Arc::new(MockConnector::default());
        let registry = registry_with(connector, store.clone());

        registry.connect("conn-1").await;
        assert!(registry.disconnect("conn-1").await);
        assert!(store.load("conn-1").await.unwrap().is_some());
        assert!(registry.status("conn-1").await.is_none());

        registry.connect("conn-1").await;
        registry.destroy("conn-1").await.unwrap();
        assert!(store.load("conn-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_of_unknown_id_is_false() {
        let registry = registry_with(
            Arc::new(MockConnector::default()),
            Arc::new(MemoryStore::new()),
        );
        assert!(!registry.disconnect("ghost").await);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let connector = Arc::new(MockConnector::default());
        let registry = registry_with(connector, Arc::new(MemoryStore::new()));

        registry.connect("conn-1").await;
        registry.connect("conn-2").await;
        registry.shutdown().await;
        assert!(registry.list().await.is_empty());
    }
}
