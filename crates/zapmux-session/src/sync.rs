//! On-demand group sync.
//!
//! Campaign targeting works off the persisted snapshot, never the live
//! socket, so a sync replaces the whole snapshot in one shot and everything
//! downstream reads the database.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zapmux_core::traits::GroupStore;
use zapmux_core::types::{GroupRecord, GroupSyncResult};
use zapmux_core::ZapError;

use crate::session::Session;

pub struct GroupSync {
    store: Arc<dyn GroupStore>,
    timeout: Duration,
}

impl GroupSync {
    pub fn new(store: Arc<dyn GroupStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch the live group list and replace the stored snapshot.
    ///
    /// Requires a connected session; on any failure the previous snapshot is
    /// left untouched. Zero groups is a success and clears the snapshot, an
    /// account with no groups is a real state.
    pub async fn sync(&self, session: &Session) -> Result<GroupSyncResult, ZapError> {
        let connection_id = session.connection_id();
        let groups = session.fetch_groups(self.timeout).await?;
        self.store.replace(connection_id, &groups).await?;

        if groups.is_empty() {
            warn!(connection_id, "group sync returned zero groups");
        } else {
            info!(connection_id, count = groups.len(), "group snapshot replaced");
        }

        Ok(GroupSyncResult {
            count: groups.len(),
            groups,
        })
    }

    /// The stored snapshot, possibly stale, possibly empty.
    pub async fn snapshot(&self, connection_id: &str) -> Result<Vec<GroupRecord>, ZapError> {
        self.store.list(connection_id).await
    }

    /// Drop the snapshot entirely (connection deletion).
    pub async fn purge(&self, connection_id: &str) -> Result<(), ZapError> {
        self.store.delete(connection_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ReconnectPolicy;
    use crate::session::Session;
    use crate::testing::{wait_for_status, MockConnector, MockPlan};
    use crate::version::VersionResolver;
    use zapmux_core::traits::ProtocolEvent;
    use zapmux_core::types::ConnectionStatus;
    use zapmux_store::MemoryStore;

    fn connected_plan() -> Vec<ProtocolEvent> {
        vec![ProtocolEvent::Connected {
            phone_number: None,
            credentials: None,
        }]
    }

    fn group(id: &str, name: &str, participants: i64) -> GroupRecord {
        GroupRecord {
            id: id.into(),
            name: name.into(),
            participant_count: participants,
        }
    }

    async fn connected_session(plan: MockPlan) -> Arc<Session> {
        let connector = Arc::new(MockConnector::with_plans(vec![plan]));
        let session = Session::spawn(
            "conn-1",
            connector,
            Arc::new(MemoryStore::new()),
            Arc::new(VersionResolver::pinned((2, 3000, 1).into())),
            ReconnectPolicy::from_millis(40, 160),
        );
        wait_for_status(&session, ConnectionStatus::Connected).await;
        session
    }

    #[tokio::test]
    async fn sync_replaces_the_snapshot_and_reports_the_count() {
        let store = Arc::new(MemoryStore::new());
        let session = connected_session(MockPlan {
            events: connected_plan(),
            groups: vec![group("1@g.us", "Launch", 120), group("2@g.us", "Support", 8)],
            ..MockPlan::default()
        })
        .await;

        let sync = GroupSync::new(store.clone(), Duration::from_secs(5));
        let result = sync.sync(&session).await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(sync.snapshot("conn-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn zero_groups_is_success_and_clears_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .replace("conn-1", &[group("old@g.us", "Old", 3)])
            .await
            .unwrap();
        let session = connected_session(MockPlan {
            events: connected_plan(),
            ..MockPlan::default()
        })
        .await;

        let sync = GroupSync::new(store.clone(), Duration::from_secs(5));
        let result = sync.sync(&session).await.unwrap();
        assert_eq!(result.count, 0);
        assert!(sync.snapshot("conn-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_previous_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .replace("conn-1", &[group("old@g.us", "Old", 3)])
            .await
            .unwrap();
        let session = connected_session(MockPlan {
            events: connected_plan(),
            fail_groups: true,
            ..MockPlan::default()
        })
        .await;

        let sync = GroupSync::new(store.clone(), Duration::from_secs(5));
        assert!(sync.sync(&session).await.is_err());
        assert_eq!(sync.snapshot("conn-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_fetch_times_out_without_touching_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let session = connected_session(MockPlan {
            events: connected_plan(),
            hang_groups: true,
            ..MockPlan::default()
        })
        .await;

        let sync = GroupSync::new(store.clone(), Duration::from_millis(100));
        let err = sync.sync(&session).await;
        assert!(matches!(err, Err(ZapError::Timeout(_))));
    }

    #[tokio::test]
    async fn sync_on_an_unconnected_session_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store
            .replace("conn-1", &[group("old@g.us", "Old", 3)])
            .await
            .unwrap();

        let connector = Arc::new(MockConnector::with_plans(vec![MockPlan {
            events: vec![ProtocolEvent::PairingQr { code: "qr".into() }],
            groups: vec![group("new@g.us", "New", 1)],
            ..MockPlan::default()
        }]));
        let session = Session::spawn(
            "conn-1",
            connector,
            Arc::new(MemoryStore::new()),
            Arc::new(VersionResolver::pinned((2, 3000, 1).into())),
            ReconnectPolicy::from_millis(40, 160),
        );
        wait_for_status(&session, ConnectionStatus::WaitingQr).await;

        let sync = GroupSync::new(store.clone(), Duration::from_secs(5));
        let err = sync.sync(&session).await;
        assert!(matches!(err, Err(ZapError::NotConnected(_))));
        assert_eq!(sync.snapshot("conn-1").await.unwrap().len(), 1);
    }
}
