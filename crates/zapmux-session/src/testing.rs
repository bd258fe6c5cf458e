//! Scripted protocol fakes shared by the session and registry tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use zapmux_core::traits::{
    ConnectRequest, ProtocolConnection, ProtocolEvent, ProtocolHandle,
};
use zapmux_core::types::{ConnectionStatus, GroupRecord};
use zapmux_core::ZapError;

/// One scripted socket lifetime.
pub(crate) struct MockPlan {
    /// Events delivered, in order, right after connect.
    pub events: Vec<ProtocolEvent>,
    /// Keep the event stream open after the scripted events. When false the
    /// stream ends, which the session reads as a silent network drop.
    pub hold_open: bool,
    /// Fail the connect call itself instead of opening a socket.
    pub fail_connect: bool,
    pub pairing_code: Option<String>,
    pub groups: Vec<GroupRecord>,
    pub fail_groups: bool,
    /// Never answer the group fetch (for timeout tests).
    pub hang_groups: bool,
}

impl Default for MockPlan {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            hold_open: true,
            fail_connect: false,
            pairing_code: None,
            groups: Vec::new(),
            fail_groups: false,
            hang_groups: false,
        }
    }
}

/// Connector that replays one [`MockPlan`] per connect call. When the plan
/// queue runs dry, further connects get an empty held-open socket.
#[derive(Default)]
pub(crate) struct MockConnector {
    plans: std::sync::Mutex<VecDeque<MockPlan>>,
    requests: std::sync::Mutex<Vec<ConnectRequest>>,
    connects: AtomicUsize,
    // Keeps held-open event streams alive.
    senders: std::sync::Mutex<Vec<mpsc::Sender<ProtocolEvent>>>,
}

impl MockConnector {
    pub fn with_plans(plans: Vec<MockPlan>) -> Self {
        Self {
            plans: std::sync::Mutex::new(plans.into()),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The n-th connect request, for asserting resume behavior.
    pub fn request(&self, index: usize) -> ConnectRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl zapmux_core::traits::ProtocolConnector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<ProtocolConnection, ZapError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        if plan.fail_connect {
            return Err(ZapError::Protocol("scripted connect failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(plan.events.len().max(1));
        for event in plan.events {
            tx.try_send(event).expect("mock event buffer too small");
        }
        if plan.hold_open {
            self.senders.lock().unwrap().push(tx);
        }

        Ok(ProtocolConnection {
            handle: Arc::new(MockHandle {
                pairing_code: plan.pairing_code,
                groups: plan.groups,
                fail_groups: plan.fail_groups,
                hang_groups: plan.hang_groups,
                closed: AtomicUsize::new(0),
            }),
            events: rx,
        })
    }
}

pub(crate) struct MockHandle {
    pairing_code: Option<String>,
    groups: Vec<GroupRecord>,
    fail_groups: bool,
    hang_groups: bool,
    closed: AtomicUsize,
}

#[async_trait]
impl ProtocolHandle for MockHandle {
    async fn request_pairing_code(&self, _phone_number: &str) -> Result<String, ZapError> {
        self.pairing_code
            .clone()
            .ok_or_else(|| ZapError::Protocol("pairing code unavailable".to_string()))
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupRecord>, ZapError> {
        if self.hang_groups {
            std::future::pending::<()>().await;
        }
        if self.fail_groups {
            return Err(ZapError::Protocol("scripted group fetch failure".to_string()));
        }
        Ok(self.groups.clone())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll a session until it reaches `status`, or panic after two seconds.
pub(crate) async fn wait_for_status(session: &crate::Session, status: ConnectionStatus) {
    for _ in 0..200 {
        if session.status().await.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session never reached {status}, currently {}",
        session.status().await.status
    );
}
