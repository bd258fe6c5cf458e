//! One session per tenant connection: a driver task that owns the protocol
//! socket, an explicit state machine, and the reconnect loop around it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use zapmux_core::traits::{
    ConnectRequest, CredentialStore, DisconnectReason, ProtocolConnector, ProtocolHandle,
};
use zapmux_core::types::{ConnectionStatus, QrPayload, SessionStatus};
use zapmux_core::ZapError;

use crate::backoff::ReconnectPolicy;
use crate::qr;
use crate::version::VersionResolver;

/// Where a session is in its lifecycle.
///
/// The pairing QR lives inside `WaitingQr`, so any transition out of that
/// state drops it. A stale QR can never be served.
#[derive(Debug, Clone)]
pub(crate) enum SessionState {
    /// Explicitly stopped. No socket, no reconnect pending.
    Idle,
    /// Opening a socket, or waiting out a backoff delay before the next try.
    Connecting,
    /// Fresh pairing in progress; the dashboard should show this QR.
    WaitingQr { qr: QrPayload },
    Connected,
    /// The driver gave up: the account logged this device out. Reads as the
    /// `error` status; a reconnect must start a fresh pairing.
    Terminal,
}

impl SessionState {
    fn status(&self) -> ConnectionStatus {
        match self {
            SessionState::Idle => ConnectionStatus::Disconnected,
            SessionState::Connecting => ConnectionStatus::Connecting,
            SessionState::WaitingQr { .. } => ConnectionStatus::WaitingQr,
            SessionState::Connected => ConnectionStatus::Connected,
            SessionState::Terminal => ConnectionStatus::Error,
        }
    }
}

/// What one socket's lifetime ended with.
enum SocketOutcome {
    Retryable(DisconnectReason),
    Terminal,
}

/// A single tenant connection and its driver task.
///
/// Created through [`crate::SessionRegistry`], which guarantees at most one
/// live session (and therefore at most one socket) per connection id. All
/// methods here are cheap reads or commands; the driver task does the work.
pub struct Session {
    connection_id: String,
    state: Mutex<SessionState>,
    /// Learned at pairing time, kept across reconnects.
    phone_number: Mutex<Option<String>>,
    handle: Mutex<Option<Arc<dyn ProtocolHandle>>>,
    /// Consecutive failed attempts since the last successful connect.
    attempts: AtomicU32,
    stop: watch::Sender<bool>,
    connector: Arc<dyn ProtocolConnector>,
    credentials: Arc<dyn CredentialStore>,
    versions: Arc<VersionResolver>,
    policy: ReconnectPolicy,
}

impl Session {
    /// Create the session and spawn its driver task.
    pub(crate) fn spawn(
        connection_id: &str,
        connector: Arc<dyn ProtocolConnector>,
        credentials: Arc<dyn CredentialStore>,
        versions: Arc<VersionResolver>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        let session = Arc::new(Self {
            connection_id: connection_id.to_string(),
            state: Mutex::new(SessionState::Connecting),
            phone_number: Mutex::new(None),
            handle: Mutex::new(None),
            attempts: AtomicU32::new(0),
            stop,
            connector,
            credentials,
            versions,
            policy,
        });
        tokio::spawn(session.clone().run());
        session
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Snapshot of the session for the control surface.
    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        SessionStatus {
            status: state.status(),
            phone_number: self.phone_number.lock().await.clone(),
            qr: match &*state {
                SessionState::WaitingQr { qr } => Some(qr.clone()),
                _ => None,
            },
        }
    }

    /// Whether the driver is still working this connection. A stopped or
    /// logged-out session is dead and gets replaced on the next connect.
    pub(crate) async fn is_live(&self) -> bool {
        if *self.stop.borrow() {
            return false;
        }
        !matches!(
            &*self.state.lock().await,
            SessionState::Idle | SessionState::Terminal
        )
    }

    /// Request a phone-number pairing code as an alternative to scanning
    /// the QR. Valid only while pairing has not completed.
    pub async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ZapError> {
        {
            let state = self.state.lock().await;
            match &*state {
                SessionState::Connecting | SessionState::WaitingQr { .. } => {}
                other => {
                    return Err(ZapError::InvalidState(format!(
                        "pairing code requires an unpaired session (status: {})",
                        other.status()
                    )))
                }
            }
        }
        let handle = self.handle.lock().await.clone().ok_or_else(|| {
            ZapError::InvalidState("socket still opening, retry shortly".to_string())
        })?;
        handle.request_pairing_code(phone_number).await
    }

    /// Fetch the live group list. Requires the connected state; a session
    /// that is pairing or reconnecting gets a clean rejection instead of a
    /// protocol error from a half-open socket.
    pub(crate) async fn fetch_groups(
        &self,
        timeout: Duration,
    ) -> Result<Vec<zapmux_core::types::GroupRecord>, ZapError> {
        {
            let state = self.state.lock().await;
            if !matches!(&*state, SessionState::Connected) {
                return Err(ZapError::NotConnected(self.connection_id.clone()));
            }
        }
        let handle = self
            .handle
            .lock()
            .await
            .clone()
            .ok_or_else(|| ZapError::NotConnected(self.connection_id.clone()))?;

        tokio::time::timeout(timeout, handle.fetch_groups())
            .await
            .map_err(|_| {
                ZapError::Timeout(format!(
                    "group fetch for '{}' exceeded {}s",
                    self.connection_id,
                    timeout.as_secs()
                ))
            })?
    }

    /// Stop the driver, close the socket, cancel any pending reconnect.
    /// Credentials stay in the store so the session can resume later.
    pub(crate) async fn stop(&self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.close().await;
        }
        *self.state.lock().await = SessionState::Idle;
        debug!(connection_id = %self.connection_id, "session stopped");
    }

    async fn set_state(&self, next: SessionState) {
        *self.state.lock().await = next;
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop.subscribe();

        loop {
            if *stop_rx.borrow() {
                break;
            }
            self.set_state(SessionState::Connecting).await;

            let outcome = tokio::select! {
                outcome = self.drive_socket() => outcome,
                _ = stop_rx.changed() => break,
            };

            // Whatever happened, the socket behind the handle is gone.
            if let Some(handle) = self.handle.lock().await.take() {
                handle.close().await;
            }

            match outcome {
                SocketOutcome::Terminal => {
                    warn!(
                        connection_id = %self.connection_id,
                        "logged out by the account, purging credentials"
                    );
                    if let Err(e) = self.credentials.delete(&self.connection_id).await {
                        error!(
                            connection_id = %self.connection_id,
                            "failed to purge credentials: {e}"
                        );
                    }
                    self.set_state(SessionState::Terminal).await;
                    debug!(connection_id = %self.connection_id, "session driver exited");
                    return;
                }
                SocketOutcome::Retryable(reason) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let delay = self.policy.delay(attempt);
                    info!(
                        connection_id = %self.connection_id,
                        %reason,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connection closed, reconnecting"
                    );
                    self.set_state(SessionState::Connecting).await;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop_rx.changed() => break,
                    }
                }
            }
        }

        // The driver writes the final state itself: a stop request may land
        // right as the loop top sets `Connecting`, and the exit must win.
        self.set_state(SessionState::Idle).await;
        debug!(connection_id = %self.connection_id, "session driver exited");
    }

    /// Open one socket and pump its events until it dies.
    async fn drive_socket(&self) -> SocketOutcome {
        let version = self.versions.resolve().await;

        let credentials = match self.credentials.load(&self.connection_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    "credential load failed, starting a fresh pairing: {e}"
                );
                None
            }
        };
        let resuming = credentials.is_some();

        let request = ConnectRequest {
            connection_id: self.connection_id.clone(),
            version,
            credentials,
        };

        let connection = match self.connector.connect(request).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(connection_id = %self.connection_id, "connect failed: {e}");
                return SocketOutcome::Retryable(DisconnectReason::ConnectionLost);
            }
        };
        debug!(
            connection_id = %self.connection_id,
            %version,
            resuming,
            "protocol socket opened"
        );

        let mut events = connection.events;
        *self.handle.lock().await = Some(connection.handle);

        use zapmux_core::traits::ProtocolEvent;
        while let Some(event) = events.recv().await {
            match event {
                ProtocolEvent::PairingQr { code } => {
                    let image = match qr::to_data_url(&code) {
                        Ok(image) => Some(image),
                        Err(e) => {
                            warn!(connection_id = %self.connection_id, "QR render failed: {e}");
                            None
                        }
                    };
                    self.set_state(SessionState::WaitingQr {
                        qr: QrPayload { code, image },
                    })
                    .await;
                    info!(connection_id = %self.connection_id, "pairing QR ready");
                }
                ProtocolEvent::Connected {
                    phone_number,
                    credentials,
                } => {
                    if let Some(credentials) = credentials {
                        if let Err(e) = self.credentials.save(&self.connection_id, &credentials).await
                        {
                            error!(
                                connection_id = %self.connection_id,
                                "failed to persist credentials: {e}"
                            );
                        }
                    }
                    if phone_number.is_some() {
                        *self.phone_number.lock().await = phone_number.clone();
                    }
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(SessionState::Connected).await;
                    info!(
                        connection_id = %self.connection_id,
                        phone_number = phone_number.as_deref().unwrap_or("unknown"),
                        "connected"
                    );
                }
                ProtocolEvent::CredentialsRotated { credentials } => {
                    // Rotation failures must not kill the session; the old
                    // blob usually still resumes.
                    if let Err(e) = self.credentials.save(&self.connection_id, &credentials).await {
                        error!(
                            connection_id = %self.connection_id,
                            "failed to persist rotated credentials: {e}"
                        );
                    }
                }
                ProtocolEvent::Disconnected { reason } => {
                    return if reason.should_reconnect() {
                        SocketOutcome::Retryable(reason)
                    } else {
                        SocketOutcome::Terminal
                    };
                }
            }
        }

        // Event stream ended without a disconnect reason. Treat it like a
        // network drop.
        SocketOutcome::Retryable(DisconnectReason::ConnectionLost)
    }
}
