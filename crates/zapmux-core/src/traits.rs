use crate::error::ZapError;
use crate::types::{Credentials, GroupRecord, ProtocolVersion};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Credential persistence seam: one opaque record per connection id.
///
/// Implementations must make `save` atomic per key (single-document upsert):
/// rapid key-rotation events may save concurrently for the same id, and the
/// last write must win without ever exposing a torn record. Backed by a
/// shared database in production and a map in tests.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` means no prior session: the caller starts a fresh pairing.
    async fn load(&self, connection_id: &str) -> Result<Option<Credentials>, ZapError>;

    async fn save(&self, connection_id: &str, credentials: &Credentials) -> Result<(), ZapError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, connection_id: &str) -> Result<(), ZapError>;
}

/// Group snapshot persistence: full replace per sync, last write wins.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Replace the whole snapshot for `connection_id` with `groups`.
    /// Entries absent from `groups` are dropped.
    async fn replace(&self, connection_id: &str, groups: &[GroupRecord]) -> Result<(), ZapError>;

    async fn list(&self, connection_id: &str) -> Result<Vec<GroupRecord>, ZapError>;

    async fn delete(&self, connection_id: &str) -> Result<(), ZapError>;
}

/// Why the protocol socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Generic network drop.
    ConnectionLost,
    /// The remote end stopped answering.
    TimedOut,
    /// Another socket took over these credentials.
    ConnectionReplaced,
    /// Server asked for a stream restart (normal after pairing).
    RestartRequired,
    /// Server-side 503.
    ServiceUnavailable,
    /// The account logged this device out. Credentials are dead.
    LoggedOut,
}

impl DisconnectReason {
    /// Everything short of an explicit logout is worth retrying.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, DisconnectReason::LoggedOut)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::TimedOut => "timed out",
            DisconnectReason::ConnectionReplaced => "connection replaced",
            DisconnectReason::RestartRequired => "restart required",
            DisconnectReason::ServiceUnavailable => "service unavailable",
            DisconnectReason::LoggedOut => "logged out",
        };
        f.write_str(s)
    }
}

/// Event emitted by a live protocol connection, in socket order.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A fresh pairing payload. Supersedes any previous one.
    PairingQr { code: String },
    /// Pairing or resume succeeded. `credentials` carries the auth blob to
    /// persist when the connector does not persist it itself.
    Connected {
        phone_number: Option<String>,
        credentials: Option<Credentials>,
    },
    /// The library rotated keys mid-session; persist the new blob.
    CredentialsRotated { credentials: Credentials },
    /// The socket closed. The session classifies `reason` and either
    /// schedules a reconnect or tears down for good.
    Disconnected { reason: DisconnectReason },
}

/// Everything a connector needs to open one protocol socket.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub connection_id: String,
    pub version: ProtocolVersion,
    /// Prior auth material, if any. `None` forces a fresh pairing.
    pub credentials: Option<Credentials>,
}

/// A live socket: a command handle plus the ordered event stream.
pub struct ProtocolConnection {
    pub handle: std::sync::Arc<dyn ProtocolHandle>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Factory seam over the external WhatsApp client library.
///
/// The session layer never touches the wire; it opens connections here and
/// reacts to [`ProtocolEvent`]s. Tests substitute scripted fakes.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<ProtocolConnection, ZapError>;
}

/// Commands against an open protocol socket.
#[async_trait]
pub trait ProtocolHandle: Send + Sync {
    /// Ask the server for a short alphanumeric pairing code bound to
    /// `phone_number`. Only meaningful before pairing completes.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ZapError>;

    /// Enumerate all groups the account participates in.
    async fn fetch_groups(&self) -> Result<Vec<GroupRecord>, ZapError>;

    /// Close the socket. Idempotent; discards any in-flight requests.
    async fn close(&self);
}
