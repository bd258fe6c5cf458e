use serde::{Deserialize, Serialize};

/// Lifecycle status of a tenant connection, as surfaced to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    WaitingQr,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::WaitingQr => "waiting_qr",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// WhatsApp Web client version triple sent during the protocol handshake.
///
/// The servers reject handshakes carrying a stale triple, so the resolver
/// refreshes it periodically and falls back to a configured known-good value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub primary: u32,
    pub secondary: u32,
    pub tertiary: u32,
}

impl ProtocolVersion {
    pub fn new(primary: u32, secondary: u32, tertiary: u32) -> Self {
        Self {
            primary,
            secondary,
            tertiary,
        }
    }
}

impl From<(u32, u32, u32)> for ProtocolVersion {
    fn from((primary, secondary, tertiary): (u32, u32, u32)) -> Self {
        Self::new(primary, secondary, tertiary)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.primary, self.secondary, self.tertiary)
    }
}

/// Opaque serialized auth material for one connection.
///
/// The blob is whatever the protocol connector needs to resume a session
/// without re-pairing (identity keys, registration state). It round-trips
/// through the store byte-for-byte; nothing outside the connector ever
/// inspects it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials({} bytes)", self.0.len())
    }
}

/// One WhatsApp group as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group JID (e.g. "1203630xxxx@g.us").
    pub id: String,
    /// Group subject.
    pub name: String,
    pub participant_count: i64,
}

/// The latest pairing payload, kept only while the session waits for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    /// Raw pairing string emitted by the protocol library.
    pub code: String,
    /// `data:image/png;base64,...` rendering of the code, if it rendered.
    pub image: Option<String>,
}

/// Point-in-time view of a session, cheap to produce from in-memory state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub status: ConnectionStatus,
    pub phone_number: Option<String>,
    pub qr: Option<QrPayload>,
}

impl SessionStatus {
    pub fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            phone_number: None,
            qr: None,
        }
    }
}

/// Outcome of a group sync: `count == 0` is a valid, successful result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSyncResult {
    pub count: usize,
    pub groups: Vec<GroupRecord>,
}
