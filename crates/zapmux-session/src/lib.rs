//! # zapmux-session
//!
//! The session core of zapmux: one driver task per tenant connection owning
//! its pairing flow, connection state machine, and reconnect policy; a
//! registry enforcing at-most-one live session per connection id; version
//! resolution with a bounded-time fallback; and on-demand group sync.
//!
//! The wire protocol itself lives behind the `ProtocolConnector` seam from
//! `zapmux-core`. The `whatsapp-live` feature provides the production
//! connector over the `whatsapp-rust` client library.

pub mod backoff;
pub mod qr;
pub mod registry;
pub mod session;
pub mod sync;
pub mod version;

#[cfg(feature = "whatsapp-live")]
pub mod live;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::ReconnectPolicy;
pub use registry::SessionRegistry;
pub use session::Session;
pub use sync::GroupSync;
pub use version::VersionResolver;
