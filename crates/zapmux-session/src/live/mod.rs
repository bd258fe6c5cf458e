//! Production connector over the `whatsapp-rust` client library.
//!
//! The library drives the Noise handshake, Signal encryption, and pairing;
//! this module adapts its bot/event surface to the `ProtocolConnector` seam
//! and snapshots its entire key store into the per-connection credential
//! blob (see [`store`]).

mod store;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::pair_code::PairCodeOptions;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;
use zapmux_core::traits::{
    ConnectRequest, CredentialStore, DisconnectReason, ProtocolConnection, ProtocolConnector,
    ProtocolEvent, ProtocolHandle,
};
use zapmux_core::types::GroupRecord;
use zapmux_core::ZapError;

use store::BlobBackend;

/// Opens real WhatsApp Web sockets, one per connect call.
pub struct WhatsAppConnector {
    credentials: Arc<dyn CredentialStore>,
}

impl WhatsAppConnector {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ProtocolConnector for WhatsAppConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<ProtocolConnection, ZapError> {
        debug!(
            connection_id = %request.connection_id,
            version = %request.version,
            "opening live WhatsApp socket"
        );

        let backend = Arc::new(BlobBackend::new(
            request.connection_id.clone(),
            self.credentials.clone(),
            request.credentials,
        ));

        let (tx, rx) = mpsc::channel(64);
        let backend_for_events = backend.clone();

        let mut bot = Bot::builder()
            .with_backend(backend.clone())
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some("zapmux".to_string()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, _client| {
                let tx = tx.clone();
                let backend = backend_for_events.clone();
                async move {
                    match event {
                        Event::PairingQrCode { code, .. } => {
                            let _ = tx.send(ProtocolEvent::PairingQr { code }).await;
                        }
                        Event::PairSuccess(_) => {
                            info!("WhatsApp pairing successful");
                        }
                        Event::Connected(_) => {
                            // The backend persists key material itself, so the
                            // event carries no credential payload.
                            let _ = tx
                                .send(ProtocolEvent::Connected {
                                    phone_number: backend.phone_number(),
                                    credentials: None,
                                })
                                .await;
                        }
                        Event::Disconnected(_) => {
                            let _ = tx
                                .send(ProtocolEvent::Disconnected {
                                    reason: DisconnectReason::ConnectionLost,
                                })
                                .await;
                        }
                        Event::LoggedOut(_) => {
                            warn!("WhatsApp logged out, session invalidated");
                            let _ = tx
                                .send(ProtocolEvent::Disconnected {
                                    reason: DisconnectReason::LoggedOut,
                                })
                                .await;
                        }
                        _ => {}
                    }
                }
            })
            .build()
            .await
            .map_err(|e| ZapError::Protocol(format!("bot build failed: {e}")))?;

        let client = bot.client();

        bot.run()
            .await
            .map_err(|e| ZapError::Protocol(format!("bot run failed: {e}")))?;

        Ok(ProtocolConnection {
            handle: Arc::new(LiveHandle { client }),
            events: rx,
        })
    }
}

struct LiveHandle {
    client: Arc<Client>,
}

#[async_trait]
impl ProtocolHandle for LiveHandle {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ZapError> {
        let options = PairCodeOptions {
            phone_number: phone_number.to_string(),
            ..Default::default()
        };
        self.client
            .pair_with_code(options)
            .await
            .map_err(|e| ZapError::Protocol(format!("pairing code request failed: {e}")))
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupRecord>, ZapError> {
        let groups = self
            .client
            .groups()
            .get_participating()
            .await
            .map_err(|e| ZapError::Protocol(format!("group query failed: {e}")))?;

        Ok(groups
            .into_values()
            .map(|meta| GroupRecord {
                id: meta.id.to_string(),
                name: meta.subject,
                participant_count: meta.participants.len() as i64,
            })
            .collect())
    }

    async fn close(&self) {
        // Stops the library's internal run loop too, so only the session
        // driver ever schedules reconnects.
        self.client.disconnect().await;
    }
}
