//! Credential-blob backend for `whatsapp-rust`.
//!
//! The library expects a `Backend` (SignalStore + AppSyncStore +
//! ProtocolStore + DeviceStore) for its key material. Instead of giving each
//! connection its own database, everything lives in one in-memory state that
//! gets bincode-serialized into the connection's opaque credential record
//! after every mutation. Saves are whole-document and last-write-wins, which
//! matches the store contract, and a crash between saves costs at most the
//! latest rotation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};
use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::error::StoreError;
use wacore::store::traits::{
    AppStateSyncKey, AppSyncStore, DeviceListRecord, DeviceStore, LidPnMappingEntry, ProtocolStore,
    SignalStore,
};
use wacore::store::Device;
use zapmux_core::traits::CredentialStore;
use zapmux_core::types::Credentials;

type Result<T> = wacore::store::error::Result<T>;

fn ser_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Serialization(e.to_string())
}

#[derive(Default, Serialize, Deserialize)]
struct PreKeySlot {
    record: Vec<u8>,
    uploaded: bool,
}

#[derive(Default, Serialize, Deserialize)]
struct SyncKeySlot {
    key_data: Vec<u8>,
    timestamp: i64,
    fingerprint: Vec<u8>,
}

#[derive(Default, Serialize, Deserialize)]
struct LidSlot {
    phone_number: String,
    created_at: i64,
    updated_at: i64,
    learning_source: String,
}

/// Everything the library stores, in one serializable document.
#[derive(Default, Serialize, Deserialize)]
struct BlobState {
    /// bincode of the library's `Device` (its serde needs a binary format).
    device: Option<Vec<u8>>,
    identities: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, Vec<u8>>,
    prekeys: HashMap<u32, PreKeySlot>,
    signed_prekeys: HashMap<u32, Vec<u8>>,
    sender_keys: HashMap<String, Vec<u8>>,
    sync_keys: HashMap<Vec<u8>, SyncKeySlot>,
    /// collection name -> `HashState` as JSON.
    app_versions: HashMap<String, String>,
    /// collection name -> index MAC -> value MAC.
    mutation_macs: HashMap<String, HashMap<Vec<u8>, Vec<u8>>>,
    skdm_recipients: HashMap<String, Vec<String>>,
    lid_mappings: HashMap<String, LidSlot>,
    base_keys: HashMap<(String, String), Vec<u8>>,
    /// user -> `DeviceListRecord` as JSON.
    device_lists: HashMap<String, String>,
    forget_marks: HashMap<String, Vec<String>>,
}

pub(super) struct BlobBackend {
    connection_id: String,
    store: Arc<dyn CredentialStore>,
    state: Mutex<BlobState>,
    phone: std::sync::Mutex<Option<String>>,
}

impl BlobBackend {
    pub(super) fn new(
        connection_id: String,
        store: Arc<dyn CredentialStore>,
        initial: Option<Credentials>,
    ) -> Self {
        let state = match initial {
            Some(credentials) => match bincode::deserialize(credentials.as_bytes()) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        connection_id,
                        "stored credential blob unreadable, starting fresh pairing: {e}"
                    );
                    BlobState::default()
                }
            },
            None => BlobState::default(),
        };

        let phone = state
            .device
            .as_deref()
            .and_then(|bytes| bincode::deserialize::<Device>(bytes).ok())
            .and_then(|device| device.pn.as_ref().map(|jid| jid.user.clone()));

        Self {
            connection_id,
            store,
            state: Mutex::new(state),
            phone: std::sync::Mutex::new(phone),
        }
    }

    /// Phone number of the paired account, once the device record has one.
    pub(super) fn phone_number(&self) -> Option<String> {
        self.phone.lock().unwrap().clone()
    }

    /// Serialize the whole state and upsert it as the credential record.
    async fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.lock().await;
            bincode::serialize(&*state).map_err(ser_err)?
        };
        if let Err(e) = self
            .store
            .save(&self.connection_id, &Credentials::new(bytes))
            .await
        {
            error!(connection_id = %self.connection_id, "credential persist failed: {e}");
            return Err(ser_err(e));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalStore for BlobBackend {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.state
            .lock()
            .await
            .identities
            .insert(address.to_string(), key.to_vec());
        self.persist().await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.identities.get(address).cloned())
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.state.lock().await.identities.remove(address);
        self.persist().await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.sessions.get(address).cloned())
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.state
            .lock()
            .await
            .sessions
            .insert(address.to_string(), session.to_vec());
        self.persist().await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.state.lock().await.sessions.remove(address);
        self.persist().await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        self.state.lock().await.prekeys.insert(
            id,
            PreKeySlot {
                record: record.to_vec(),
                uploaded,
            },
        );
        self.persist().await
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .await
            .prekeys
            .get(&id)
            .map(|slot| slot.record.clone()))
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.state.lock().await.prekeys.remove(&id);
        self.persist().await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.state
            .lock()
            .await
            .signed_prekeys
            .insert(id, record.to_vec());
        self.persist().await
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.signed_prekeys.get(&id).cloned())
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        Ok(self
            .state
            .lock()
            .await
            .signed_prekeys
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.state.lock().await.signed_prekeys.remove(&id);
        self.persist().await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.state
            .lock()
            .await
            .sender_keys
            .insert(address.to_string(), record.to_vec());
        self.persist().await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.sender_keys.get(address).cloned())
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.state.lock().await.sender_keys.remove(address);
        self.persist().await
    }
}

#[async_trait]
impl AppSyncStore for BlobBackend {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        Ok(self
            .state
            .lock()
            .await
            .sync_keys
            .get(key_id)
            .map(|slot| AppStateSyncKey {
                key_data: slot.key_data.clone(),
                timestamp: slot.timestamp,
                fingerprint: slot.fingerprint.clone(),
            }))
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        self.state.lock().await.sync_keys.insert(
            key_id.to_vec(),
            SyncKeySlot {
                key_data: key.key_data,
                timestamp: key.timestamp,
                fingerprint: key.fingerprint,
            },
        );
        self.persist().await
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        match self.state.lock().await.app_versions.get(name) {
            Some(data) => serde_json::from_str(data).map_err(ser_err),
            None => Ok(HashState::default()),
        }
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        let data = serde_json::to_string(&state).map_err(ser_err)?;
        self.state
            .lock()
            .await
            .app_versions
            .insert(name.to_string(), data);
        self.persist().await
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        _version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let macs = state.mutation_macs.entry(name.to_string()).or_default();
            for mutation in mutations {
                macs.insert(mutation.index_mac.clone(), mutation.value_mac.clone());
            }
        }
        self.persist().await
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .await
            .mutation_macs
            .get(name)
            .and_then(|macs| macs.get(index_mac).cloned()))
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(macs) = state.mutation_macs.get_mut(name) {
                for mac in index_macs {
                    macs.remove(mac);
                }
            }
        }
        self.persist().await
    }
}

#[async_trait]
impl ProtocolStore for BlobBackend {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .skdm_recipients
            .get(group_jid)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let recipients = state.skdm_recipients.entry(group_jid.to_string()).or_default();
            for device in device_jids {
                if !recipients.contains(device) {
                    recipients.push(device.clone());
                }
            }
        }
        self.persist().await
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.state.lock().await.skdm_recipients.remove(group_jid);
        self.persist().await
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .lid_mappings
            .get(lid)
            .map(|slot| LidPnMappingEntry {
                lid: lid.to_string(),
                phone_number: slot.phone_number.clone(),
                created_at: slot.created_at,
                updated_at: slot.updated_at,
                learning_source: slot.learning_source.clone(),
            }))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .lid_mappings
            .iter()
            .find(|(_, slot)| slot.phone_number == phone)
            .map(|(lid, slot)| LidPnMappingEntry {
                lid: lid.clone(),
                phone_number: slot.phone_number.clone(),
                created_at: slot.created_at,
                updated_at: slot.updated_at,
                learning_source: slot.learning_source.clone(),
            }))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        self.state.lock().await.lid_mappings.insert(
            entry.lid.clone(),
            LidSlot {
                phone_number: entry.phone_number.clone(),
                created_at: entry.created_at,
                updated_at: entry.updated_at,
                learning_source: entry.learning_source.clone(),
            },
        );
        self.persist().await
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .lid_mappings
            .iter()
            .map(|(lid, slot)| LidPnMappingEntry {
                lid: lid.clone(),
                phone_number: slot.phone_number.clone(),
                created_at: slot.created_at,
                updated_at: slot.updated_at,
                learning_source: slot.learning_source.clone(),
            })
            .collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        self.state.lock().await.base_keys.insert(
            (address.to_string(), message_id.to_string()),
            base_key.to_vec(),
        );
        self.persist().await
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .base_keys
            .get(&(address.to_string(), message_id.to_string()))
            .map(|key| key == current_base_key)
            .unwrap_or(false))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .base_keys
            .remove(&(address.to_string(), message_id.to_string()));
        self.persist().await
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let data = serde_json::to_string(&record).map_err(ser_err)?;
        self.state
            .lock()
            .await
            .device_lists
            .insert(record.user.clone(), data);
        self.persist().await
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        match self.state.lock().await.device_lists.get(user) {
            Some(data) => Ok(Some(serde_json::from_str(data).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let marks = state.forget_marks.entry(group_jid.to_string()).or_default();
            if !marks.iter().any(|p| p == participant) {
                marks.push(participant.to_string());
            }
        }
        self.persist().await
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let marks = self
            .state
            .lock()
            .await
            .forget_marks
            .remove(group_jid)
            .unwrap_or_default();
        self.persist().await?;
        Ok(marks)
    }
}

#[async_trait]
impl DeviceStore for BlobBackend {
    async fn save(&self, device: &Device) -> Result<()> {
        // Device uses custom serde (key pairs, big arrays) that requires a
        // binary format; serde_json cannot handle it.
        let data = bincode::serialize(device).map_err(ser_err)?;
        if let Some(jid) = device.pn.as_ref() {
            *self.phone.lock().unwrap() = Some(jid.user.clone());
        }
        self.state.lock().await.device = Some(data);
        self.persist().await
    }

    async fn load(&self) -> Result<Option<Device>> {
        match self.state.lock().await.device.as_deref() {
            Some(data) => Ok(Some(bincode::deserialize(data).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().await.device.is_some())
    }

    async fn create(&self) -> Result<i32> {
        // The actual Device data arrives via save() during pairing.
        Ok(1)
    }
}
