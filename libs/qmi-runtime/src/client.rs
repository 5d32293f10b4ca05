//! Client Registry: one Client per Service on a Device (§4.7)
//!
//! The CTL service (id `0x00`) is seeded at client-id `0` when the
//! Transport opens. Any other service's first `get_service` call issues
//! `CTL.AllocateCID` and caches the result; concurrent callers for the same
//! service serialize on a per-service allocation lock so only one
//! allocation request is ever in flight.
//!
//! `CTL.AllocateCID` itself is hand-coded here rather than generated: every
//! Transport needs it regardless of which schema documents are loaded, so
//! it is protocol-mandatory infrastructure, not schema content.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::QmiError;
use crate::framer::{find_tag, CTL_SERVICE_ID};
use crate::message::Message;
use crate::registry::Registry;
use crate::transport::Transport;

const ALLOCATE_CID_MESSAGE_ID: u16 = 0x0022;
const ALLOCATE_CID_REQUEST_TAG: u8 = 0x01;
const ALLOCATE_CID_RESPONSE_TAG: u8 = 0x01;
const OPERATION_RESULT_TAG: u8 = 0x02;

/// One client-id handle for a single service on a Device.
#[derive(Debug)]
pub struct Client {
    pub service_id: u8,
    pub client_id: u8,
    next_transaction_id: Mutex<u16>,
}

impl Client {
    pub fn new(service_id: u8, client_id: u8) -> Arc<Self> {
        Arc::new(Self {
            service_id,
            client_id,
            next_transaction_id: Mutex::new(0),
        })
    }

    /// client-lock: held only for the increment (§5).
    ///
    /// CTL's transaction id is 1 wire byte wide (§4.5); a CTL client must
    /// wrap at 8 bits or a counter value above 255 gets truncated on the
    /// wire, echoed back truncated, and reconstructed by the framer into a
    /// value that no longer matches the correlation id the caller is
    /// waiting on. Every other service's 2-byte transaction header wraps
    /// at 16 bits, the `u16`'s own range.
    pub(crate) async fn next_txid(&self) -> u16 {
        let mut guard = self.next_transaction_id.lock().await;
        *guard = if self.service_id == CTL_SERVICE_ID {
            guard.wrapping_add(1) & 0x00FF
        } else {
            guard.wrapping_add(1)
        };
        *guard
    }
}

/// Registry of allocated Clients, plus the per-service locks that serialize
/// concurrent allocation attempts. Lives inside [`Transport`].
pub(crate) struct ClientRegistry {
    clients: Mutex<HashMap<u8, Arc<Client>>>,
    allocation_locks: Mutex<HashMap<u8, Arc<Mutex<()>>>>,
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        let mut clients = HashMap::new();
        clients.insert(CTL_SERVICE_ID, Client::new(CTL_SERVICE_ID, 0));
        Self {
            clients: Mutex::new(clients),
            allocation_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn allocation_lock(&self, service_id: u8) -> Arc<Mutex<()>> {
        let mut locks = self.allocation_locks.lock().await;
        locks
            .entry(service_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Transport {
    /// Get (allocating if necessary) the Client for `service_id`.
    pub async fn get_service(&self, service_id: u8) -> Result<Arc<Client>, QmiError> {
        if let Some(client) = self.clients.clients.lock().await.get(&service_id).cloned() {
            return Ok(client);
        }

        let lock = self.clients.allocation_lock(service_id).await;
        let _guard = lock.lock().await;

        // Re-check: another caller may have finished allocating while we waited.
        if let Some(client) = self.clients.clients.lock().await.get(&service_id).cloned() {
            return Ok(client);
        }

        let ctl = self
            .clients
            .clients
            .lock()
            .await
            .get(&CTL_SERVICE_ID)
            .cloned()
            .expect("CTL client is seeded at Transport::open");

        let client_id = allocate_cid(self, &ctl, service_id).await?;
        let client = Client::new(service_id, client_id);
        self.clients
            .clients
            .lock()
            .await
            .insert(service_id, client.clone());
        Ok(client)
    }
}

#[derive(Debug, Default)]
struct AllocateCidResponse {
    status: u16,
    error: u16,
    allocated_service_id: u8,
    allocated_client_id: u8,
}

impl Message for AllocateCidResponse {
    fn service_id(&self) -> u8 {
        CTL_SERVICE_ID
    }

    fn message_id(&self) -> u16 {
        ALLOCATE_CID_MESSAGE_ID
    }

    fn read_tlvs(&mut self, buf: &[u8]) -> Result<(), QmiError> {
        match find_tag(buf, OPERATION_RESULT_TAG) {
            Some(payload) if payload.len() >= 4 => {
                self.status = u16::from_le_bytes([payload[0], payload[1]]);
                self.error = u16::from_le_bytes([payload[2], payload[3]]);
            }
            _ => {
                return Err(QmiError::missing_operation_result(
                    CTL_SERVICE_ID,
                    ALLOCATE_CID_MESSAGE_ID,
                ))
            }
        }
        if let Some(payload) = find_tag(buf, ALLOCATE_CID_RESPONSE_TAG) {
            if payload.len() >= 2 {
                self.allocated_service_id = payload[0];
                self.allocated_client_id = payload[1];
            }
        }
        Ok(())
    }

    fn operation_result(&self) -> Option<(u16, u16)> {
        Some((self.status, self.error))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Registers the CTL.AllocateCID response factory so the reader loop can
/// decode it through the same dispatch path as any generated message.
pub(crate) fn register_builtin(registry: &mut Registry) {
    registry.register(CTL_SERVICE_ID, ALLOCATE_CID_MESSAGE_ID, || {
        Box::new(AllocateCidResponse::default())
    });
}

async fn allocate_cid(transport: &Transport, ctl: &Client, requested_service: u8) -> Result<u8, QmiError> {
    let mut tlvs = Vec::with_capacity(4);
    tlvs.push(ALLOCATE_CID_REQUEST_TAG);
    tlvs.extend_from_slice(&1u16.to_le_bytes());
    tlvs.push(requested_service);

    let response: AllocateCidResponse = transport
        .send_raw(ctl, ALLOCATE_CID_MESSAGE_ID, tlvs)
        .await
        .map_err(|e| QmiError::allocate_cid_failed(requested_service, e.to_string()))?;

    if response.allocated_service_id != requested_service {
        return Err(QmiError::allocate_cid_failed(
            requested_service,
            "CTL's allocation TLV named a different service than requested",
        ));
    }
    Ok(response.allocated_client_id)
}
