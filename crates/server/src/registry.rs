use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use rand::{RngCore, rngs::OsRng};
use tracing::info;

use crate::error::ServerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn random() -> Self {
        let mut rng = OsRng;
        Self(rng.next_u64())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ClientSummary {
    pub client_id: ClientId,
    pub address: SocketAddr,
    pub connected_at: SystemTime,
}

/// Connected routers, shared between the listener and reporting code.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    clients: RwLock<HashMap<ClientId, ClientSummary>>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: RwLock::new(HashMap::new()),
                max_clients,
            }),
        }
    }

    pub fn register(&self, address: SocketAddr) -> Result<ClientId, ServerError> {
        let mut clients = self.inner.clients.write();
        if clients.len() >= self.inner.max_clients {
            return Err(ServerError::Capacity);
        }
        let client_id = ClientId::random();
        clients.insert(
            client_id,
            ClientSummary {
                client_id,
                address,
                connected_at: SystemTime::now(),
            },
        );
        info!(client = %client_id, %address, "router connected");
        Ok(client_id)
    }

    pub fn disconnect(&self, client_id: ClientId) {
        if let Some(summary) = self.inner.clients.write().remove(&client_id) {
            info!(client = %client_id, address = %summary.address, "router disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.clients.read().is_empty()
    }

    pub fn client_summaries(&self) -> Vec<ClientSummary> {
        self.inner.clients.read().values().cloned().collect()
    }
}
