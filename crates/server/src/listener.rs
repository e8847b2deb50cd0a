use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cache::{SerialStore, ValidatedCache};
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cfg::ServerConfig;
use crate::connection::{ConnectionConfig, serve_connection};
use crate::error::ServerError;
use crate::registry::{ClientRegistry, ClientSummary};

#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: ClientRegistry,
    cache: Arc<ValidatedCache>,
    accept_task: AbortHandle,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clients(&self) -> Vec<ClientSummary> {
        self.registry.client_summaries()
    }

    pub fn cache(&self) -> &Arc<ValidatedCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<SerialStore> {
        self.cache.store()
    }

    /// Stop accepting routers. Established sessions run until they close.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

/// Bind the listen address and accept routers in the background.
pub async fn start_server(
    config: &ServerConfig,
    cache: Arc<ValidatedCache>,
) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind(config.listen).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "rtr listening");

    let registry = ClientRegistry::new(config.max_clients);
    let connection_config = ConnectionConfig {
        timing: config.timing,
        max_pdu_size: config.max_pdu_size,
    };

    let listener_registry = registry.clone();
    let listener_store = cache.store().clone();
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let client_id = match listener_registry.register(addr) {
                        Ok(client_id) => client_id,
                        Err(err) => {
                            warn!(remote = %addr, error = %err, "refusing router");
                            continue;
                        }
                    };
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(remote = %addr, error = ?err, "failed to set nodelay");
                    }
                    let registry = listener_registry.clone();
                    let store = listener_store.clone();
                    let span = info_span!("router", client = %client_id, remote = %addr);
                    tokio::spawn(
                        async move {
                            if let Err(err) =
                                serve_connection(stream, store, connection_config).await
                            {
                                debug!(error = %err, "releasing slot of failed session");
                            }
                            registry.disconnect(client_id);
                        }
                        .instrument(span),
                    );
                }
                Err(err) => {
                    warn!(error = ?err, "listener accept failed");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        registry,
        cache,
        accept_task: accept_task.abort_handle(),
    })
}
