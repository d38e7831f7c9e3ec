//! Connection registry. Tracks live sockets and fans messages out to them.
//!
//! Two kinds of lock are involved:
//! - one short-held membership lock over the entry list (push / retain / clone);
//! - one send lock per connection, held across a single transport write.
//!
//! The membership lock is never held while waiting on a send lock, so the
//! failure paths of `send` and `broadcast` can call `disconnect` freely.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::Transport;
use crate::error::TransportError;
use crate::messages::{Payload, broadcast_envelope};

/// Shared handle to a registered connection. Identity is by pointer.
pub type ConnectionHandle = Arc<Connection>;

struct Link {
    transport: Box<dyn Transport>,
    detached: bool,
}

/// A transport plus the client id it was registered under.
pub struct Connection {
    id: Uuid,
    client_id: String,
    link: Mutex<Link>,
}

impl Connection {
    fn new(client_id: String, transport: Box<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            link: Mutex::new(Link {
                transport,
                detached: false,
            }),
        }
    }

    /// Unique id for this registration (logging only).
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether this connection has been deregistered.
    pub async fn is_detached(&self) -> bool {
        self.link.lock().await.detached
    }

    /// Mark detached and close the transport. Waits for any in-flight write.
    async fn detach(&self) {
        let mut link = self.link.lock().await;
        if link.detached {
            return;
        }
        link.detached = true;
        if let Err(e) = link.transport.close().await {
            debug!(client_id = %self.client_id, error = %e, "Transport close failed");
        }
    }
}

/// Result of delivering one message to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the transport.
    Sent,
    /// The transport failed or was already closed; the connection has been removed.
    Dropped,
    /// The connection was removed before the write; nothing was written.
    Detached,
    /// Cancelled before the write completed. The connection stays registered.
    Cancelled,
}

/// Per-connection outcome counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// The authoritative set of live connections.
pub struct ConnectionRegistry {
    connections: Mutex<Vec<ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Run the transport handshake, then register the connection.
    pub async fn connect(
        &self,
        mut transport: Box<dyn Transport>,
        client_id: impl Into<String>,
    ) -> Result<ConnectionHandle, TransportError> {
        let client_id = client_id.into();
        transport.accept().await?;

        let handle = Arc::new(Connection::new(client_id, transport));
        let total = {
            let mut connections = self.connections.lock().await;
            connections.push(Arc::clone(&handle));
            connections.len()
        };

        info!(client_id = %handle.client_id, total, "New connection");
        Ok(handle)
    }

    /// Remove every entry for `handle` and close its transport.
    ///
    /// Idempotent. Returns whether an entry was removed. Once this returns,
    /// no further write reaches the connection's transport.
    pub async fn disconnect(&self, handle: &ConnectionHandle) -> bool {
        let (removed, total) = {
            let mut connections = self.connections.lock().await;
            let before = connections.len();
            connections.retain(|c| !Arc::ptr_eq(c, handle));
            (connections.len() != before, connections.len())
        };

        handle.detach().await;

        if removed {
            info!(client_id = %handle.client_id, total, "Connection closed");
        }
        removed
    }

    /// Disconnect every connection registered at the time of the call.
    pub async fn disconnect_all(&self) {
        let snapshot = self.snapshot().await;
        info!(count = snapshot.len(), "Disconnecting all connections");
        for handle in &snapshot {
            self.disconnect(handle).await;
        }
    }

    /// Send a message to exactly one connection.
    ///
    /// A transport failure disconnects the connection before returning.
    pub async fn send(&self, message: &Payload, handle: &ConnectionHandle) -> Delivery {
        self.deliver(message, handle, None).await
    }

    /// Like [`send`](Self::send), abandoning the write if `cancel` fires.
    pub async fn send_until(
        &self,
        message: &Payload,
        handle: &ConnectionHandle,
        cancel: &CancellationToken,
    ) -> Delivery {
        self.deliver(message, handle, Some(cancel)).await
    }

    /// Wrap `message` in the broadcast envelope and send it to every connection.
    ///
    /// Sends run concurrently over a point-in-time snapshot; a failed peer is
    /// removed without affecting delivery to the others.
    pub async fn broadcast(&self, message: &Payload) -> BroadcastReport {
        self.fan_out(message, None).await
    }

    /// Like [`broadcast`](Self::broadcast), abandoning pending writes if `cancel` fires.
    pub async fn broadcast_until(
        &self,
        message: &Payload,
        cancel: &CancellationToken,
    ) -> BroadcastReport {
        self.fan_out(message, Some(cancel)).await
    }

    /// Connections registered under `client_id`, in insertion order.
    pub async fn connections_for(&self, client_id: &str) -> Vec<ConnectionHandle> {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|c| c.client_id == client_id)
            .cloned()
            .collect()
    }

    /// Client ids of all live connections, in insertion order.
    pub async fn client_ids(&self) -> Vec<String> {
        self.connections
            .lock()
            .await
            .iter()
            .map(|c| c.client_id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().await.clone()
    }

    async fn fan_out(&self, message: &Payload, cancel: Option<&CancellationToken>) -> BroadcastReport {
        let envelope = broadcast_envelope(message);
        let snapshot = self.snapshot().await;

        let outcomes = join_all(
            snapshot
                .iter()
                .map(|handle| self.deliver(&envelope, handle, cancel)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Sent => report.delivered += 1,
                Delivery::Dropped => report.removed += 1,
                Delivery::Detached | Delivery::Cancelled => report.skipped += 1,
            }
        }

        debug!(
            delivered = report.delivered,
            removed = report.removed,
            skipped = report.skipped,
            "Broadcast complete"
        );
        report
    }

    async fn deliver(
        &self,
        message: &Payload,
        handle: &ConnectionHandle,
        cancel: Option<&CancellationToken>,
    ) -> Delivery {
        let result = {
            let mut link = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Delivery::Cancelled,
                    guard = handle.link.lock() => guard,
                },
                None => handle.link.lock().await,
            };

            if link.detached {
                return Delivery::Detached;
            }

            if !link.transport.is_open() {
                Err(TransportError::Closed)
            } else {
                match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => return Delivery::Cancelled,
                        result = link.transport.send(message) => result,
                    },
                    None => link.transport.send(message).await,
                }
            }
        };

        match result {
            Ok(()) => Delivery::Sent,
            Err(TransportError::Closed) => {
                warn!(client_id = %handle.client_id, "Tried to send to a closed connection");
                self.disconnect(handle).await;
                Delivery::Dropped
            }
            Err(e) => {
                warn!(client_id = %handle.client_id, error = %e, "Error sending message");
                self.disconnect(handle).await;
                Delivery::Dropped
            }
        }
    }
}
