//! Transport abstraction for a single long-lived client socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;

use crate::error::TransportError;
use crate::messages::Payload;

/// The write half of a bidirectional channel.
///
/// The registry serializes all calls on one transport, so implementations
/// never see two concurrent writers.
#[async_trait]
pub trait Transport: Send {
    /// Complete the transport-level handshake. May suspend awaiting the peer.
    async fn accept(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Whether the peer is still reachable, as far as the transport knows.
    fn is_open(&self) -> bool;

    /// Write one structured message.
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Close the channel. Called at most once, when the connection is deregistered.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Transport over the sink half of an axum WebSocket.
///
/// The HTTP upgrade is finished by axum before the socket reaches us, so
/// `accept` is the default no-op. The open flag is shared with the socket's
/// read loop, which clears it when the peer sends Close.
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
    open: Arc<AtomicBool>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag the read loop uses to mark the peer as gone.
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        let json = serde_json::to_string(payload)?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| {
                self.open.store(false, Ordering::Release);
                TransportError::Send(e.to_string())
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
