//! Message sink and pump: the send callback handed to task executors.
//!
//! Executors enqueue notices into a [`MessageSink`] without blocking; a
//! background task drains the queue into the registry, one lane per client.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::{ConnectionRegistry, Delivery};
use crate::messages::Payload;

/// Cloneable, non-blocking send callback.
#[derive(Clone)]
pub struct MessageSink {
    tx: mpsc::UnboundedSender<Payload>,
}

impl MessageSink {
    /// Create a sink and the receiver the pump drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a message. Never blocks; drops the message if the pump is gone.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable message");
                return;
            }
        };
        if self.tx.send(payload).is_err() {
            debug!("Message queue closed, dropping message");
        }
    }
}

/// Client id a queued message is addressed to, if any.
fn target_of(message: &Payload) -> Option<&str> {
    message.get("connection_id").and_then(Payload::as_str)
}

/// Deliver one queued message.
///
/// Messages carrying a `connection_id` go to every connection registered
/// under that client id; anything else is broadcast. Returns the number of
/// connections the message was written to.
pub async fn route_message(registry: &ConnectionRegistry, message: &Payload) -> usize {
    let Some(target) = target_of(message) else {
        return registry.broadcast(message).await.delivered;
    };

    let connections = registry.connections_for(target).await;
    if connections.is_empty() {
        debug!(connection_id = %target, "No live connection for queued message");
        return 0;
    }

    let mut delivered = 0;
    for handle in &connections {
        debug!(connection_id = %target, id = %handle.id(), "Sending queued message");
        if registry.send(message, handle).await == Delivery::Sent {
            delivered += 1;
        }
    }
    delivered
}

/// Spawn the task that drains `rx` into `registry` until every sink is dropped.
///
/// Each target client id gets its own delivery lane, so a stalled peer only
/// holds up messages addressed to it. Untargeted messages share one lane.
/// Order is kept within a lane. The returned task finishes once every lane
/// has flushed.
pub fn spawn_message_pump(
    registry: Arc<ConnectionRegistry>,
    mut rx: mpsc::UnboundedReceiver<Payload>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lanes: HashMap<Option<String>, mpsc::UnboundedSender<Payload>> = HashMap::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        while let Some(message) = rx.recv().await {
            let target = target_of(&message).map(str::to_string);

            // A lane whose client went away closes itself; start a new one.
            let message = match lanes.get(&target) {
                Some(lane) => match lane.send(message) {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(message)) => message,
                },
                None => message,
            };

            tasks.retain(|task| !task.is_finished());
            let (lane, task) = spawn_lane(Arc::clone(&registry), target.clone());
            if lane.send(message).is_err() {
                warn!(connection_id = ?target, "Delivery lane closed before first message");
            }
            lanes.insert(target, lane);
            tasks.push(task);
        }

        drop(lanes);
        join_all(tasks).await;
        debug!("Message pump stopped");
    })
}

/// One ordered delivery queue for a single target.
///
/// A targeted lane stops accepting new messages once its client has no live
/// connection left, and exits after flushing what is already queued.
fn spawn_lane(
    registry: Arc<ConnectionRegistry>,
    target: Option<String>,
) -> (mpsc::UnboundedSender<Payload>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Payload>();
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            route_message(&registry, &message).await;
            if let Some(client_id) = &target {
                if registry.connections_for(client_id).await.is_empty() {
                    rx.close();
                }
            }
        }
        debug!(connection_id = ?target, "Delivery lane stopped");
    });
    (tx, task)
}
