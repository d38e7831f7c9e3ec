//! Connection registry and WebSocket fan-out.

pub mod pump;
pub mod registry;
pub mod transport;
pub mod ws;

pub use pump::{MessageSink, route_message, spawn_message_pump};
pub use registry::{BroadcastReport, Connection, ConnectionHandle, ConnectionRegistry, Delivery};
pub use transport::{Transport, WsTransport};
pub use ws::{HubState, hub_routes};
