//! Agent hub: WebSocket connection registry and task dispatch.

pub mod config;
pub mod connections;
pub mod dispatch;
pub mod error;
pub mod messages;
