//! WebSocket Connection Hub Library
//!
//! A process-wide hub that tracks live WebSocket connections, places them in
//! rooms and groups, and fans messages out without letting one slow peer
//! hold up the rest.
//!
//! # Features
//! - Room-filtered broadcast (empty room = sees every room)
//! - Join/leave/system notices delivered to everyone
//! - Group membership and group sends
//! - Slow-consumer eviction on a full outbound queue
//! - Read/write deadlines and periodic pings per connection
//! - Lock-free statistics snapshot
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the only owner of the registry and group map
//! - `HubHandle` is how everything else submits commands
//! - Each connection has a reader (inline) and a writer task
//! - The hub only ever `try_send`s into a connection's queue
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_hub::{handle_connection, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(HubConfig::default());
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let (hub, handle) = Hub::channel(config.command_capacity);
//!
//!     tokio::spawn(hub.run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, handle.clone(), config.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod pump;
pub mod stats;
pub mod types;

// Re-export main types for convenience
pub use config::HubConfig;
pub use connection::{Connection, ConnectionState, StateCell};
pub use error::{AppError, EnqueueError};
pub use handler::handle_connection;
pub use hub::{Hub, HubCommand, HubHandle};
pub use message::{ClientFrame, ControlFrame, Message, MessageDraft, MessageKind};
pub use stats::StatsSnapshot;
pub use types::ConnectionId;
