//! Realtime channel for geoqueue clients.
//!
//! Provides a reference-counted WebSocket connection manager with
//! keepalive and backoff reconnection, a static module registry, and the
//! event router that fans server frames out to module handlers.

pub mod error;
pub mod heartbeat;
pub mod manager;
mod pumps;
pub(crate) mod reconnection;
pub mod registry;
pub mod router;
pub mod sender;
pub mod types;
pub mod ws_client;

pub use error::{HandlerError, ModuleError, RealtimeError};
pub use heartbeat::Heartbeat;
pub use manager::ConnectionManager;
pub use registry::{
    EventHandler, ModuleContext, ModuleEntry, ModuleFactory, ModuleRegistry, RealtimeModule,
    Subscription,
};
pub use router::{EventRouter, LifecycleHandler, Routed};
pub use sender::FrameSender;
pub use types::{
    CloseInfo, ConnectionEvent, ConnectionState, ConnectionStatus, KeepaliveConfig,
    LifecycleKind, ManagerConfig, ReconnectConfig,
};
pub use ws_client::{
    ConnectFuture, Connector, TungsteniteConnector, WsError, WsSink, WsStream, build_request,
};

/// Raw WebSocket message type used by [`FrameSender`] and [`Connector`].
pub use tokio_tungstenite::tungstenite::Message as WsMessage;
