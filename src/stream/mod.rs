//! Streaming layer: one [`ConnectionManager`] per exchange socket.

pub mod backoff;
pub mod heartbeat;
pub mod manager;
pub mod network;
pub mod subscriptions;

pub use backoff::ReconnectPolicy;
pub use heartbeat::{HealthVerdict, HeartbeatMonitor};
pub use manager::{ConnectionManager, ConnectionManagerBuilder, Subscription};
pub use network::{NetworkMonitor, NetworkWatch};
pub use subscriptions::{HandlerId, SubscriptionTable};
