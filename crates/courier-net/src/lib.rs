// Real-time transport layer: one reconnecting link plus typed event fan-out.

pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod memory;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus};
pub use dispatcher::{Dispatcher, Subscription};
pub use error::ConnectionError;
pub use events::{
    CallAction, CallUpdate, DeliveryTimeout, Event, EventKind, SendFailure, StatusChange,
};
pub use memory::{MemoryConnector, MemoryPeer};
pub use transport::{Connector, TransportEvent, TransportLink, WebSocketConnector};
