pub mod calls;
pub mod config;
pub mod delivery;
pub mod error;
pub mod presence;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use calls::{CallSession, CallState};
pub use courier_net::CallAction;
pub use config::ClientConfig;
pub use delivery::DeliveryEngine;
pub use error::ClientError;
pub use presence::{PresenceRecord, PresenceTracker};
pub use session::ChatClient;

/// Install the process-wide log subscriber. `RUST_LOG` overrides the default
/// filter. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("courier_client=debug,courier_net=debug,courier_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Courier client logging initialised");
    }
}
