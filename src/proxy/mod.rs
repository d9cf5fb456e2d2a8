pub mod error;
pub mod health;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod thinking;
pub mod upstream;

use tracing_subscriber::EnvFilter;

pub use error::{ErrorResponse, ProxyError};
pub use server::{ProxyHandle, ProxyServer};

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}
