use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Client;
use tokio::net::TcpListener;

use crate::config::ConfigStore;
use crate::proxy::error::ProxyError;
use crate::proxy::router::{build_router, RouterEngine};
use crate::proxy::shutdown::ShutdownManager;
use crate::proxy::thinking::{SignatureBlacklist, SignatureRecovery};

/// How many ports above the configured one `try_bind` will probe.
const PORT_PROBE_RANGE: u16 = 100;

pub struct ProxyServer {
    pub addr: SocketAddr,
    /// The bound listener, kept alive to prevent port race conditions.
    /// Populated by try_bind(), consumed by run().
    listener: Option<TcpListener>,
    config: ConfigStore,
    router: RouterEngine,
    shutdown: ShutdownManager,
    blacklist: SignatureBlacklist,
}

impl ProxyServer {
    pub fn new(config: ConfigStore) -> Result<Self, ProxyError> {
        let defaults = config.get().defaults;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(defaults.connect_timeout_seconds)))
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to build upstream client: {}", e)))?;

        let blacklist = SignatureBlacklist::new();
        let router = RouterEngine::new(
            config.clone(),
            client,
            SignatureRecovery::new(blacklist.clone()),
        );

        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)), // Will be determined at bind time
            listener: None,
            config,
            router,
            shutdown: ShutdownManager::new(),
            blacklist,
        })
    }

    /// Try to bind to the configured address, falling back to incremental ports if busy.
    ///
    /// The listener is kept alive to prevent port race conditions - another process
    /// cannot claim the port between try_bind() and run().
    pub async fn try_bind(&mut self) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
        let bind_addr_str = self.config.get().proxy.bind_addr;
        let bind_addr: SocketAddr = bind_addr_str
            .parse()
            .map_err(|e| format!("Invalid bind address '{}': {}", bind_addr_str, e))?;

        let start_port = bind_addr.port();
        let host = bind_addr.ip();
        let end_port = if start_port == 0 {
            0
        } else {
            start_port.saturating_add(PORT_PROBE_RANGE)
        };

        for port in start_port..=end_port {
            let try_addr = SocketAddr::new(host, port);
            match TcpListener::bind(try_addr).await {
                Ok(listener) => {
                    let actual_addr = listener.local_addr()?;
                    self.addr = actual_addr;
                    self.listener = Some(listener);
                    tracing::info!("Proxy bound to {}", actual_addr);
                    return Ok(actual_addr);
                }
                Err(e) => {
                    tracing::debug!("Port {} busy: {}", port, e);
                }
            }
        }

        Err(format!("Could not find available port in range {}-{}", start_port, end_port).into())
    }

    /// The process-wide signature blacklist used by every request.
    pub fn blacklist(&self) -> SignatureBlacklist {
        self.blacklist.clone()
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the proxy server.
    ///
    /// Consumes self to take ownership of the pre-bound listener.
    /// Call try_bind() before run() to bind to an available port.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = self
            .listener
            .ok_or("try_bind() must be called before run()")?;

        tracing::info!("Starting proxy server on {}", self.addr);

        let app = build_router(self.router);
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = shutdown.wait_for_shutdown().await {
                    tracing::warn!(error = %e, "Signal handler failed, waiting for programmatic shutdown");
                    shutdown.token().cancelled().await;
                }
            })
            .await?;

        self.blacklist.shutdown();
        tracing::info!("Server stopped");

        Ok(())
    }
}

#[derive(Clone)]
pub struct ProxyHandle {
    shutdown: ShutdownManager,
}

impl ProxyHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}
