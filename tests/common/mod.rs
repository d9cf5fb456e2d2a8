//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_backend;

use sigguard::config::{Backend, Config, ConfigStore, Defaults, Provider, ProxyConfig};
use sigguard::proxy::thinking::SignatureBlacklist;
use sigguard::proxy::{ProxyHandle, ProxyServer};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Find an available port for testing.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to free port");
    listener.local_addr().unwrap().port()
}

pub fn create_backend(name: &str, provider: Provider, base_url: &str) -> Backend {
    Backend {
        name: name.to_string(),
        provider,
        base_url: base_url.to_string(),
        auth_type_str: "passthrough".to_string(),
        api_key: None,
    }
}

pub fn test_config(backend: Backend) -> Config {
    Config {
        defaults: Defaults {
            active: backend.name.clone(),
            timeout_seconds: 5,
            connect_timeout_seconds: 2,
            stream_fallback: true,
        },
        proxy: ProxyConfig {
            bind_addr: format!("127.0.0.1:{}", free_port()),
        },
        backends: vec![backend],
    }
}

/// A proxy bound to a local port and serving in the background.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub handle: ProxyHandle,
    pub blacklist: SignatureBlacklist,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Bind and spawn a proxy for `config`.
pub async fn start_proxy(config: Config) -> RunningProxy {
    let config_store = ConfigStore::new(config, PathBuf::from("/tmp/sigguard-test.toml"));
    let mut server = ProxyServer::new(config_store).expect("Failed to create proxy server");

    // Bind to port before spawning - this prevents race conditions
    let addr = server.try_bind().await.expect("Failed to bind");
    let handle = server.handle();
    let blacklist = server.blacklist();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    assert!(wait_for_server(addr, Duration::from_secs(2)).await);

    RunningProxy {
        addr,
        handle,
        blacklist,
    }
}

/// Create a temporary config file with specified backends.
pub fn temp_config(backends: &[(&str, &str, &str)]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");

    let mut content = String::from(
        r#"[defaults]
active = "test"
timeout_seconds = 5
connect_timeout_seconds = 2

[proxy]
bind_addr = "127.0.0.1:0"

"#,
    );

    for (name, provider, auth_type) in backends {
        content.push_str(&format!(
            r#"[[backends]]
name = "{}"
provider = "{}"
base_url = "http://127.0.0.1:1"
auth_type = "{}"
"#,
            name, provider, auth_type
        ));
        if *auth_type != "passthrough" {
            content.push_str("api_key = \"test-key\"\n");
        }
        content.push('\n');
    }

    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

/// Wait for a server to become available.
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
