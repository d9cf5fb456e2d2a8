use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use sigguard::config::{Config, ConfigStore};
use sigguard::proxy::{init_tracing, ProxyServer};

/// Forwarding proxy that recovers from rejected thinking signatures.
#[derive(Debug, Parser)]
#[command(name = "sigguard", version, about)]
struct Cli {
    /// Config file (default: <config dir>/sigguard/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override `proxy.bind_addr`
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Override `defaults.active`
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.proxy.bind_addr = bind.clone();
        }
        if let Some(backend) = &self.backend {
            config.defaults.active = backend.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    cli.apply(&mut config);
    config.validate()?;

    let store = ConfigStore::new(config, path);
    spawn_reload_on_hangup(store.clone());

    let mut server = ProxyServer::new(store)?;
    let addr = server.try_bind().await.map_err(anyhow::Error::from_boxed)?;
    tracing::info!(%addr, "sigguard listening");

    server.run().await.map_err(anyhow::Error::from_boxed)?;
    Ok(())
}

/// Re-read the config file on SIGHUP. CLI overrides are not reapplied.
#[cfg(unix)]
fn spawn_reload_on_hangup(store: ConfigStore) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP reload unavailable");
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match store.reload() {
                Ok(()) => tracing::info!(path = %store.path().display(), "Config reloaded"),
                Err(e) => tracing::warn!(error = %e, "Config reload failed, keeping previous config"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_store: ConfigStore) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from(["sigguard", "--bind", "127.0.0.1:9999", "--backend", "other"]);
        let mut config = Config::default();

        cli.apply(&mut config);

        assert_eq!(config.proxy.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.defaults.active, "other");
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["sigguard"]);
        let mut config = Config::default();

        cli.apply(&mut config);

        assert_eq!(config.proxy.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.defaults.active, "claude");
    }
}
