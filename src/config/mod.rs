pub mod auth;
pub mod loader;
pub mod store;
pub mod types;

pub use auth::{build_auth_header, AuthHeader};
pub use loader::ConfigError;
pub use store::ConfigStore;
pub use types::{AuthType, Backend, Config, Defaults, Provider, ProxyConfig};
