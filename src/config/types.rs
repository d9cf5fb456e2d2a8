use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub defaults: Defaults,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub backends: Vec<Backend>,
}

/// Default settings for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Name of the active backend by default.
    pub active: String,
    /// Request timeout in seconds, applied to each upstream attempt.
    pub timeout_seconds: u32,
    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// Answer a streaming request with a reconstructed stream when the
    /// streaming call keeps failing on a thinking signature (default: true).
    #[serde(default = "default_stream_fallback")]
    pub stream_fallback: bool,
}

/// Proxy configuration for local routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address for the local proxy server (host:port).
    #[serde(default = "default_proxy_bind_addr")]
    pub bind_addr: String,
}

/// Wire protocol spoken by an upstream provider.
///
/// Decides the endpoint shape and how a non-streaming response is replayed
/// as a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API (`/v1/messages`), labelled SSE events.
    Claude,
    /// OpenAI-compatible chat completions, unlabelled `data:` frames.
    #[serde(rename = "openai")]
    OpenAi,
    /// Gemini `generateContent`, single data frame.
    Gemini,
}

/// How the proxy authenticates against a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    ApiKey,
    Bearer,
    Passthrough,
}

fn default_connect_timeout() -> u32 {
    10
}

fn default_stream_fallback() -> bool {
    true
}

fn default_proxy_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_provider() -> Provider {
    Provider::Claude
}

/// Backend configuration for an API provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    /// Unique identifier (e.g., "claude", "antigravity", "openrouter").
    pub name: String,
    /// Protocol family of the upstream.
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Base URL for API (e.g., "https://api.anthropic.com").
    pub base_url: String,
    /// Authentication type: "api_key", "bearer", "passthrough".
    #[serde(rename = "auth_type")]
    pub auth_type_str: String,
    /// Direct API key for this backend.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Backend {
    /// Parsed authentication type. Unknown values fall back to passthrough.
    pub fn auth_type(&self) -> AuthType {
        match self.auth_type_str.as_str() {
            "api_key" => AuthType::ApiKey,
            "bearer" => AuthType::Bearer,
            _ => AuthType::Passthrough,
        }
    }

    /// Whether the backend has everything it needs to forward requests.
    pub fn is_configured(&self) -> bool {
        match self.auth_type() {
            AuthType::Passthrough => true,
            AuthType::ApiKey | AuthType::Bearer => self
                .api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty()),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            name: "claude".to_string(),
            provider: Provider::Claude,
            base_url: "https://api.anthropic.com".to_string(),
            auth_type_str: "passthrough".to_string(),
            api_key: None,
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            active: "claude".to_string(),
            timeout_seconds: 300,
            connect_timeout_seconds: default_connect_timeout(),
            stream_fallback: default_stream_fallback(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            proxy: ProxyConfig::default(),
            backends: vec![Backend::default()],
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_proxy_bind_addr(),
        }
    }
}

impl Config {
    /// Look up a backend by name.
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// The backend named by `defaults.active`.
    pub fn active_backend(&self) -> Option<&Backend> {
        self.backend(&self.defaults.active)
    }
}
