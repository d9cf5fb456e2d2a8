//! Authentication header building for upstream requests.

use super::types::{AuthType, Backend};

/// Header name and value for authentication.
pub type AuthHeader = (String, String);

/// Build the authentication header for a backend.
///
/// Returns `None` for passthrough backends (the client's own headers are
/// forwarded) and for backends whose key is missing.
pub fn build_auth_header(backend: &Backend) -> Option<AuthHeader> {
    let key = backend
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    match (backend.auth_type(), key) {
        (AuthType::ApiKey, Some(key)) => Some(("x-api-key".to_string(), key.to_string())),
        (AuthType::Bearer, Some(key)) => {
            Some(("Authorization".to_string(), format!("Bearer {}", key)))
        }
        (AuthType::Passthrough, _) => None,
        (_, None) => None,
    }
}
