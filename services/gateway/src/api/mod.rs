//! HTTP surface of the gateway: the streaming consume endpoint, the batch
//! publish endpoint and event-type administration, plus the problem-body
//! error mapping they share.
use axum::http::HeaderMap;
use std::collections::HashSet;

pub mod error;
pub mod event_types;
pub mod events;
pub mod publish;

/// Scope required by the event-type administration endpoints.
pub const ADMIN_SCOPE: &str = "hermod.admin";

/// Header carrying the authenticated application id.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// Header carrying the space-separated scopes granted to the client.
pub const SCOPES_HEADER: &str = "x-scopes";

#[derive(Debug, thiserror::Error)]
#[error("client does not have access to the required scope(s): {0}")]
pub struct IllegalScope(pub String);

/// Authenticated principal. Authentication itself happens upstream; the
/// gateway trusts the forwarded identity headers.
#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub scopes: HashSet<String>,
}

impl Client {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let client_id = headers
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unauthenticated")
            .to_string();
        let scopes = headers
            .get(SCOPES_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();
        Self { client_id, scopes }
    }

    /// An event type without scopes is open; otherwise the client needs at
    /// least one of the required scopes.
    pub fn check_scopes(&self, required: &[String]) -> Result<(), IllegalScope> {
        if required.is_empty() || required.iter().any(|scope| self.scopes.contains(scope)) {
            return Ok(());
        }
        Err(IllegalScope(required.join(", ")))
    }
}
