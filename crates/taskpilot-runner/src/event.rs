//! Inbound update events (webhook deliveries, chat-bot commands).

use serde::{Deserialize, Serialize};

/// One inbound update for one account. The payload is opaque to the
/// scheduler; assistants that care inspect it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Owning account. Events for accounts the store does not know are
    /// silently dropped.
    pub account_id: String,
    /// Event kind, e.g. `item:added` or `item:completed`. Debounce
    /// policies filter on this.
    pub kind: String,
    /// Raw delivery body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl UpdateEvent {
    pub fn new(account_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            kind: kind.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
