/// Client configuration
use crate::error::{ChatError, Result};
use std::time::Duration;

/// Messaging client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Push channel base URL, e.g. "ws://127.0.0.1:8080" or "wss://chat.example.com"
    pub ws_base_url: String,

    /// Timeout for a single WebSocket connect attempt
    pub connect_timeout: Duration,

    /// Delay before reconnect attempt 1; attempt n waits base * 2^(n-1)
    pub base_reconnect_interval: Duration,

    /// Reconnect attempts before giving up (terminal disconnected state)
    pub max_reconnect_attempts: u32,

    /// Silence after the last keystroke before "typing stopped" is emitted
    pub typing_quiet_period: Duration,

    /// Maximum message content length in characters
    pub max_message_len: usize,

    /// Capacity of the event broadcast channels
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout: Duration::from_secs(10),
            base_reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            typing_quiet_period: Duration::from_secs(5),
            max_message_len: 2000,
            event_buffer: 256,
        }
    }
}

impl Config {
    /// Validate tunables that would break the connection loop if zeroed
    pub fn validate(&self) -> Result<()> {
        if self.ws_base_url.is_empty() {
            return Err(ChatError::Config("ws_base_url must not be empty".to_string()));
        }
        if !self.ws_base_url.starts_with("ws://") && !self.ws_base_url.starts_with("wss://") {
            return Err(ChatError::Config(format!(
                "ws_base_url must use ws:// or wss://, got: {}",
                self.ws_base_url
            )));
        }
        if self.max_message_len == 0 {
            return Err(ChatError::Config("max_message_len must be positive".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(ChatError::Config("event_buffer must be positive".to_string()));
        }
        Ok(())
    }

    /// Push endpoint for one user: {base}/messages/{user_id}?token={credential}
    pub fn endpoint_url(&self, user_id: &str, token: &str) -> String {
        format!(
            "{}/messages/{}?token={}",
            self.ws_base_url.trim_end_matches('/'),
            user_id,
            token
        )
    }
}
