//! Harvest Chat Core Library
//!
//! Shared model for buyer/seller conversations on the Harvest marketplace.
//! Provides: data model, wire protocol, validation, directory filtering,
//! typing notifier, optimistic conversation view and the network client.

pub mod directory;
pub mod error;
pub mod models;
pub mod network;
pub mod protocol;
pub mod reactions;
pub mod typing;
pub mod validation;
pub mod view;

pub use error::*;
pub use models::*;
pub use network::*;
pub use protocol::*;

use std::time::Instant;

use crate::typing::TypingNotifier;
use crate::view::{ConversationView, FailedSend};

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub use_tls: bool,
    pub max_message_length: usize,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16, use_tls: bool) -> Self {
        Self {
            server_host: host.to_string(),
            server_port: port,
            use_tls,
            max_message_length: validation::DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server_host, self.server_port)
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}/ws", scheme, self.server_host, self.server_port)
    }
}

/// Signed-in session: REST calls, the live connection and typing state.
pub struct ChatSession {
    config: ClientConfig,
    user: User,
    api: ApiClient,
    live: LiveClient,
    typing: parking_lot::Mutex<std::collections::HashMap<String, TypingNotifier>>,
}

impl ChatSession {
    pub async fn connect(config: ClientConfig, token: &str) -> Result<Self> {
        let api = ApiClient::new(&config, token)?;
        let user = api.me().await?;
        let live = LiveClient::connect(&config, token).await?;

        Ok(Self {
            config,
            user,
            api,
            live,
            typing: parking_lot::Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn live(&self) -> &LiveClient {
        &self.live
    }

    /// Validate, show optimistically, send, then confirm or roll back.
    ///
    /// Invalid input never reaches the network and leaves the view untouched.
    pub async fn send(
        &self,
        view: &mut ConversationView,
        mut req: SendMessageRequest,
    ) -> std::result::Result<Message, SendFailure> {
        validation::validate_outgoing(&req, self.config.max_message_length)
            .map_err(SendFailure::Invalid)?;

        let temp_id = view.begin_send(&mut req, &self.user.user_id, &self.user.display_name);
        self.stop_typing(view.conversation_id(), Instant::now());

        match self.api.send_message(&req).await {
            Ok(message) => {
                view.confirm(&temp_id, message.clone());
                Ok(message)
            }
            Err(e) => {
                let reason = e.to_string();
                match view.fail(&temp_id, reason) {
                    Some(failed) => Err(SendFailure::Rejected(failed, e)),
                    None => Err(SendFailure::Failed(e)),
                }
            }
        }
    }

    /// Toggle the caller's reaction optimistically, then persist it.
    /// On failure the local change is reverted.
    pub async fn toggle_reaction(&self, view: &mut ConversationView, message_id: &str, emoji: &str) -> Result<()> {
        validation::validate_emoji(emoji)?;

        let user_id = self.user.user_id.as_str();
        let Some(present) = view.toggle_reaction(message_id, user_id, emoji) else {
            return Err(Error::Validation(format!("unknown message {}", message_id)));
        };

        let result = if present {
            self.api.add_reaction(message_id, emoji).await
        } else {
            self.api.remove_reaction(message_id, emoji).await
        };

        if let Err(e) = result {
            view.toggle_reaction(message_id, user_id, emoji);
            return Err(e);
        }
        Ok(())
    }

    /// Feed a keystroke in `conversation_id`; emits a typing signal when due.
    pub fn keystroke(&self, conversation_id: &str, now: Instant) -> Result<()> {
        let signal = self
            .typing
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .on_keystroke(now);
        if let Some(is_typing) = signal {
            self.live.send_typing(conversation_id, is_typing)?;
        }
        Ok(())
    }

    /// Drive idle timeouts; call on a timer.
    pub fn poll_typing(&self, now: Instant) -> Result<()> {
        let stopped: Vec<String> = self
            .typing
            .lock()
            .iter_mut()
            .filter_map(|(id, notifier)| notifier.poll(now).map(|_| id.clone()))
            .collect();
        for conversation_id in stopped {
            self.live.send_typing(&conversation_id, false)?;
        }
        Ok(())
    }

    fn stop_typing(&self, conversation_id: &str, now: Instant) {
        let signal = self
            .typing
            .lock()
            .get_mut(conversation_id)
            .and_then(|n| n.on_send(now));
        if signal.is_some() {
            if let Err(e) = self.live.send_typing(conversation_id, false) {
                log::debug!("Typing stop for {} not delivered: {}", conversation_id, e);
            }
        }
    }
}

/// Why `ChatSession::send` did not produce a message.
#[derive(Debug)]
pub enum SendFailure {
    /// Rejected before any network call.
    Invalid(Error),
    /// The store refused the write; the optimistic entry was rolled back.
    Rejected(FailedSend, Error),
    /// The write failed after the optimistic entry was already gone.
    Failed(Error),
}

impl SendFailure {
    pub fn error(&self) -> &Error {
        match self {
            SendFailure::Invalid(e) | SendFailure::Failed(e) | SendFailure::Rejected(_, e) => e,
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Invalid(e) => write!(f, "{}", e),
            SendFailure::Rejected(_, e) | SendFailure::Failed(e) => write!(f, "send failed: {}", e),
        }
    }
}

impl std::error::Error for SendFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = ClientConfig::new("market.local", 9443, false);
        assert_eq!(config.http_url(), "http://market.local:9443");
        assert_eq!(config.ws_url(), "ws://market.local:9443/ws");

        let tls = ClientConfig::new("market.example", 443, true);
        assert_eq!(tls.ws_url(), "wss://market.example:443/ws");
    }
}
