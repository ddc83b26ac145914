//! Gateway trait and the normalized inbound message shape.

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::form::session::UserId;

/// An inbound text message, already extracted from the platform payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user_id: UserId,
    pub text: String,
}

impl IncomingMessage {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
        }
    }
}

/// Outbound side of a messaging platform.
///
/// Delivery is best-effort: callers log failures and move on.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Gateway name used in logs and errors.
    fn name(&self) -> &str;

    /// Send a text message to the user.
    async fn send_text(&self, user_id: UserId, text: &str) -> Result<(), ChannelError>;

    /// Send a file attachment to the user.
    async fn send_document(
        &self,
        user_id: UserId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<(), ChannelError>;
}
