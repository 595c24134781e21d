use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Body of a chat request sent to the relay.
///
/// Clients build one of these per call from a snapshot of their history;
/// the relay decodes the same shape from inbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Conversation so far, in order.
    pub messages: Vec<Message>,

    /// Whether the caller wants a streamed reply.
    #[serde(default)]
    pub stream: bool,
}

impl RelayRequest {
    /// Creates a new request.
    pub fn new(messages: Vec<Message>, stream: bool) -> Self {
        Self { messages, stream }
    }
}
