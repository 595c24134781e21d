use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Nucleus sampling value sent with every upstream request.
pub const TOP_P: f32 = 0.95;

/// Body posted to the upstream completion API.
///
/// The credential is never part of this structure; it travels only as a
/// transport header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPayload {
    /// Model identifier.
    pub model: String,

    /// Messages, system prompt first.
    pub messages: Vec<Message>,

    /// Token limit for the reply.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Nucleus sampling value.
    pub top_p: f32,

    /// Whether the upstream should stream its reply.
    pub stream: bool,
}
