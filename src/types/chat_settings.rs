use serde::{Deserialize, Serialize};

/// Client-safe view of the relay configuration.
///
/// This is what the config endpoint returns; it deliberately has no field for
/// the secret key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    /// Model identifier.
    pub model: String,
    /// Whether clients should request streamed replies.
    pub use_streaming: bool,
    /// Token limit per reply.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System prompt the relay injects.
    pub system_prompt: String,
}
