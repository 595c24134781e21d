use serde::Deserialize;

/// The parts of a buffered completion body the client reads.
///
/// Only `choices[0].message.content` matters; everything else the upstream
/// sends is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    /// Completion choices.
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    /// The complete assistant message.
    pub message: CompletionMessage,
}

/// The assistant message inside a choice.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    /// Reply text.
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    /// Text of the first choice, if there is one.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.message.content.as_deref().unwrap_or(""))
    }
}

/// One streamed frame: `{choices:[{delta:{content}}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    /// Delta choices.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// One choice inside a streamed frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    /// Incremental content.
    #[serde(default)]
    pub delta: ChunkDelta,
}

/// Incremental content of a streamed frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    /// Text fragment, possibly absent or null.
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionChunk {
    /// Text fragment of the first choice; empty when the frame carries none.
    pub fn delta_text(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }
}
