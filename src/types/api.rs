use serde::Deserialize;

/// One line of the agent's wire protocol: a tagged event with optional text
/// content. Unknown tags decode to `Unknown` and are dropped by the pipeline,
/// matching the protocol's forward-compatibility contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Begin {
        #[serde(default)]
        metadata: Option<EventMetadata>,
    },
    Item {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        metadata: Option<EventMetadata>,
    },
    End {
        #[serde(default)]
        metadata: Option<EventMetadata>,
    },
    #[serde(other)]
    Unknown,
}

/// Informational only. Never consulted for control flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub item_index: Option<u64>,
    #[serde(default)]
    pub run_index: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Outcome of decoding one complete line: a structured event, or the raw line
/// itself when it is not valid protocol output.
#[derive(Debug, Clone)]
pub enum Decoded {
    Event(StreamEvent),
    Literal(String),
}

impl Decoded {
    /// The assistant-visible text this line contributes, if any. Only `item`
    /// events with non-empty content and literal fallback lines produce one;
    /// `begin`/`end` are structural markers.
    pub fn into_fragment(self) -> Option<String> {
        match self {
            Decoded::Event(StreamEvent::Item {
                content: Some(content),
                ..
            }) if !content.is_empty() => Some(content),
            Decoded::Event(_) => None,
            Decoded::Literal(text) => Some(text),
        }
    }
}
