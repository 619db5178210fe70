mod api;
mod chat;

pub use api::{Decoded, EventMetadata, StreamEvent};
pub use chat::{Chat, Message, Role};

pub(crate) use chat::now_ms;
