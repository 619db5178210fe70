use std::time::Instant;
use uuid::Uuid;

/// Ephemeral bookkeeping for one in-flight send. Created when the send
/// begins, dropped when it settles; never persisted.
#[derive(Debug)]
pub struct RequestState {
    pub chat_id: String,
    /// Id the assistant message will carry; minted up front, materialized in
    /// the store only when the first fragment arrives.
    pub assistant_message_id: String,
    pub accumulated: String,
    pub first_fragment_seen: bool,
    pub started_at: Instant,
    pub long_wait: bool,
}

impl RequestState {
    pub fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            assistant_message_id: Uuid::new_v4().to_string(),
            accumulated: String::new(),
            first_fragment_seen: false,
            started_at: Instant::now(),
            long_wait: false,
        }
    }
}
