use super::request::RequestState;
use crate::error::StoreError;
use crate::storage::{ChatStore, PLACEHOLDER_CHAT_NAME};
use crate::types::{Chat, Message, Role};

/// Fixed apology recorded when a send fails; the user's message is kept.
pub const REQUEST_FAILED_TEXT: &str = "Sorry, the request failed. It may be a network \
problem or the service may be temporarily unavailable; please try again later.";

/// A chat qualifies for its one-time automatic rename once it reaches exactly
/// six messages while still carrying the placeholder name.
const TITLE_PASS_MESSAGE_COUNT: usize = 6;

/// Sole writer of one chat's message list for the lifetime of one request.
///
/// Write pattern: the user message is persisted before the network call; the
/// assistant message is materialized on the first fragment and overwritten in
/// place (full accumulated text, not the delta) on every later fragment; the
/// completion write is authoritative and idempotent.
pub struct TranscriptReconciler<'a> {
    store: &'a ChatStore,
    request: RequestState,
}

impl<'a> TranscriptReconciler<'a> {
    pub fn new(store: &'a ChatStore, chat_id: &str) -> Self {
        Self {
            store,
            request: RequestState::new(chat_id),
        }
    }

    pub fn request(&self) -> &RequestState {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestState {
        &mut self.request
    }

    /// Persist the user's message. Must happen before the request is issued
    /// so a transport failure never loses the user's side.
    pub fn begin(&mut self, text: &str, images: Option<Vec<String>>) -> Result<(), StoreError> {
        let message = Message::user(text, images);
        self.store.update_chat(&self.request.chat_id, |chat| {
            chat.messages.push(message);
        })
    }

    /// Apply one fragment in arrival order. Returns true when this was the
    /// first fragment of the request (liveness signal for the caller's
    /// long-wait handling).
    pub fn apply_fragment(&mut self, fragment: &str) -> Result<bool, StoreError> {
        self.request.accumulated.push_str(fragment);
        let content = self.request.accumulated.clone();
        let message_id = self.request.assistant_message_id.clone();

        if !self.request.first_fragment_seen {
            self.request.first_fragment_seen = true;
            self.request.long_wait = false;
            let elapsed = self.request.started_at.elapsed();
            tracing::info!(elapsed_secs = elapsed.as_secs_f32(), "first fragment received");

            let message = Message::assistant(message_id, content);
            self.store.update_chat(&self.request.chat_id, |chat| {
                chat.messages.push(message);
            })?;
            return Ok(true);
        }

        self.store.update_chat(&self.request.chat_id, |chat| {
            if let Some(message) = find_message(chat, &message_id) {
                message.content = content;
            }
        })?;
        Ok(false)
    }

    /// Final authoritative write. The aggregator's returned text wins over
    /// the streamed accumulation (the envelope path never streams at all).
    /// Safe to repeat: the same text lands on the same message.
    pub fn complete(&mut self, final_text: &str) -> Result<(), StoreError> {
        let content = if final_text.is_empty() {
            self.request.accumulated.clone()
        } else {
            final_text.to_string()
        };
        let message_id = self.request.assistant_message_id.clone();

        self.store.update_chat(&self.request.chat_id, |chat| {
            match find_message(chat, &message_id) {
                Some(message) => message.content = content,
                None => chat.messages.push(Message::assistant(message_id, content)),
            }
        })
    }

    /// Replace whatever partial output this request produced with a single
    /// synthetic error message. The user's message stays.
    pub fn fail(&mut self) -> Result<(), StoreError> {
        let message_id = self.request.assistant_message_id.clone();
        self.store.update_chat(&self.request.chat_id, |chat| {
            chat.messages.retain(|message| message.id != message_id);
            chat.messages.push(Message {
                id: uuid::Uuid::new_v4().to_string(),
                role: Role::Assistant,
                content: REQUEST_FAILED_TEXT.to_string(),
                timestamp: crate::types::now_ms(),
                selected: None,
                images: None,
            });
        })
    }
}

/// Whether the one-time title-generation pass should run for this chat.
pub fn title_pass_due(chat: &Chat) -> bool {
    chat.name == PLACEHOLDER_CHAT_NAME && chat.messages.len() == TITLE_PASS_MESSAGE_COUNT
}

fn find_message<'c>(chat: &'c mut Chat, message_id: &str) -> Option<&'c mut Message> {
    chat.messages
        .iter_mut()
        .find(|message| message.id == message_id)
}
