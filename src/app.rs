use crate::api::aggregate::aggregate;
use crate::api::client::{AgentClient, Attachment};
use crate::api::topic;
use crate::config::Config;
use crate::error::{SendError, StoreError};
use crate::state::longwait::{LongWaitTimer, WaitState};
use crate::state::transcript::{title_pass_due, TranscriptReconciler};
use crate::storage::ChatStore;
use crate::types::Chat;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// What the caller gets back from one settled send.
#[derive(Debug)]
pub struct SendOutcome {
    /// Authoritative final text, as returned by the aggregator.
    pub text: String,
    /// Whether the request was still in the long-wait state when it settled;
    /// the front end uses this to decide on a completion notification.
    pub long_wait_reached: bool,
}

/// Ties config, transport, store and the per-request pipeline together. All
/// methods take `&self`; the in-flight set is the only interior mutability
/// and enforces single-flight per chat.
pub struct App {
    config: Config,
    client: AgentClient,
    store: ChatStore,
    wait_tx: Arc<watch::Sender<WaitState>>,
    in_flight: Mutex<HashSet<String>>,
}

impl App {
    pub fn new(config: Config, store: ChatStore) -> Self {
        Self::with_client(config, store, AgentClient::new())
    }

    pub fn with_client(config: Config, store: ChatStore, client: AgentClient) -> Self {
        Self {
            config,
            client,
            store,
            wait_tx: Arc::new(watch::channel(WaitState::Normal).0),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.store.chats()
    }

    pub fn create_chat(&self, agent_id: &str) -> Result<Chat, StoreError> {
        self.store.create_chat(agent_id)
    }

    pub fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        self.store.delete_chat(chat_id)
    }

    /// Wait-state feed for the front end's status line and the notification
    /// path. Each send re-arms the shared channel.
    pub fn wait_state(&self) -> watch::Receiver<WaitState> {
        self.wait_tx.subscribe()
    }

    /// Run one full send against a chat's configured agent. `on_fragment` is
    /// invoked with each delta in arrival order; the transcript is persisted
    /// as fragments arrive, and a final authoritative write lands on
    /// completion. Errors settle the request with a synthetic assistant
    /// error message (the user's message is kept).
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
        image_previews: Option<Vec<String>>,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<SendOutcome, SendError> {
        let _guard = self.claim_chat(chat_id)?;

        let chat = self
            .store
            .chat(chat_id)
            .ok_or_else(|| SendError::UnknownChat(chat_id.to_string()))?;

        let mut reconciler = TranscriptReconciler::new(&self.store, chat_id);
        reconciler.begin(text, image_previews)?;

        let mut timer = LongWaitTimer::arm(Arc::clone(&self.wait_tx));
        tracing::info!(chat_id, message_length = text.len(), "send started");

        let outcome = self
            .run_request(&chat, text, attachments, &mut reconciler, &mut timer, on_fragment)
            .await;

        let long_wait_reached = timer.is_long_wait();
        timer.clear();

        match outcome {
            Ok(final_text) => {
                reconciler.complete(&final_text)?;
                let elapsed = reconciler.request().started_at.elapsed();
                tracing::info!(
                    chat_id,
                    elapsed_secs = elapsed.as_secs_f32(),
                    "send completed"
                );
                self.maybe_generate_title(chat_id).await?;
                Ok(SendOutcome {
                    text: final_text,
                    long_wait_reached,
                })
            }
            Err(error) => {
                let elapsed = reconciler.request().started_at.elapsed();
                tracing::error!(
                    chat_id,
                    %error,
                    elapsed_secs = elapsed.as_secs_f32(),
                    "send failed"
                );
                if let Err(store_error) = reconciler.fail() {
                    tracing::error!(%store_error, "failed to record the error message");
                }
                Err(error)
            }
        }
    }

    async fn run_request(
        &self,
        chat: &Chat,
        text: &str,
        attachments: Vec<Attachment>,
        reconciler: &mut TranscriptReconciler<'_>,
        timer: &mut LongWaitTimer,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String, SendError> {
        // Config problems surface here, before any network traffic.
        let agent = self
            .config
            .agent_by_id(&chat.agent_id)
            .cloned()
            .ok_or_else(|| SendError::UnknownAgent(chat.agent_id.clone()))?;

        let response = self
            .client
            .send_message(&agent, text, &chat.id, attachments)
            .await?;

        let mut callback = |fragment: &str| {
            reconciler.request_mut().long_wait = timer.is_long_wait();
            match reconciler.apply_fragment(fragment) {
                // Any data is evidence of liveness; disarm the escalation.
                Ok(true) => timer.clear(),
                Ok(false) => {
                    if timer.is_long_wait() {
                        timer.clear();
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "failed to persist streamed fragment");
                }
            }
            on_fragment(fragment);
        };

        aggregate(&response.content_type, response.body, &mut callback).await
    }

    async fn maybe_generate_title(&self, chat_id: &str) -> Result<(), StoreError> {
        let Some(chat) = self.store.chat(chat_id) else {
            return Ok(());
        };
        if !title_pass_due(&chat) {
            return Ok(());
        }

        let name = topic::generate_chat_name(
            self.client.http(),
            &self.config.topic_llm,
            &chat.messages,
        )
        .await;
        tracing::info!(chat_id, name, "chat renamed from placeholder");
        self.store.update_chat(chat_id, |chat| chat.name = name)
    }

    fn claim_chat(&self, chat_id: &str) -> Result<InFlightGuard<'_>, SendError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if !in_flight.insert(chat_id.to_string()) {
            return Err(SendError::RequestInFlight(chat_id.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            chat_id: chat_id.to_string(),
        })
    }
}

/// Releases the chat's in-flight claim even when the send future is dropped
/// mid-request.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    chat_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{AgentResponse, MockResponseProducer};
    use crate::state::transcript::REQUEST_FAILED_TEXT;
    use crate::types::Role;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedProducer {
        content_type: &'static str,
        chunks: Vec<Vec<u8>>,
    }

    impl MockResponseProducer for ScriptedProducer {
        fn produce(&self, _text: &str, _session_id: &str) -> Result<AgentResponse, SendError> {
            let chunks: Vec<Result<Bytes, SendError>> = self
                .chunks
                .iter()
                .map(|chunk| Ok(Bytes::from(chunk.clone())))
                .collect();
            Ok(AgentResponse {
                content_type: self.content_type.to_string(),
                body: Box::pin(futures::stream::iter(chunks)),
            })
        }
    }

    struct FailingProducer;

    impl MockResponseProducer for FailingProducer {
        fn produce(&self, _text: &str, _session_id: &str) -> Result<AgentResponse, SendError> {
            Err(SendError::Http {
                url: "https://agents.example/webhook".to_string(),
                status: 500,
            })
        }
    }

    struct PendingProducer;

    impl MockResponseProducer for PendingProducer {
        fn produce(&self, _text: &str, _session_id: &str) -> Result<AgentResponse, SendError> {
            Ok(AgentResponse {
                content_type: "text/event-stream".to_string(),
                body: Box::pin(futures::stream::pending()),
            })
        }
    }

    /// First chunk only after a 45 s silence; used for the escalation test.
    struct SlowProducer;

    impl MockResponseProducer for SlowProducer {
        fn produce(&self, _text: &str, _session_id: &str) -> Result<AgentResponse, SendError> {
            let body = futures::stream::once(async {
                tokio::time::sleep(Duration::from_secs(45)).await;
                Ok(Bytes::from_static(b"{\"type\":\"item\",\"content\":\"late\"}\n"))
            });
            Ok(AgentResponse {
                content_type: "application/x-ndjson".to_string(),
                body: Box::pin(body),
            })
        }
    }

    fn test_config() -> Config {
        Config::from_toml_str(
            "[[agents]]\nname = \"Test\"\nwebhook_url = \"https://agents.example/webhook\"\n",
        )
        .expect("test config should parse")
    }

    fn app_with(producer: Arc<dyn MockResponseProducer>) -> (App, String) {
        let store = ChatStore::in_memory();
        let chat = store.create_chat("agent-0").expect("create chat");
        let app = App::with_client(test_config(), store, AgentClient::new_mock(producer));
        (app, chat.id)
    }

    #[tokio::test]
    async fn test_streamed_send_persists_incrementally_and_settles() {
        let producer = Arc::new(ScriptedProducer {
            content_type: "application/x-ndjson",
            chunks: vec![
                b"{\"type\":\"begin\"}\n{\"type\":\"item\",\"content\":\"Hel\"}\n".to_vec(),
                b"{\"type\":\"item\",\"content\":\"lo\"}\n{\"type\":\"end\"}\n".to_vec(),
            ],
        });
        let (app, chat_id) = app_with(producer);

        let mut fragments = Vec::new();
        let outcome = app
            .send_message(&chat_id, "hi", vec![], None, &mut |fragment| {
                fragments.push(fragment.to_string());
            })
            .await
            .expect("send should succeed");

        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(outcome.text, "Hello");
        assert!(!outcome.long_wait_reached);

        let chat = app.store().chat(&chat_id).expect("chat exists");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::User);
        assert_eq!(chat.messages[0].content, "hi");
        assert_eq!(chat.messages[1].role, Role::Assistant);
        assert_eq!(chat.messages[1].content, "Hello");
        // Two messages only: no rename pass at this count.
        assert_eq!(chat.name, crate::storage::PLACEHOLDER_CHAT_NAME);
    }

    #[tokio::test]
    async fn test_envelope_send_never_streams_but_is_recorded() {
        let producer = Arc::new(ScriptedProducer {
            content_type: "application/json",
            chunks: vec![b"{\"output\":\"42\"}".to_vec()],
        });
        let (app, chat_id) = app_with(producer);

        let mut callback_count = 0usize;
        let outcome = app
            .send_message(&chat_id, "meaning of life?", vec![], None, &mut |_| {
                callback_count += 1;
            })
            .await
            .expect("send should succeed");

        assert_eq!(callback_count, 0);
        assert_eq!(outcome.text, "42");

        let chat = app.store().chat(&chat_id).expect("chat exists");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].content, "42");
    }

    #[tokio::test]
    async fn test_failed_send_keeps_user_message_and_records_apology() {
        let (app, chat_id) = app_with(Arc::new(FailingProducer));

        let result = app
            .send_message(&chat_id, "hi", vec![], None, &mut |_| {})
            .await;
        assert!(matches!(result, Err(SendError::Http { status: 500, .. })));

        let chat = app.store().chat(&chat_id).expect("chat exists");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::User);
        assert_eq!(chat.messages[0].content, "hi");
        assert_eq!(chat.messages[1].content, REQUEST_FAILED_TEXT);
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_before_any_network_call() {
        let store = ChatStore::in_memory();
        let chat = store.create_chat("agent-9").expect("create chat");
        let app = App::with_client(
            test_config(),
            store,
            AgentClient::new_mock(Arc::new(FailingProducer)),
        );

        let result = app
            .send_message(&chat.id, "hi", vec![], None, &mut |_| {})
            .await;
        assert!(matches!(result, Err(SendError::UnknownAgent(id)) if id == "agent-9"));

        // Propagation policy: the user's message stays, plus one error reply.
        let stored = app.store().chat(&chat.id).expect("chat exists");
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[1].content, REQUEST_FAILED_TEXT);
    }

    #[tokio::test]
    async fn test_unknown_chat_is_rejected() {
        let (app, _chat_id) = app_with(Arc::new(FailingProducer));
        let result = app
            .send_message("missing", "hi", vec![], None, &mut |_| {})
            .await;
        assert!(matches!(result, Err(SendError::UnknownChat(_))));
    }

    #[tokio::test]
    async fn test_second_send_for_same_chat_is_refused_while_first_runs() {
        let (app, chat_id) = app_with(Arc::new(PendingProducer));

        let mut sink_one = |_fragment: &str| {};
        // Box::pin rather than pin_mut!: the latter shadows the binding with a
        // Pin reference, so the later `drop(first)` would not drop the future
        // (and its in-flight claim) at all.
        let mut first = Box::pin(app.send_message(&chat_id, "one", vec![], None, &mut sink_one));
        assert!(futures::poll!(first.as_mut()).is_pending());

        let mut sink_two = |_fragment: &str| {};
        let second = app
            .send_message(&chat_id, "two", vec![], None, &mut sink_two)
            .await;
        assert!(matches!(second, Err(SendError::RequestInFlight(_))));

        // Dropping the stuck send releases the claim.
        drop(first);
        let mut sink_three = |_fragment: &str| {};
        let third = app.send_message(&chat_id, "three", vec![], None, &mut sink_three);
        futures::pin_mut!(third);
        assert!(futures::poll!(third.as_mut()).is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_wait_escalates_then_clears_on_first_fragment() {
        let (app, chat_id) = app_with(Arc::new(SlowProducer));
        let wait_rx = app.wait_state();

        let mut state_at_first_fragment = None;
        let outcome = {
            let wait_rx = wait_rx.clone();
            app.send_message(&chat_id, "hi", vec![], None, &mut |_fragment| {
                state_at_first_fragment.get_or_insert(*wait_rx.borrow());
            })
            .await
            .expect("send should succeed")
        };

        // Escalated at 40 s, fragment at 45 s, back to normal before settle.
        assert_eq!(state_at_first_fragment, Some(WaitState::LongWait));
        assert_eq!(*wait_rx.borrow(), WaitState::Normal);
        assert_eq!(outcome.text, "late");
        assert!(!outcome.long_wait_reached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_wait_still_set_when_settling_without_fragments() {
        // Envelope body that only arrives after the threshold: no fragment
        // ever clears the mark.
        struct SlowEnvelopeProducer;
        impl MockResponseProducer for SlowEnvelopeProducer {
            fn produce(&self, _text: &str, _session_id: &str) -> Result<AgentResponse, SendError> {
                let body = futures::stream::once(async {
                    tokio::time::sleep(Duration::from_secs(50)).await;
                    Ok(Bytes::from_static(b"{\"output\":\"done\"}"))
                });
                Ok(AgentResponse {
                    content_type: "application/json".to_string(),
                    body: Box::pin(body),
                })
            }
        }

        let (app, chat_id) = app_with(Arc::new(SlowEnvelopeProducer));
        // Hold a subscriber as the front end always does: with every receiver
        // dropped, `watch::Sender::send` discards the escalation flip.
        let _wait_rx = app.wait_state();
        let outcome = app
            .send_message(&chat_id, "hi", vec![], None, &mut |_| {})
            .await
            .expect("send should succeed");

        // The envelope path emits no fragments, so nothing cleared the mark
        // before settlement.
        assert_eq!(outcome.text, "done");
        assert!(outcome.long_wait_reached);
    }

    #[tokio::test]
    async fn test_title_pass_runs_at_six_messages_with_disabled_llm() {
        let producer = Arc::new(ScriptedProducer {
            content_type: "application/x-ndjson",
            chunks: vec![b"{\"type\":\"item\",\"content\":\"answer\"}\n".to_vec()],
        });
        let (app, chat_id) = app_with(producer);

        for question in ["first question", "second", "third"] {
            app.send_message(&chat_id, question, vec![], None, &mut |_| {})
                .await
                .expect("send should succeed");
        }

        let chat = app.store().chat(&chat_id).expect("chat exists");
        assert_eq!(chat.messages.len(), 6);
        // Topic LLM is disabled in the test config, so the fallback name is
        // the first user message.
        assert_eq!(chat.name, "first question");
    }
}
