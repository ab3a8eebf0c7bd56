use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::models::conversation::{Conversation, FileRef, ImageRef, Message, Role};
use crate::models::mutation::{self, EditOutcome};
use crate::models::overlay::{ControlErrorCode, OverlayEvent, OverlayNotifier, TurnDisplay};
use crate::repositories::attachment_store::AttachmentStore;
use crate::repositories::conversation_repository::ConversationRepository;
use crate::services::mention_resolver::AttachmentIndex;
use crate::services::request_builder::{self, RequestType, TurnParams};
use crate::services::stream_decoder::{self, StreamEvent};
use crate::services::transport::{CompletionTransport, TransportError};
use crate::services::web_search::{self, SearchBackend};
use crate::settings::{ClientSettings, ModelEndpoint, WebSearchSupport};

/// Inline notice appended when a turn dies on a transport or decoder error
const FALLBACK_ERROR_TEXT: &str =
    "Something went wrong while generating a response. Please try again.";

/// How a turn ended
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// A non-empty assistant message was finalized and persisted
    Completed(Message),
    /// The stream finished with nothing but whitespace; silently discarded
    Empty,
    /// Cancellation observed; partial output discarded, nothing appended
    Cancelled,
    /// A recognized control-error code was raised as an overlay instead
    /// of conversation content
    ControlHandled(ControlErrorCode),
    /// Transport or decoder failure; an inline error notice was appended
    Failed(Message),
    /// The operation required no turn (assistant edit, unknown target)
    Noop,
}

/// Orchestrates one turn at a time per conversation: request assembly, the
/// optional search pre-step, streaming, finalization and persistence.
///
/// All collaborators are injected; the controller owns only the per-turn
/// cancellation flags. Starting a new turn for a conversation cancels the
/// one already in flight.
pub struct TurnController {
    transport: Arc<dyn CompletionTransport>,
    search: Arc<dyn SearchBackend>,
    attachments: Arc<dyn AttachmentStore>,
    repository: Arc<dyn ConversationRepository>,
    overlay: Arc<dyn OverlayNotifier>,
    display: Arc<dyn TurnDisplay>,
    settings: ClientSettings,
    endpoint: ModelEndpoint,
    active_turns: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        search: Arc<dyn SearchBackend>,
        attachments: Arc<dyn AttachmentStore>,
        repository: Arc<dyn ConversationRepository>,
        overlay: Arc<dyn OverlayNotifier>,
        display: Arc<dyn TurnDisplay>,
        settings: ClientSettings,
        endpoint: ModelEndpoint,
    ) -> Self {
        Self {
            transport,
            search,
            attachments,
            repository,
            overlay,
            display,
            settings,
            endpoint,
            active_turns: Mutex::new(HashMap::new()),
        }
    }

    /// Append a user message with its attachments and run a turn
    pub async fn send(
        &self,
        conversation: &mut Conversation,
        text: &str,
        files: Vec<FileRef>,
        images: Vec<ImageRef>,
    ) -> Result<TurnOutcome> {
        for file in &files {
            self.attachments
                .put(&file.id, file.content.clone())
                .await
                .context("storing file attachment")?;
        }
        for image in &images {
            self.attachments
                .put(&image.id, image.content.clone())
                .await
                .context("storing image attachment")?;
        }

        conversation.push_message(Message::user(text).with_files(files).with_images(images));
        self.persist(conversation).await?;
        self.run_turn(conversation).await
    }

    /// Edit a message. Assistant edits are in-place and run no turn;
    /// user edits truncate the history and resubmit.
    pub async fn edit(
        &self,
        conversation: &mut Conversation,
        message_id: &str,
        new_text: &str,
    ) -> Result<TurnOutcome> {
        match mutation::edit_message(conversation, message_id, new_text) {
            EditOutcome::AssistantEdited => {
                self.persist(conversation).await?;
                Ok(TurnOutcome::Noop)
            }
            EditOutcome::UserEdited => {
                self.persist(conversation).await?;
                self.run_turn(conversation).await
            }
            EditOutcome::NotFound => Ok(TurnOutcome::Noop),
        }
    }

    /// Regenerate the answer to the nearest user message at or before the
    /// target. No-op when no such user message exists.
    pub async fn retry(
        &self,
        conversation: &mut Conversation,
        message_id: &str,
    ) -> Result<TurnOutcome> {
        if mutation::retry_base(conversation, message_id).is_none() {
            return Ok(TurnOutcome::Noop);
        }
        self.persist(conversation).await?;
        self.run_turn(conversation).await
    }

    /// Fork the prefix up to and including `message_id` into a new,
    /// persisted conversation. The original is untouched.
    pub async fn split(
        &self,
        conversation: &Conversation,
        message_id: &str,
        new_title: &str,
    ) -> Result<Conversation> {
        let forked =
            mutation::split(conversation, message_id, new_title, self.attachments.as_ref())
                .await?;
        self.repository
            .persist(forked.clone())
            .await
            .context("persisting forked conversation")?;
        Ok(forked)
    }

    /// Cancel the in-flight turn of a conversation, if any. Cooperative:
    /// the decoder observes the flag at its next suspension point.
    pub fn cancel(&self, conversation_id: &str) {
        if let Some(flag) = self.active_turns.lock().get(conversation_id) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    async fn run_turn(&self, conversation: &mut Conversation) -> Result<TurnOutcome> {
        let cancel = self.begin_turn(&conversation.id);
        self.display.turn_started(&conversation.id);

        let outcome = self.drive_turn(conversation, cancel.clone()).await;

        self.display.turn_finished(&conversation.id);
        self.finish_turn(&conversation.id, &cancel);
        outcome
    }

    async fn drive_turn(
        &self,
        conversation: &mut Conversation,
        cancel: Arc<AtomicBool>,
    ) -> Result<TurnOutcome> {
        let index = AttachmentIndex::from_conversation(conversation);
        let mut params = self.turn_params(conversation);

        if self.endpoint.web_search == WebSearchSupport::Safe && self.settings.web_search_enabled
            && let Some(augmentation) = web_search::run_search_subprotocol(
                self.transport.as_ref(),
                self.search.as_ref(),
                conversation,
                &conversation.messages,
                &params,
                &index,
                &self.settings.search,
            )
            .await
        {
            params.effective_user_content = Some(augmentation.effective_content);
            // Raw results ride along on the persisted user message for
            // display; its text stays untouched
            if let Some(message) = conversation
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == Role::User)
            {
                message.search_results = Some(augmentation.results);
            }
        }

        let request =
            request_builder::build_request(conversation, &conversation.messages, &params, &index);

        let byte_stream = match self.transport.stream(&request).await {
            Ok(stream) => stream,
            Err(TransportError::Control(code)) => {
                debug!(conversation = %conversation.id, code = code.as_code(), "control code before stream");
                self.overlay.notify(OverlayEvent::Error(code.overlay()));
                return Ok(TurnOutcome::ControlHandled(code));
            }
            Err(err) => return self.fail_turn(conversation, err.into()).await,
        };

        let events = stream_decoder::decode_frames(byte_stream, cancel);
        futures::pin_mut!(events);

        let mut buffer = String::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::ContentDelta(text)) => {
                    buffer.push_str(&text);
                    self.display.delta(&conversation.id, &text);
                }
                Ok(StreamEvent::SponsoredContent {
                    title,
                    items,
                    token,
                }) => {
                    self.overlay
                        .notify(OverlayEvent::SponsoredContent { title, items, token });
                }
                Ok(StreamEvent::SuggestedPremium(payload)) => {
                    self.overlay.notify(OverlayEvent::PremiumSuggestion(payload));
                }
                Ok(StreamEvent::ControlError(code)) => {
                    debug!(conversation = %conversation.id, code = code.as_code(), "control code in stream");
                    self.overlay.notify(OverlayEvent::Error(code.overlay()));
                    return Ok(TurnOutcome::ControlHandled(code));
                }
                Ok(StreamEvent::Done) => break,
                Ok(StreamEvent::Aborted) => {
                    debug!(conversation = %conversation.id, "turn cancelled, partial output discarded");
                    return Ok(TurnOutcome::Cancelled);
                }
                Err(err) => return self.fail_turn(conversation, err).await,
            }
        }

        // Sentinel seen, or the body ended cleanly without one
        let content = buffer.trim();
        if content.is_empty() {
            self.persist(conversation).await?;
            return Ok(TurnOutcome::Empty);
        }

        let message = Message::assistant(content);
        conversation.push_message(message.clone());
        self.persist(conversation).await?;
        info!(
            conversation = %conversation.id,
            chars = content.len(),
            "turn finalized"
        );
        Ok(TurnOutcome::Completed(message))
    }

    fn turn_params(&self, conversation: &Conversation) -> TurnParams {
        TurnParams {
            model: self.endpoint.model.clone(),
            stream: true,
            current_date: self
                .settings
                .inject_current_date
                .then(|| Utc::now().format("%Y-%m-%d").to_string()),
            workspace_instructions: self
                .settings
                .workspace_instructions(conversation.workspace_id.as_deref()),
            expert_instructions: self
                .settings
                .expert_instructions(conversation.expert_id.as_deref()),
            tone: self.settings.tone.clone(),
            temperature: conversation.temperature,
            // Only endpoints with native search understand request_type
            request_type: (self.endpoint.web_search == WebSearchSupport::Native).then(|| {
                if self.settings.web_search_enabled {
                    RequestType::WebOn
                } else {
                    RequestType::WebOff
                }
            }),
            session_token: if self.settings.send_session_token {
                self.settings.session_token.clone()
            } else {
                None
            },
            locale: self.settings.locale.clone(),
            instruction_override: None,
            effective_user_content: None,
        }
    }

    async fn fail_turn(
        &self,
        conversation: &mut Conversation,
        err: anyhow::Error,
    ) -> Result<TurnOutcome> {
        error!(conversation = %conversation.id, error = %err, "turn failed");
        let message = Message::error(FALLBACK_ERROR_TEXT);
        conversation.push_message(message.clone());
        self.persist(conversation).await?;
        Ok(TurnOutcome::Failed(message))
    }

    async fn persist(&self, conversation: &Conversation) -> Result<()> {
        self.repository
            .persist(conversation.clone())
            .await
            .context("persisting conversation")
    }

    /// Register a fresh cancellation flag, cancelling any turn already in
    /// flight for this conversation
    fn begin_turn(&self, conversation_id: &str) -> Arc<AtomicBool> {
        let mut turns = self.active_turns.lock();
        if let Some(prior) = turns.get(conversation_id) {
            prior.store(true, Ordering::Relaxed);
        }
        let flag = Arc::new(AtomicBool::new(false));
        turns.insert(conversation_id.to_string(), flag.clone());
        flag
    }

    /// Drop the flag only if it is still ours; a newer turn may have
    /// replaced it already
    fn finish_turn(&self, conversation_id: &str, flag: &Arc<AtomicBool>) {
        let mut turns = self.active_turns.lock();
        if let Some(current) = turns.get(conversation_id)
            && Arc::ptr_eq(current, flag)
        {
            turns.remove(conversation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::models::overlay::NullDisplay;
    use crate::repositories::attachment_store::InMemoryAttachmentStore;
    use crate::repositories::in_memory_repository::InMemoryConversationRepository;
    use crate::services::request_builder::{CompletionRequest, WireContent, WireMessage};
    use crate::services::transport::ByteStream;
    use crate::services::web_search::{SearchQuery, SearchResponse};

    type MidStreamHook = Box<dyn Fn() + Send + Sync>;

    #[derive(Default)]
    struct ScriptedTransport {
        completions: Mutex<VecDeque<Result<String, TransportError>>>,
        streams: Mutex<VecDeque<Result<Vec<Vec<u8>>, TransportError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
        mid_stream_hook: Mutex<Option<MidStreamHook>>,
    }

    impl ScriptedTransport {
        fn push_completion(&self, result: Result<String, TransportError>) {
            self.completions.lock().push_back(result);
        }

        fn push_stream(&self, result: Result<Vec<Vec<u8>>, TransportError>) {
            self.streams.lock().push_back(result);
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
            self.requests.lock().push(request.clone());
            self.completions
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected complete() call"))
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, TransportError> {
            self.requests.lock().push(request.clone());
            let chunks = self
                .streams
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected stream() call"))?;
            let hook = self.mid_stream_hook.lock().take();

            let stream = async_stream::stream! {
                let mut chunks = chunks.into_iter();
                if let Some(first) = chunks.next() {
                    yield Ok(first);
                }
                if let Some(hook) = hook {
                    hook();
                }
                for chunk in chunks {
                    yield Ok(chunk);
                }
            };
            Ok(stream.boxed())
        }
    }

    #[derive(Default)]
    struct ScriptedBackend {
        response: Mutex<Option<Result<SearchResponse, TransportError>>>,
        queries: Mutex<Vec<SearchQuery>>,
    }

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, TransportError> {
            self.queries.lock().push(query.clone());
            self.response
                .lock()
                .take()
                .unwrap_or_else(|| panic!("unexpected search() call"))
        }
    }

    #[derive(Default)]
    struct RecordingOverlay {
        events: Mutex<Vec<OverlayEvent>>,
    }

    impl OverlayNotifier for RecordingOverlay {
        fn notify(&self, event: OverlayEvent) {
            self.events.lock().push(event);
        }
    }

    struct Fixture {
        controller: Arc<TurnController>,
        transport: Arc<ScriptedTransport>,
        backend: Arc<ScriptedBackend>,
        repository: Arc<InMemoryConversationRepository>,
        overlay: Arc<RecordingOverlay>,
        store: Arc<InMemoryAttachmentStore>,
    }

    /// Route turn logs through the test harness; repeated calls are fine
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fixture(settings: ClientSettings, endpoint: ModelEndpoint) -> Fixture {
        init_tracing();
        let transport = Arc::new(ScriptedTransport::default());
        let backend = Arc::new(ScriptedBackend::default());
        let repository = Arc::new(InMemoryConversationRepository::new());
        let overlay = Arc::new(RecordingOverlay::default());
        let store = Arc::new(InMemoryAttachmentStore::new());

        let controller = Arc::new(TurnController::new(
            transport.clone(),
            backend.clone(),
            store.clone(),
            repository.clone(),
            overlay.clone(),
            Arc::new(NullDisplay),
            settings,
            endpoint,
        ));

        Fixture {
            controller,
            transport,
            backend,
            repository,
            overlay,
            store,
        }
    }

    fn plain_fixture() -> Fixture {
        fixture(
            ClientSettings::default(),
            ModelEndpoint::new("ep", "test-model", "http://localhost:9999"),
        )
    }

    fn delta_chunk(text: &str) -> Vec<u8> {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(text).unwrap()
        )
        .into_bytes()
    }

    fn done_chunk() -> Vec<u8> {
        b"data: [DONE]\n\n".to_vec()
    }

    fn wire_text(message: &WireMessage) -> &str {
        match &message.content {
            WireContent::Text(text) => text,
            WireContent::Parts(_) => panic!("expected plain text content"),
        }
    }

    #[tokio::test]
    async fn test_streaming_turn_finalizes_assistant_message() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Ok(vec![delta_chunk("Hi"), delta_chunk(" there"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        let TurnOutcome::Completed(message) = outcome else {
            panic!("expected completed turn");
        };
        assert_eq!(message.content, "Hi there");
        assert_eq!(conversation.message_count(), 2);
        assert_eq!(conversation.messages[1].content, "Hi there");

        let persisted = fx
            .repository
            .load_one(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.message_count(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_discards_partial_output() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Ok(vec![delta_chunk("Hi"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        let conversation_id = conversation.id.clone();
        let controller = fx.controller.clone();
        *fx.transport.mid_stream_hook.lock() = Some(Box::new(move || {
            controller.cancel(&conversation_id);
        }));

        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        // only the user message survives
        assert_eq!(conversation.message_count(), 1);
        assert!(fx.overlay.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_control_code_raises_overlay_without_message() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Err(TransportError::Control(ControlErrorCode::WrongKey)));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            TurnOutcome::ControlHandled(ControlErrorCode::WrongKey)
        ));
        assert_eq!(conversation.message_count(), 1);

        let events = fx.overlay.events.lock();
        assert_eq!(events.len(), 1);
        let OverlayEvent::Error(overlay) = &events[0] else {
            panic!("expected error overlay");
        };
        assert_eq!(overlay.title, "Invalid API key");
    }

    #[tokio::test]
    async fn test_in_stream_control_code_short_circuits() {
        let fx = plain_fixture();
        fx.transport.push_stream(Ok(vec![
            delta_chunk("partial"),
            b"data: {\"error\":{\"message\":\"show_limit_reached\"}}\n\n".to_vec(),
        ]));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            TurnOutcome::ControlHandled(ControlErrorCode::LimitReached)
        ));
        // partial buffer discarded, no assistant message
        assert_eq!(conversation.message_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_appends_fallback_notice() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Err(TransportError::Network("connection refused".into())));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(conversation.message_count(), 2);
        let notice = &conversation.messages[1];
        assert!(notice.is_error);
        assert_eq!(notice.content, FALLBACK_ERROR_TEXT);
        assert!(fx.overlay.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_only_stream_is_discarded() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Ok(vec![delta_chunk("  \n"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Empty));
        assert_eq!(conversation.message_count(), 1);
    }

    fn safe_search_fixture() -> Fixture {
        let mut endpoint = ModelEndpoint::new("ep", "test-model", "http://localhost:9999");
        endpoint.web_search = WebSearchSupport::Safe;
        let settings = ClientSettings {
            web_search_enabled: true,
            ..ClientSettings::default()
        };
        fixture(settings, endpoint)
    }

    #[tokio::test]
    async fn test_empty_keyword_falls_back_to_direct_turn() {
        let fx = safe_search_fixture();
        fx.transport.push_completion(Ok("".to_string()));
        fx.transport
            .push_stream(Ok(vec![delta_chunk("Direct"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        let outcome = fx
            .controller
            .send(&mut conversation, "weather today?", Vec::new(), Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(_)));

        // keyword request then the direct main request, no search call
        let requests = fx.transport.requests();
        assert_eq!(requests.len(), 2);
        let main = requests.last().unwrap();
        assert_eq!(wire_text(main.messages.last().unwrap()), "weather today?");
        assert!(fx.backend.queries.lock().is_empty());
        assert!(conversation.messages[0].search_results.is_none());
    }

    #[tokio::test]
    async fn test_search_augments_wire_content_only() {
        let fx = safe_search_fixture();
        fx.transport.push_completion(Ok("weather berlin".to_string()));
        *fx.backend.response.lock() = Some(Ok(SearchResponse {
            success: true,
            content: "Sunny, 24C".to_string(),
            serp: Vec::new(),
        }));
        fx.transport
            .push_stream(Ok(vec![delta_chunk("It is sunny."), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        fx.controller
            .send(&mut conversation, "weather today?", Vec::new(), Vec::new())
            .await
            .unwrap();

        let requests = fx.transport.requests();
        let main = requests.last().unwrap();
        let outgoing = wire_text(
            main.messages
                .iter()
                .filter(|m| m.role == "user")
                .next_back()
                .unwrap(),
        );
        assert!(outgoing.starts_with("weather today?\n\n---> Search Results (Up-To-Date as of "));
        assert!(outgoing.contains("Sunny, 24C"));

        // stored text untouched; raw results attached for display
        assert_eq!(conversation.messages[0].content, "weather today?");
        let results = conversation.messages[0].search_results.as_ref().unwrap();
        assert_eq!(results.content, "Sunny, 24C");
    }

    #[tokio::test]
    async fn test_mentions_suppress_search_prestep() {
        let fx = safe_search_fixture();
        // no completion scripted: a keyword call would panic
        fx.transport
            .push_stream(Ok(vec![delta_chunk("From the file."), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        let conv_id = conversation.id.clone();
        let file = FileRef::new(&conv_id, "report", "text/plain", "Q3 sales up 5%".to_string());

        let outcome = fx
            .controller
            .send(&mut conversation, "summarize @report", vec![file], Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(fx.transport.requests().len(), 1);

        // attachment blob landed in the store under its composite key
        let key = format!("{}_file_report", conv_id);
        assert!(fx.store.contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_native_endpoint_sends_request_type() {
        let mut endpoint = ModelEndpoint::new("ep", "test-model", "http://localhost:9999");
        endpoint.web_search = WebSearchSupport::Native;
        let settings = ClientSettings {
            web_search_enabled: true,
            ..ClientSettings::default()
        };
        let fx = fixture(settings, endpoint);
        fx.transport
            .push_stream(Ok(vec![delta_chunk("ok"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        fx.controller
            .send(&mut conversation, "hello", Vec::new(), Vec::new())
            .await
            .unwrap();

        let requests = fx.transport.requests();
        assert_eq!(requests[0].request_type, Some(RequestType::WebOn));
        // native endpoints never run the two-call sub-protocol
        assert!(fx.backend.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_assistant_edit_runs_no_turn() {
        let fx = plain_fixture();

        let mut conversation = Conversation::new("Chat");
        conversation.push_message(Message::user("question"));
        conversation.push_message(Message::assistant("answer"));
        let target = conversation.messages[1].id.clone();

        let outcome = fx
            .controller
            .edit(&mut conversation, &target, "answer, polished")
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Noop));
        assert_eq!(conversation.messages[1].content, "answer, polished");
        assert!(fx.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_user_edit_truncates_and_resubmits() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Ok(vec![delta_chunk("New answer"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        conversation.push_message(Message::user("question"));
        conversation.push_message(Message::assistant("stale answer"));
        let target = conversation.messages[0].id.clone();

        let outcome = fx
            .controller
            .edit(&mut conversation, &target, "question, edited")
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(conversation.message_count(), 2);
        assert_eq!(conversation.messages[0].content, "question, edited");
        assert_eq!(conversation.messages[1].content, "New answer");

        let requests = fx.transport.requests();
        assert_eq!(wire_text(&requests[0].messages[0]), "question, edited");
    }

    #[tokio::test]
    async fn test_retry_regenerates_from_user_message() {
        let fx = plain_fixture();
        fx.transport
            .push_stream(Ok(vec![delta_chunk("Second try"), done_chunk()]));

        let mut conversation = Conversation::new("Chat");
        conversation.push_message(Message::user("question"));
        conversation.push_message(Message::assistant("first try"));
        let target = conversation.messages[1].id.clone();

        let outcome = fx
            .controller
            .retry(&mut conversation, &target)
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(conversation.message_count(), 2);
        assert_eq!(conversation.messages[1].content, "Second try");
    }

    #[tokio::test]
    async fn test_retry_without_user_message_is_noop() {
        let fx = plain_fixture();

        let mut conversation = Conversation::new("Chat");
        conversation.push_message(Message::assistant("unsolicited"));
        let target = conversation.messages[0].id.clone();

        let outcome = fx
            .controller
            .retry(&mut conversation, &target)
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Noop));
        assert!(fx.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_split_persists_fork_and_keeps_original() {
        let fx = plain_fixture();

        let mut conversation = Conversation::new("Source");
        conversation.push_message(Message::user("question"));
        conversation.push_message(Message::assistant("answer"));
        conversation.push_message(Message::user("follow-up"));
        let target = conversation.messages[1].id.clone();

        let forked = fx
            .controller
            .split(&conversation, &target, "Forked")
            .await
            .unwrap();

        assert_eq!(forked.messages.len(), 2);
        assert_eq!(conversation.messages.len(), 3);
        assert!(
            fx.repository
                .load_one(&forked.id)
                .await
                .unwrap()
                .is_some()
        );
    }
}
