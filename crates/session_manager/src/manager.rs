//! Session manager service - the single owner of conversation state.
//!
//! All mutations of [`SessionState`] are serialized through one event queue
//! processed by a single actor task: commands from the UI, and signals from
//! spawned stream-consumer tasks. Each event is handled to completion before
//! the next is applied, so the message list never sees concurrent mutation
//! even though the underlying I/O suspends freely.

use std::sync::Arc;

use backend_client::{
    AttachmentUpload, ChatBackend, OpenStream, StreamEvent, TransportError, TransportResult,
};
use chat_core::{
    now_millis, AttachmentSource, ConversationSummary, Message, MessageIdGenerator, SessionConfig,
};
use futures_util::StreamExt;
use log::{debug, info, warn};
use message_store::MessageStore;
use rule_engine::RuleResponder;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};
use crate::machine::TurnEvent;
use crate::structs::{SessionState, StreamChannel};

/// Global cap on concurrently open streaming connections, shared by the text
/// and attachment channels.
pub const MAX_ACTIVE_STREAMS: u32 = 2;

/// Terminal replies written into the placeholder exactly as a normal reply
/// would be, so the UI keeps a single rendering path.
pub const AUTH_FAILURE_REPLY: &str = "认证失败，请重新登录";
pub const RATE_LIMIT_REPLY: &str = "并发过多，请稍后";
pub const FORBIDDEN_REPLY: &str = "无权限访问该会话";
pub const ATTACHMENT_REJECTED_REPLY: &str = "图片不符合要求（类型或大小）";
pub const ATTACHMENT_UNREADABLE_REPLY: &str = "无法读取图片";
pub const ATTACHMENT_FAILURE_REPLY: &str = "图片发送失败";

/// Content of the user message marking an attachment turn.
pub const ATTACHMENT_MARKER: &str = "[图片]";

enum Command {
    SendMessage { content: String },
    SendAttachment { uri: String },
    ClearConversation,
    OpenConversation { id: i64 },
    LoadMoreMessages,
    RefreshConversations,
    LoadMoreConversations,
    FetchModels,
    SetModel { name: String },
}

enum Query {
    ActiveStreams(oneshot::Sender<u32>),
    ConversationId(oneshot::Sender<i64>),
}

/// Outcome of one step of a stream-consumer task, tagged with the stream id
/// so the actor can discard signals from superseded streams.
enum SignalKind {
    Opened,
    Fragment(String),
    Forbidden,
    Ended,
    ConnectFailed(TransportError),
}

struct Signal {
    stream_id: u64,
    channel: StreamChannel,
    kind: SignalKind,
}

enum Event {
    Command {
        command: Command,
        done: oneshot::Sender<()>,
    },
    Signal(Signal),
    Query(Query),
}

enum StreamRequest {
    Text {
        conversation_id: i64,
        prompt: String,
        model: String,
    },
    Attachment {
        conversation_id: i64,
        model: String,
        upload: AttachmentUpload,
    },
}

/// One live stream as tracked by the actor. The token is created before the
/// request is issued so a supersede can cancel a stream that has not
/// connected yet; `counted` mirrors whether the stream's 2xx body is being
/// consumed and therefore occupies a slot under [`MAX_ACTIVE_STREAMS`].
struct ActiveStream {
    id: u64,
    token: CancellationToken,
    counted: bool,
    placeholder_id: String,
    /// Original user input, kept for the rule-responder fallback. `None` on
    /// the attachment channel.
    original_input: Option<String>,
}

/// Handle to a running session actor.
///
/// Commands are async and acknowledged once the actor has applied their
/// state mutation; observable state is exposed as watch channels for the
/// external UI to subscribe to.
pub struct SessionManager {
    events: mpsc::UnboundedSender<Event>,
    messages_rx: watch::Receiver<Vec<Message>>,
    loading_rx: watch::Receiver<bool>,
    model_rx: watch::Receiver<String>,
    conversations_rx: watch::Receiver<Vec<ConversationSummary>>,
    models_rx: watch::Receiver<Vec<String>>,
}

impl SessionManager {
    /// Start the actor and perform first activation: cached history if the
    /// store has any for the fresh conversation, a welcome message
    /// otherwise. Returns once the initial state is observable.
    pub async fn spawn(
        config: SessionConfig,
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn MessageStore>,
        attachments: Arc<dyn AttachmentSource>,
        responder: RuleResponder,
    ) -> Self {
        let conversation_id = now_millis();
        let (messages_tx, messages_rx) = watch::channel(Vec::new());
        let (loading_tx, loading_rx) = watch::channel(false);
        let (model_tx, model_rx) = watch::channel(config.default_model.clone());
        let (conversations_tx, conversations_rx) = watch::channel(Vec::new());
        let (models_tx, models_rx) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut actor = SessionActor {
            state: SessionState::new(conversation_id, config.default_model.clone()),
            config,
            backend,
            store,
            attachments,
            responder,
            ids: MessageIdGenerator::new(),
            text_stream: None,
            attachment_stream: None,
            next_stream_id: 1,
            events: events_tx.downgrade(),
            messages_tx,
            loading_tx,
            model_tx,
            conversations_tx,
            models_tx,
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            actor.start_conversation().await;
            let _ = ready_tx.send(());
            actor.run(events_rx).await;
        });
        let _ = ready_rx.await;

        Self {
            events: events_tx,
            messages_rx,
            loading_rx,
            model_rx,
            conversations_rx,
            models_rx,
        }
    }

    // ========== Commands ==========

    /// Start a text turn. No-op when the input is blank or a text turn is
    /// already in flight. Returns once the turn is initiated (user message
    /// and placeholder appended, request spawned), not when the reply is
    /// complete.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<()> {
        self.command(Command::SendMessage {
            content: content.into(),
        })
        .await
    }

    /// Start an attachment turn. Validation happens before any network I/O.
    pub async fn send_attachment(&self, uri: impl Into<String>) -> Result<()> {
        self.command(Command::SendAttachment { uri: uri.into() }).await
    }

    /// Cancel the in-flight text stream, mint a fresh conversation and
    /// re-seed it with the welcome message. The old conversation's rows are
    /// cleared from the store.
    pub async fn clear_conversation(&self) -> Result<()> {
        self.command(Command::ClearConversation).await
    }

    /// Switch to a conversation, preferring remote history and falling back
    /// to the local store.
    pub async fn open_conversation(&self, id: i64) -> Result<()> {
        self.command(Command::OpenConversation { id }).await
    }

    /// Prepend the next page of history. No-op once the listing is
    /// exhausted.
    pub async fn load_more_messages(&self) -> Result<()> {
        self.command(Command::LoadMoreMessages).await
    }

    /// Reload the first page of the conversation list.
    pub async fn refresh_conversations(&self) -> Result<()> {
        self.command(Command::RefreshConversations).await
    }

    /// Append the next page of the conversation list.
    pub async fn load_more_conversations(&self) -> Result<()> {
        self.command(Command::LoadMoreConversations).await
    }

    /// Refresh the model list, falling back to the built-in names.
    pub async fn fetch_models(&self) -> Result<()> {
        self.command(Command::FetchModels).await
    }

    pub async fn set_model(&self, name: impl Into<String>) -> Result<()> {
        self.command(Command::SetModel { name: name.into() }).await
    }

    // ========== Observable state ==========

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_rx.clone()
    }

    pub fn is_loading(&self) -> watch::Receiver<bool> {
        self.loading_rx.clone()
    }

    pub fn model(&self) -> watch::Receiver<String> {
        self.model_rx.clone()
    }

    pub fn conversations(&self) -> watch::Receiver<Vec<ConversationSummary>> {
        self.conversations_rx.clone()
    }

    pub fn models(&self) -> watch::Receiver<Vec<String>> {
        self.models_rx.clone()
    }

    // ========== Introspection ==========

    /// Streams whose response body is currently being consumed.
    pub async fn active_streams(&self) -> Result<u32> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(Event::Query(Query::ActiveStreams(reply_tx)))
            .map_err(|_| SessionError::ActorGone)?;
        reply_rx.await.map_err(|_| SessionError::ActorGone)
    }

    pub async fn conversation_id(&self) -> Result<i64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(Event::Query(Query::ConversationId(reply_tx)))
            .map_err(|_| SessionError::ActorGone)?;
        reply_rx.await.map_err(|_| SessionError::ActorGone)
    }

    async fn command(&self, command: Command) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.events
            .send(Event::Command {
                command,
                done: done_tx,
            })
            .map_err(|_| SessionError::ActorGone)?;
        done_rx.await.map_err(|_| SessionError::ActorGone)
    }
}

struct SessionActor {
    config: SessionConfig,
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn MessageStore>,
    attachments: Arc<dyn AttachmentSource>,
    responder: RuleResponder,
    ids: MessageIdGenerator,
    state: SessionState,
    text_stream: Option<ActiveStream>,
    attachment_stream: Option<ActiveStream>,
    next_stream_id: u64,
    /// Weak so the actor's own sender does not keep the queue alive after
    /// the [`SessionManager`] handle is dropped.
    events: mpsc::WeakUnboundedSender<Event>,
    messages_tx: watch::Sender<Vec<Message>>,
    loading_tx: watch::Sender<bool>,
    model_tx: watch::Sender<String>,
    conversations_tx: watch::Sender<Vec<ConversationSummary>>,
    models_tx: watch::Sender<Vec<String>>,
}

impl SessionActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Command { command, done } => {
                    self.handle_command(command).await;
                    let _ = done.send(());
                }
                Event::Signal(signal) => self.handle_signal(signal),
                Event::Query(query) => self.handle_query(query),
            }
        }
        debug!("session actor for conversation {} stopped", self.state.conversation_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { content } => self.handle_send_message(content),
            Command::SendAttachment { uri } => self.handle_send_attachment(uri).await,
            Command::ClearConversation => self.handle_clear_conversation(),
            Command::OpenConversation { id } => self.handle_open_conversation(id).await,
            Command::LoadMoreMessages => self.handle_load_more_messages().await,
            Command::RefreshConversations => self.handle_refresh_conversations().await,
            Command::LoadMoreConversations => self.handle_load_more_conversations().await,
            Command::FetchModels => self.handle_fetch_models().await,
            Command::SetModel { name } => {
                self.state.model = name;
                let _ = self.model_tx.send(self.state.model.clone());
            }
        }
    }

    fn handle_query(&self, query: Query) {
        match query {
            Query::ActiveStreams(reply) => {
                let _ = reply.send(self.state.active_streams);
            }
            Query::ConversationId(reply) => {
                let _ = reply.send(self.state.conversation_id);
            }
        }
    }

    // ========== Conversation lifecycle ==========

    /// First activation: cached rows win, otherwise seed the welcome
    /// message. A store failure degrades to the empty case.
    async fn start_conversation(&mut self) {
        let loaded = match self.store.read_range(self.state.conversation_id).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!("initial history load failed, starting empty: {err}");
                Vec::new()
            }
        };
        if loaded.is_empty() {
            self.seed_welcome();
        } else {
            self.state.messages = loaded;
            self.publish_messages();
        }
    }

    fn seed_welcome(&mut self) {
        let welcome = Message::assistant(
            self.ids.next_id(),
            self.responder.welcome(),
            self.state.conversation_id,
        );
        self.push_message(welcome);
    }

    fn handle_clear_conversation(&mut self) {
        self.cancel_stream(StreamChannel::Text);

        let old_id = self.state.conversation_id;
        let mut fresh = now_millis();
        if fresh <= old_id {
            // Cleared within the same millisecond; keep ids strictly increasing.
            fresh = old_id + 1;
        }
        self.state.conversation_id = fresh;
        self.state.messages.clear();
        self.state.message_cursor.reset();

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.clear(old_id).await {
                warn!("failed to clear conversation {old_id}: {err}");
            }
        });

        self.seed_welcome();
        info!("conversation {old_id} cleared, now on {fresh}");
    }

    async fn handle_open_conversation(&mut self, id: i64) {
        self.cancel_stream(StreamChannel::Text);
        self.cancel_stream(StreamChannel::Attachment);

        self.state.conversation_id = id;
        self.state.message_cursor.reset();

        let size = self.config.message_page_size;
        let loaded = match self.backend.fetch_messages(id, 0, size).await {
            Ok(remote) if !remote.is_empty() => remote,
            Ok(_) => {
                debug!("conversation {id} empty on the backend, using local history");
                self.local_history(id).await
            }
            Err(err) => {
                warn!("remote history fetch failed for {id}: {err}");
                self.local_history(id).await
            }
        };
        self.state.message_cursor.has_more = !loaded.is_empty();
        self.state.messages = loaded;
        self.publish_messages();
    }

    async fn handle_load_more_messages(&mut self) {
        if !self.state.message_cursor.has_more {
            return;
        }
        let next = self.state.message_cursor.page + 1;
        let size = self.config.message_page_size;
        let conversation_id = self.state.conversation_id;
        match self.backend.fetch_messages(conversation_id, next, size).await {
            Ok(more) if !more.is_empty() => {
                let mut merged = more;
                merged.append(&mut self.state.messages);
                self.state.messages = merged;
                self.state.message_cursor.page = next;
                self.publish_messages();
            }
            Ok(_) => {
                self.state.message_cursor.has_more = false;
            }
            Err(err) => {
                warn!("message page {next} fetch failed: {err}");
                self.state.message_cursor.has_more = false;
            }
        }
    }

    async fn handle_refresh_conversations(&mut self) {
        self.state.conversation_cursor.reset();
        let size = self.config.conversation_page_size;
        let list = match self.backend.fetch_conversations(0, size).await {
            Ok(remote) if !remote.is_empty() => remote,
            Ok(_) => self.local_summaries().await,
            Err(err) => {
                warn!("conversation list fetch failed: {err}");
                self.local_summaries().await
            }
        };
        self.state.conversation_cursor.has_more = !list.is_empty();
        self.state.conversations = list;
        let _ = self.conversations_tx.send(self.state.conversations.clone());
    }

    async fn handle_load_more_conversations(&mut self) {
        if !self.state.conversation_cursor.has_more {
            return;
        }
        let next = self.state.conversation_cursor.page + 1;
        let size = self.config.conversation_page_size;
        match self.backend.fetch_conversations(next, size).await {
            Ok(more) if !more.is_empty() => {
                self.state.conversations.extend(more);
                self.state.conversation_cursor.page = next;
                let _ = self.conversations_tx.send(self.state.conversations.clone());
            }
            Ok(_) => {
                self.state.conversation_cursor.has_more = false;
            }
            Err(err) => {
                warn!("conversation page {next} fetch failed: {err}");
                self.state.conversation_cursor.has_more = false;
            }
        }
    }

    async fn handle_fetch_models(&mut self) {
        let fetched = match self.backend.fetch_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!("model list fetch failed: {err}");
                Vec::new()
            }
        };
        self.state.models = if fetched.is_empty() {
            self.config.fallback_models.clone()
        } else {
            fetched
        };
        let _ = self.models_tx.send(self.state.models.clone());
    }

    async fn local_history(&self, conversation_id: i64) -> Vec<Message> {
        match self.store.read_range(conversation_id).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!("local history read failed for {conversation_id}: {err}");
                Vec::new()
            }
        }
    }

    async fn local_summaries(&self) -> Vec<ConversationSummary> {
        match self.store.summaries().await {
            Ok(summaries) => summaries,
            Err(err) => {
                warn!("local summary read failed: {err}");
                Vec::new()
            }
        }
    }

    // ========== Message send ==========

    fn handle_send_message(&mut self, content: String) {
        if content.trim().is_empty() || self.state.is_loading {
            debug!("send rejected: blank input or turn already in flight");
            return;
        }

        let conversation_id = self.state.conversation_id;
        let user = Message::user(self.ids.next_id(), content.clone(), conversation_id);
        self.push_message(user);

        let placeholder = Message::placeholder(self.ids.next_id(), conversation_id);
        let placeholder_id = placeholder.id.clone();
        self.push_message(placeholder);

        // Admission: at most one text stream, at most two streams overall.
        self.cancel_stream(StreamChannel::Text);
        self.enforce_stream_cap();

        self.set_loading(true);
        self.state.turn.handle_event(TurnEvent::TurnStarted);

        let model = self.state.model.clone();
        let (stream_id, token) =
            self.register_stream(StreamChannel::Text, placeholder_id, Some(content.clone()));
        self.spawn_stream_task(
            StreamChannel::Text,
            stream_id,
            token,
            StreamRequest::Text {
                conversation_id,
                prompt: content,
                model,
            },
        );
    }

    // ========== Attachment send ==========

    async fn handle_send_attachment(&mut self, uri: String) {
        let conversation_id = self.state.conversation_id;
        let user = Message::user(self.ids.next_id(), ATTACHMENT_MARKER, conversation_id)
            .with_attachment(uri.clone());
        self.push_message(user);

        let placeholder = Message::placeholder(self.ids.next_id(), conversation_id);
        let placeholder_id = placeholder.id.clone();
        self.push_message(placeholder);

        let media_type = self.attachments.media_type(&uri).await;
        let size = self.attachments.size(&uri).await.unwrap_or(0);
        if let Err(err) = self
            .config
            .attachment_policy
            .check(media_type.as_deref(), size)
        {
            info!("attachment rejected before send: {err}");
            self.set_message_content(&placeholder_id, ATTACHMENT_REJECTED_REPLY);
            return;
        }
        let bytes = match self.attachments.bytes(&uri).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("attachment {uri} unreadable: {err}");
                self.set_message_content(&placeholder_id, ATTACHMENT_UNREADABLE_REPLY);
                return;
            }
        };

        self.cancel_stream(StreamChannel::Attachment);
        self.enforce_stream_cap();

        let upload = AttachmentUpload {
            file_name: "image.jpg".to_string(),
            media_type: media_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            bytes,
        };
        let model = self.state.model.clone();
        let (stream_id, token) =
            self.register_stream(StreamChannel::Attachment, placeholder_id, None);
        self.spawn_stream_task(
            StreamChannel::Attachment,
            stream_id,
            token,
            StreamRequest::Attachment {
                conversation_id,
                model,
                upload,
            },
        );
    }

    // ========== Stream bookkeeping ==========

    fn slot_mut(&mut self, channel: StreamChannel) -> &mut Option<ActiveStream> {
        match channel {
            StreamChannel::Text => &mut self.text_stream,
            StreamChannel::Attachment => &mut self.attachment_stream,
        }
    }

    fn register_stream(
        &mut self,
        channel: StreamChannel,
        placeholder_id: String,
        original_input: Option<String>,
    ) -> (u64, CancellationToken) {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        let token = CancellationToken::new();
        *self.slot_mut(channel) = Some(ActiveStream {
            id,
            token: token.clone(),
            counted: false,
            placeholder_id,
            original_input,
        });
        (id, token)
    }

    /// Cancel and forget the channel's live stream, if any. Un-counts it
    /// immediately so admission sees the freed slot; the consumer task stops
    /// on its own and any signal it already queued is discarded by id.
    fn cancel_stream(&mut self, channel: StreamChannel) {
        if let Some(entry) = self.slot_mut(channel).take() {
            debug!("cancelling {channel:?} stream {}", entry.id);
            entry.token.cancel();
            if entry.counted {
                self.state.active_streams = self.state.active_streams.saturating_sub(1);
            }
            if channel == StreamChannel::Text {
                self.state.turn.handle_event(TurnEvent::Cancelled);
                self.set_loading(false);
            }
        }
    }

    /// Keep open connections bounded: when both slots are occupied under the
    /// cap, the oldest live stream (lowest id, either channel) is cancelled
    /// before a new request is issued.
    fn enforce_stream_cap(&mut self) {
        if self.state.active_streams < MAX_ACTIVE_STREAMS {
            return;
        }
        let text_id = self.text_stream.as_ref().map(|entry| entry.id);
        let attachment_id = self.attachment_stream.as_ref().map(|entry| entry.id);
        let oldest = match (text_id, attachment_id) {
            (Some(text), Some(attachment)) => {
                if text < attachment {
                    StreamChannel::Text
                } else {
                    StreamChannel::Attachment
                }
            }
            (Some(_), None) => StreamChannel::Text,
            (None, Some(_)) => StreamChannel::Attachment,
            (None, None) => return,
        };
        info!("stream cap reached, cancelling oldest {oldest:?} stream");
        self.cancel_stream(oldest);
    }

    fn spawn_stream_task(
        &self,
        channel: StreamChannel,
        stream_id: u64,
        token: CancellationToken,
        request: StreamRequest,
    ) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("stream {stream_id} superseded before the request was issued");
                    return;
                }
                opened = open_request(backend.as_ref(), request) => opened,
            };

            let open = match opened {
                Ok(open) => open,
                Err(error) => {
                    send_signal(&events, stream_id, channel, SignalKind::ConnectFailed(error));
                    return;
                }
            };

            send_signal(&events, stream_id, channel, SignalKind::Opened);
            consume_stream(open, &events, stream_id, channel, token).await;
        });
    }

    // ========== Stream signals ==========

    fn handle_signal(&mut self, signal: Signal) {
        let Signal {
            stream_id,
            channel,
            kind,
        } = signal;

        let is_current = match channel {
            StreamChannel::Text => self.text_stream.as_ref(),
            StreamChannel::Attachment => self.attachment_stream.as_ref(),
        }
        .is_some_and(|entry| entry.id == stream_id);
        if !is_current {
            debug!("ignoring signal from superseded {channel:?} stream {stream_id}");
            return;
        }

        match kind {
            SignalKind::Opened => self.on_stream_opened(channel),
            SignalKind::Fragment(text) => self.on_stream_fragment(channel, &text),
            SignalKind::Forbidden => self.on_stream_forbidden(channel),
            SignalKind::Ended => self.on_stream_ended(channel),
            SignalKind::ConnectFailed(error) => self.on_connect_failed(channel, error),
        }
    }

    fn on_stream_opened(&mut self, channel: StreamChannel) {
        if let Some(entry) = self.slot_mut(channel).as_mut() {
            entry.counted = true;
        }
        self.state.active_streams += 1;
        if channel == StreamChannel::Text {
            self.state.turn.handle_event(TurnEvent::StreamOpened);
        }
    }

    fn on_stream_fragment(&mut self, channel: StreamChannel, fragment: &str) {
        let Some(placeholder_id) = self
            .slot_mut(channel)
            .as_ref()
            .map(|entry| entry.placeholder_id.clone())
        else {
            return;
        };
        self.append_message_content(&placeholder_id, fragment);
    }

    fn on_stream_forbidden(&mut self, channel: StreamChannel) {
        if let Some(entry) = self.slot_mut(channel).take() {
            if entry.counted {
                self.state.active_streams = self.state.active_streams.saturating_sub(1);
            }
            self.set_message_content(&entry.placeholder_id, FORBIDDEN_REPLY);
            if channel == StreamChannel::Text {
                self.state.turn.handle_event(TurnEvent::PermissionDenied);
                self.set_loading(false);
            }
        }
    }

    fn on_stream_ended(&mut self, channel: StreamChannel) {
        if let Some(entry) = self.slot_mut(channel).take() {
            debug!("{channel:?} stream {} ended", entry.id);
            if entry.counted {
                self.state.active_streams = self.state.active_streams.saturating_sub(1);
            }
            if channel == StreamChannel::Text {
                self.state.turn.handle_event(TurnEvent::StreamCompleted);
                self.set_loading(false);
            }
        }
    }

    fn on_connect_failed(&mut self, channel: StreamChannel, error: TransportError) {
        let Some(entry) = self.slot_mut(channel).take() else {
            return;
        };
        warn!("{channel:?} stream {} failed to open: {error}", entry.id);

        let reply = match (&error, channel) {
            (TransportError::Unauthorized, _) => AUTH_FAILURE_REPLY.to_string(),
            (TransportError::RateLimited, _) => RATE_LIMIT_REPLY.to_string(),
            (_, StreamChannel::Text) => self
                .responder
                .reply(entry.original_input.as_deref().unwrap_or_default()),
            (_, StreamChannel::Attachment) => ATTACHMENT_FAILURE_REPLY.to_string(),
        };
        self.set_message_content(&entry.placeholder_id, &reply);

        if channel == StreamChannel::Text {
            let event = match error {
                TransportError::Unauthorized => TurnEvent::AuthRejected,
                TransportError::RateLimited => TurnEvent::RateLimited,
                _ => TurnEvent::TransportFailed,
            };
            self.state.turn.handle_event(event);
            self.set_loading(false);
        }
    }

    // ========== State mutation helpers ==========

    fn set_loading(&mut self, loading: bool) {
        if self.state.is_loading != loading {
            self.state.is_loading = loading;
            let _ = self.loading_tx.send(loading);
        }
    }

    /// Append to state and write through to the store. Persistence is
    /// fire-and-forget: the in-memory list is the source of truth and a
    /// store failure only gets logged.
    fn push_message(&mut self, message: Message) {
        let store = Arc::clone(&self.store);
        let persisted = message.clone();
        tokio::spawn(async move {
            if let Err(err) = store.append(&persisted).await {
                warn!("failed to persist message {}: {err}", persisted.id);
            }
        });
        self.state.messages.push(message);
        self.publish_messages();
    }

    /// Replace one message's content by id.
    fn set_message_content(&mut self, id: &str, content: &str) {
        let Some(message) = self.state.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        message.content = content.to_string();
        self.persist_content(id.to_string(), content.to_string());
        self.publish_messages();
    }

    /// Grow one message's content by id, preserving fragment arrival order.
    fn append_message_content(&mut self, id: &str, fragment: &str) {
        let Some(message) = self.state.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        message.content.push_str(fragment);
        let full = message.content.clone();
        self.persist_content(id.to_string(), full);
        self.publish_messages();
    }

    fn persist_content(&self, id: String, content: String) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.update_content(&id, &content).await {
                warn!("failed to persist content for {id}: {err}");
            }
        });
    }

    fn publish_messages(&self) {
        let _ = self.messages_tx.send(self.state.messages.clone());
    }
}

async fn open_request(
    backend: &dyn ChatBackend,
    request: StreamRequest,
) -> TransportResult<OpenStream> {
    match request {
        StreamRequest::Text {
            conversation_id,
            prompt,
            model,
        } => backend.open_text_stream(conversation_id, &prompt, &model).await,
        StreamRequest::Attachment {
            conversation_id,
            model,
            upload,
        } => {
            backend
                .open_attachment_stream(conversation_id, &model, upload)
                .await
        }
    }
}

/// Forward decoded events into the actor queue until the stream ends or the
/// token fires. A cancelled task stops without a terminal signal; the actor
/// already un-counted the stream when it cancelled the token.
async fn consume_stream(
    open: OpenStream,
    events: &mpsc::WeakUnboundedSender<Event>,
    stream_id: u64,
    channel: StreamChannel,
    token: CancellationToken,
) {
    let OpenStream {
        handle,
        events: mut events_stream,
    } = open;
    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => {
                handle.cancel();
                debug!("stream {stream_id} cancelled");
                return;
            }
            item = events_stream.next() => item,
        };
        match item {
            Some(Ok(StreamEvent::Fragment(text))) => {
                send_signal(events, stream_id, channel, SignalKind::Fragment(text));
            }
            Some(Ok(StreamEvent::Forbidden)) => {
                send_signal(events, stream_id, channel, SignalKind::Forbidden);
                return;
            }
            Some(Ok(StreamEvent::Done)) | None => {
                send_signal(events, stream_id, channel, SignalKind::Ended);
                return;
            }
            Some(Err(err)) => {
                // Mid-stream read error: keep whatever arrived and end the turn.
                warn!("stream {stream_id} errored mid-flight: {err}");
                send_signal(events, stream_id, channel, SignalKind::Ended);
                return;
            }
        }
    }
}

fn send_signal(
    events: &mpsc::WeakUnboundedSender<Event>,
    stream_id: u64,
    channel: StreamChannel,
    kind: SignalKind,
) {
    if let Some(events) = events.upgrade() {
        let _ = events.send(Event::Signal(Signal {
            stream_id,
            channel,
            kind,
        }));
    }
}
