//! The chat session: owns the open conversation and wires history, the
//! connection, the reconciler, typing timers and the cache together.

use std::sync::{Arc, Weak};

use anyhow::Context;
use chrono::Utc;
use shared::{
    domain::{ChatId, ChatSummary, Message, MessageId, Participant, UserId},
    protocol::{ClientFrame, SendMessageRequest, ServerFrame, WireMessage},
};
use storage::Storage;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    api::{get_or_create_chat, HistoryPages, HttpLiveChatApi, LiveChatApi, RetryPolicy},
    cache::{ConversationCache, NoopCache},
    config::{ClientSettings, SendVia},
    connection::{
        chat_endpoint, ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState,
        ReconnectPolicy,
    },
    error::{ClientError, UserNotice, TERMINAL_WARNING},
    presence::{PresenceSurface, PresenceView},
    reconciler::{ConfirmOutcome, EditOutcome, MessageReconciler, ReconcileOutcome},
    timers::TimerScope,
    transport::{Connector, WsConnector},
    typing::{TypingController, TypingSignal},
    types::{ChatEvent, ChatIdentity},
};

const EVENT_CAPACITY: usize = 256;
const TYPING_STOP_TIMER: &str = "typing-stop";
const TYPING_EXPIRY_TIMER: &str = "typing-expiry";

fn echo_timer(temp_id: &MessageId) -> String {
    format!("send-echo:{temp_id}")
}

#[derive(Debug, Clone)]
enum TimerAction {
    TypingStop,
    TypingExpiry,
    /// A socket send saw no `message_sent` echo in time.
    SendEcho(MessageId),
}

struct ChatState {
    chat_id: Option<ChatId>,
    generation: u64,
    reconciler: MessageReconciler,
    typing: TypingController,
    presence: PresenceSurface,
    connection: ConnectionState,
    last_presence: Option<PresenceView>,
}

struct ActiveConversation {
    chat_id: ChatId,
    generation: u64,
    connection: Option<ConnectionManager>,
    pump: Option<JoinHandle<()>>,
    timers: TimerScope,
}

impl Drop for ActiveConversation {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

pub struct ChatClient {
    api: Arc<dyn LiveChatApi>,
    connector: Arc<dyn Connector>,
    cache: Arc<dyn ConversationCache>,
    settings: ClientSettings,
    identity: ChatIdentity,
    inner: Mutex<ChatState>,
    active: Mutex<Option<ActiveConversation>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatClient {
    pub fn new(
        settings: ClientSettings,
        api: Arc<dyn LiveChatApi>,
        connector: Arc<dyn Connector>,
        cache: Arc<dyn ConversationCache>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let identity = settings.identity();
        let inner = ChatState {
            chat_id: None,
            generation: 0,
            reconciler: MessageReconciler::new(settings.timings.dedup_window),
            typing: Self::typing_controller(&settings, &identity),
            presence: PresenceSurface::default(),
            connection: ConnectionState::default(),
            last_presence: None,
        };
        Arc::new(Self {
            api,
            connector,
            cache,
            settings,
            identity,
            inner: Mutex::new(inner),
            active: Mutex::new(None),
            events,
        })
    }

    /// Production wiring: reqwest, tokio-tungstenite and the SQLite cache
    /// when one is configured.
    pub async fn from_settings(settings: ClientSettings) -> anyhow::Result<Arc<Self>> {
        let api = HttpLiveChatApi::new(&settings.rest_base()?, settings.auth_token.clone());
        let cache: Arc<dyn ConversationCache> = match settings.cache_database_url.as_deref() {
            Some(url) => Arc::new(
                Storage::new(url)
                    .await
                    .with_context(|| format!("failed to open conversation cache at {url}"))?,
            ),
            None => Arc::new(NoopCache),
        };
        Ok(Self::new(settings, Arc::new(api), Arc::new(WsConnector), cache))
    }

    fn typing_controller(settings: &ClientSettings, identity: &ChatIdentity) -> TypingController {
        TypingController::new(
            identity.user_id,
            settings.timings.typing_debounce,
            settings.timings.typing_expiry,
        )
    }

    pub fn identity(&self) -> &ChatIdentity {
        &self.identity
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn active_chat(&self) -> Option<ChatId> {
        self.inner.lock().await.chat_id
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.reconciler.messages().to_vec()
    }

    pub async fn presence(&self) -> PresenceView {
        let inner = self.inner.lock().await;
        inner.presence.view(&inner.connection)
    }

    pub async fn remote_typing(&self) -> Option<Participant> {
        self.inner.lock().await.typing.remote_typing().cloned()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection.clone()
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        self.api.list_chats().await
    }

    /// Opens the conversation between `student` and `admin`, creating it on
    /// first access.
    pub async fn open_conversation_with(
        self: &Arc<Self>,
        student: UserId,
        admin: UserId,
    ) -> Result<ChatSummary, ClientError> {
        let chat = match get_or_create_chat(self.api.as_ref(), student, admin).await {
            Ok(chat) => chat,
            Err(err) => {
                self.emit(ChatEvent::Notice(UserNotice::for_request_failure(
                    "Failed to open conversation",
                    &err,
                )));
                return Err(err);
            }
        };
        self.open_chat(chat.id).await?;
        Ok(chat)
    }

    /// Switches to `chat_id`: tears the previous conversation down, shows the
    /// cached copy, drains history, then opens the live connection.
    pub async fn open_chat(self: &Arc<Self>, chat_id: ChatId) -> Result<(), ClientError> {
        self.teardown_active().await;

        // lock order is always active, then inner
        let generation = {
            let mut active = self.active.lock().await;
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.chat_id = Some(chat_id);
            inner.reconciler = MessageReconciler::new(self.settings.timings.dedup_window);
            inner.typing = Self::typing_controller(&self.settings, &self.identity);
            inner.presence = PresenceSurface::default();
            inner.connection = ConnectionState::default();
            inner.last_presence = None;
            *active = Some(ActiveConversation {
                chat_id,
                generation: inner.generation,
                connection: None,
                pump: None,
                timers: TimerScope::new(),
            });
            inner.generation
        };
        info!(chat_id = chat_id.0, generation, "chat: opening conversation");

        self.show_cached(chat_id, generation).await;

        let history = match self.drain_history(chat_id, generation).await {
            Ok(Some(history)) => history,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.emit(ChatEvent::Notice(UserNotice::for_request_failure(
                    "Failed to load messages",
                    &err,
                )));
                return Err(err);
            }
        };

        let messages = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Ok(());
            }
            inner.reconciler.load_history(history, Utc::now());
            inner.reconciler.messages().to_vec()
        };
        debug!(chat_id = chat_id.0, count = messages.len(), "chat: history loaded");
        self.emit(ChatEvent::HistoryLoaded {
            chat_id,
            messages: messages.clone(),
        });
        self.persist(chat_id, &messages).await;

        self.connect(chat_id, generation).await
    }

    async fn show_cached(&self, chat_id: ChatId, generation: u64) {
        let cached = match self.cache.load(chat_id).await {
            Ok(Some(cached)) if !cached.is_empty() => cached,
            Ok(_) => return,
            Err(err) => {
                warn!(chat_id = chat_id.0, "chat: cache read failed: {err:#}");
                return;
            }
        };
        let messages = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            inner.reconciler.restore(cached);
            inner.reconciler.messages().to_vec()
        };
        self.emit(ChatEvent::HistoryLoaded { chat_id, messages });
    }

    // None when a newer conversation took over while pages were in flight
    async fn drain_history(
        &self,
        chat_id: ChatId,
        generation: u64,
    ) -> Result<Option<Vec<WireMessage>>, ClientError> {
        let retry = RetryPolicy {
            attempts: self.settings.timings.history_retry_attempts,
            delay: self.settings.timings.history_retry_delay,
        };
        let mut pages = HistoryPages::new(self.api.as_ref(), chat_id, retry);
        let mut history = Vec::new();
        loop {
            let page = pages.page();
            let Some(result) = pages.next_page().await else {
                return Ok(Some(history));
            };
            if !self.is_current(generation).await {
                debug!(chat_id = chat_id.0, page, "chat: discarding stale history page");
                return Ok(None);
            }
            history.extend(result?);
        }
    }

    async fn connect(self: &Arc<Self>, chat_id: ChatId, generation: u64) -> Result<(), ClientError> {
        let base = self
            .settings
            .socket_base()
            .map_err(|err| ClientError::Transport(format!("{err:#}")))?;
        let endpoint = chat_endpoint(&base, chat_id, self.settings.auth_token.as_deref())?;
        let config = ConnectionConfig {
            endpoint,
            identity: self.identity.clone(),
            heartbeat_interval: self.settings.timings.heartbeat_interval,
            policy: ReconnectPolicy {
                delay: self.settings.timings.reconnect_delay,
                max_attempts: self.settings.timings.max_reconnect_attempts,
            },
        };
        let (manager, events) = ConnectionManager::spawn(Arc::clone(&self.connector), config);
        let pump = tokio::spawn(Self::pump(Arc::downgrade(self), generation, events));

        let superseded = {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(current) if current.generation == generation => {
                    current.connection = Some(manager);
                    current.pump = Some(pump);
                    None
                }
                _ => Some((manager, pump)),
            }
        };
        if let Some((manager, pump)) = superseded {
            pump.abort();
            manager.shutdown().await;
        }
        Ok(())
    }

    /// Applies connection events strictly in arrival order.
    async fn pump(
        client: Weak<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(client) = client.upgrade() else {
                break;
            };
            client.handle_connection_event(generation, event).await;
        }
    }

    async fn handle_connection_event(self: &Arc<Self>, generation: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Status(state) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                inner.connection = state;
                self.publish_presence(&mut inner);
            }
            ConnectionEvent::Opened => debug!(generation, "chat: live connection open"),
            ConnectionEvent::Closed { code, reason } => {
                debug!(generation, code, reason = %reason, "chat: live connection closed")
            }
            ConnectionEvent::Error(err) => debug!(generation, "chat: live connection error: {err}"),
            ConnectionEvent::Terminal => {
                if self.is_current(generation).await {
                    self.emit(ChatEvent::Notice(UserNotice::banner(TERMINAL_WARNING)));
                }
            }
            ConnectionEvent::Frame(frame) => self.handle_frame(generation, frame).await,
        }
    }

    async fn handle_frame(self: &Arc<Self>, generation: u64, frame: ServerFrame) {
        match frame {
            ServerFrame::MessageSent { message } => {
                let (chat_id, outcome, snapshot) = {
                    let mut inner = self.inner.lock().await;
                    let Some(chat_id) = inner.chat_id.filter(|_| inner.generation == generation)
                    else {
                        return;
                    };
                    let outcome = inner.reconciler.reconcile_incoming(message, Utc::now());
                    (chat_id, outcome, inner.reconciler.messages().to_vec())
                };
                match outcome {
                    ReconcileOutcome::Appended(message) => {
                        self.emit(ChatEvent::MessageAdded(message));
                    }
                    ReconcileOutcome::Replaced {
                        previous_id,
                        message,
                    } => {
                        self.cancel_timer(generation, &echo_timer(&previous_id)).await;
                        self.emit(ChatEvent::MessageReplaced {
                            previous_id,
                            message,
                        });
                    }
                    ReconcileOutcome::Duplicate | ReconcileOutcome::SuppressedNearDuplicate => {
                        return;
                    }
                }
                self.persist(chat_id, &snapshot).await;
            }
            ServerFrame::MessageEdited { message } => {
                let (chat_id, outcome, snapshot) = {
                    let mut inner = self.inner.lock().await;
                    let Some(chat_id) = inner.chat_id.filter(|_| inner.generation == generation)
                    else {
                        return;
                    };
                    let outcome = inner.reconciler.mark_edited(&message.id, message.content);
                    (chat_id, outcome, inner.reconciler.messages().to_vec())
                };
                if let EditOutcome::Applied(message) = outcome {
                    self.emit(ChatEvent::MessageUpdated(message));
                    self.persist(chat_id, &snapshot).await;
                }
            }
            ServerFrame::TypingStatus { user, is_typing } => {
                let deadline = {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                    if inner.typing.remote_status(user, is_typing, Instant::now()) {
                        let shown = inner.typing.remote_typing().cloned();
                        self.emit(ChatEvent::TypingChanged(shown));
                    }
                    inner.typing.remote_deadline()
                };
                match deadline {
                    Some(deadline) => {
                        self.arm_timer(generation, TYPING_EXPIRY_TIMER, deadline, TimerAction::TypingExpiry)
                            .await
                    }
                    None => self.cancel_timer(generation, TYPING_EXPIRY_TIMER).await,
                }
            }
            ServerFrame::UserStatus { action, user } => {
                if user.as_ref().is_some_and(|u| u.id == self.identity.user_id) {
                    return;
                }
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                inner.presence.apply_user_status(action);
                self.publish_presence(&mut inner);
            }
            ServerFrame::Pong | ServerFrame::Unknown => {}
        }
    }

    /// Sends `content` in the open conversation. The message shows up
    /// immediately as `sending`; the returned id is its temporary id.
    pub async fn send_message(
        self: &Arc<Self>,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("message is empty".into()));
        }

        let (chat_id, generation, optimistic, stop) = {
            let mut inner = self.inner.lock().await;
            let chat_id = inner.chat_id.ok_or(ClientError::NoActiveConversation)?;
            let optimistic = inner.reconciler.append_optimistic(
                content,
                &self.identity,
                reply_to.clone(),
                Utc::now(),
            );
            let stop = inner.typing.reset_local();
            (chat_id, inner.generation, optimistic, stop)
        };
        let temp_id = optimistic.id.clone();
        self.emit(ChatEvent::MessageAdded(optimistic));

        self.cancel_timer(generation, TYPING_STOP_TIMER).await;
        if let Some(signal) = stop {
            self.send_typing(generation, signal).await;
        }

        self.deliver(chat_id, generation, temp_id.clone(), content.to_string(), reply_to)
            .await?;
        Ok(temp_id)
    }

    /// Resends an optimistic message whose previous send failed.
    pub async fn retry_send(self: &Arc<Self>, temp_id: &MessageId) -> Result<(), ClientError> {
        let (chat_id, generation, content, reply_to) = {
            let mut inner = self.inner.lock().await;
            let chat_id = inner.chat_id.ok_or(ClientError::NoActiveConversation)?;
            let (content, reply_to) = inner
                .reconciler
                .take_retry(temp_id)
                .ok_or_else(|| ClientError::UnknownMessage(temp_id.clone()))?;
            (chat_id, inner.generation, content, reply_to)
        };
        info!(chat_id = chat_id.0, %temp_id, "chat: retrying send");
        self.deliver(chat_id, generation, temp_id.clone(), content, reply_to)
            .await
    }

    async fn deliver(
        self: &Arc<Self>,
        chat_id: ChatId,
        generation: u64,
        temp_id: MessageId,
        content: String,
        reply_to: Option<MessageId>,
    ) -> Result<(), ClientError> {
        if self.settings.send_via == SendVia::Socket {
            let frame = ClientFrame::SendMessage {
                message: content.clone(),
                reply_to: reply_to.clone(),
            };
            match self.send_frame_acked(generation, frame).await {
                Ok(()) => {
                    let deadline = Instant::now() + self.settings.timings.send_echo_timeout;
                    self.arm_timer(
                        generation,
                        echo_timer(&temp_id),
                        deadline,
                        TimerAction::SendEcho(temp_id),
                    )
                    .await;
                    return Ok(());
                }
                Err(err) => debug!("chat: socket send unavailable, using REST: {err}"),
            }
        }

        let request = SendMessageRequest { content, reply_to };
        match self.api.send_message(chat_id, &request).await {
            Ok(wire) => {
                let (outcome, snapshot) = {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return Ok(());
                    }
                    let outcome = inner.reconciler.confirm_send(&temp_id, wire, Utc::now());
                    (outcome, inner.reconciler.messages().to_vec())
                };
                match outcome {
                    ConfirmOutcome::Replaced {
                        previous_id,
                        message,
                    } => self.emit(ChatEvent::MessageReplaced {
                        previous_id,
                        message,
                    }),
                    ConfirmOutcome::Removed { temp_id } => {
                        self.emit(ChatEvent::MessageRemoved(temp_id))
                    }
                    ConfirmOutcome::Unknown => {
                        debug!(%temp_id, "chat: confirmation for message already reconciled")
                    }
                }
                self.persist(chat_id, &snapshot).await;
                Ok(())
            }
            Err(err) => {
                warn!(chat_id = chat_id.0, %temp_id, "chat: send failed: {err}");
                {
                    let mut inner = self.inner.lock().await;
                    if inner.generation == generation {
                        inner.reconciler.mark_send_failed(&temp_id);
                    }
                }
                self.report_send_failure(temp_id, &err);
                Err(err)
            }
        }
    }

    fn report_send_failure(&self, temp_id: MessageId, err: &ClientError) {
        self.emit(ChatEvent::SendFailed {
            temp_id: temp_id.clone(),
            error: err.to_string(),
        });
        self.emit(ChatEvent::Notice(UserNotice::for_send_failure(temp_id, err)));
    }

    /// Feeds the composer contents to the typing controller.
    pub async fn input_changed(self: &Arc<Self>, text: &str) -> Result<(), ClientError> {
        let (generation, signal, deadline) = {
            let mut inner = self.inner.lock().await;
            if inner.chat_id.is_none() {
                return Err(ClientError::NoActiveConversation);
            }
            let signal = inner.typing.input_changed(text, Instant::now());
            (inner.generation, signal, inner.typing.local_deadline())
        };
        if let Some(signal) = signal {
            self.send_typing(generation, signal).await;
        }
        match deadline {
            Some(deadline) => {
                self.arm_timer(generation, TYPING_STOP_TIMER, deadline, TimerAction::TypingStop)
                    .await
            }
            None => self.cancel_timer(generation, TYPING_STOP_TIMER).await,
        }
        Ok(())
    }

    /// Marks the conversation read on the server, then locally.
    pub async fn mark_read(&self) -> Result<(), ClientError> {
        let (chat_id, generation) = {
            let inner = self.inner.lock().await;
            (
                inner.chat_id.ok_or(ClientError::NoActiveConversation)?,
                inner.generation,
            )
        };
        if let Err(err) = self.api.mark_read(chat_id).await {
            self.emit(ChatEvent::Notice(UserNotice::for_request_failure(
                "Failed to mark messages as read",
                &err,
            )));
            return Err(err);
        }

        let (updated, snapshot) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Ok(());
            }
            let changed = inner.reconciler.mark_all_read(self.identity.user_id);
            let updated = changed
                .iter()
                .filter_map(|id| inner.reconciler.get(id).cloned())
                .collect::<Vec<_>>();
            (updated, inner.reconciler.messages().to_vec())
        };
        if updated.is_empty() {
            return Ok(());
        }
        for message in updated {
            self.emit(ChatEvent::MessageUpdated(message));
        }
        self.persist(chat_id, &snapshot).await;
        Ok(())
    }

    /// Leaves the current conversation.
    pub async fn close(&self) {
        self.teardown_active().await;
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.chat_id = None;
        inner.typing = Self::typing_controller(&self.settings, &self.identity);
    }

    async fn teardown_active(&self) {
        let previous = self.active.lock().await.take();
        let Some(mut previous) = previous else {
            return;
        };
        previous.timers.cancel_all();
        if let Some(pump) = previous.pump.take() {
            pump.abort();
        }
        if let Some(connection) = previous.connection.take() {
            connection.shutdown().await;
        }
        info!(
            chat_id = previous.chat_id.0,
            generation = previous.generation,
            "chat: conversation closed"
        );
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.generation == generation
    }

    async fn arm_timer(
        self: &Arc<Self>,
        generation: u64,
        name: impl Into<String>,
        deadline: Instant,
        action: TimerAction,
    ) {
        let name = name.into();
        let mut active = self.active.lock().await;
        let Some(current) = active.as_mut().filter(|a| a.generation == generation) else {
            return;
        };
        let client = Arc::downgrade(self);
        let delay = deadline.saturating_duration_since(Instant::now());
        current.timers.schedule(name, delay, async move {
            if let Some(client) = client.upgrade() {
                client.on_timer(generation, action).await;
            }
        });
    }

    async fn cancel_timer(&self, generation: u64, name: &str) {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_mut().filter(|a| a.generation == generation) {
            current.timers.cancel(name);
        }
    }

    async fn on_timer(&self, generation: u64, action: TimerAction) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        let now = Instant::now();
        match action {
            TimerAction::TypingStop => {
                let signal = inner.typing.poll_local(now);
                drop(inner);
                if let Some(signal) = signal {
                    self.send_typing(generation, signal).await;
                }
            }
            TimerAction::TypingExpiry => {
                if inner.typing.poll_remote(now) {
                    self.emit(ChatEvent::TypingChanged(None));
                }
            }
            TimerAction::SendEcho(temp_id) => {
                if inner.reconciler.is_send_failed(&temp_id)
                    || !inner.reconciler.mark_send_failed(&temp_id)
                {
                    return;
                }
                drop(inner);
                warn!(%temp_id, "chat: socket send was never echoed");
                let err = ClientError::Transport("no confirmation from the chat server".into());
                self.report_send_failure(temp_id, &err);
            }
        }
    }

    async fn send_typing(&self, generation: u64, signal: TypingSignal) {
        let ChatIdentity {
            user_id,
            user_name,
            user_role,
        } = self.identity.clone();
        let frame = match signal {
            TypingSignal::Start => ClientFrame::TypingStart {
                user_id,
                user_name,
                user_role,
            },
            TypingSignal::Stop => ClientFrame::TypingStop {
                user_id,
                user_name,
                user_role,
            },
        };
        if let Err(err) = self.send_frame(generation, frame).await {
            debug!(?signal, "chat: typing signal not sent: {err}");
        }
    }

    async fn send_frame(&self, generation: u64, frame: ClientFrame) -> Result<(), ClientError> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|a| a.generation == generation)
            .and_then(|a| a.connection.as_ref())
            .ok_or(ClientError::NotConnected)?
            .send(frame)
    }

    /// Writes `frame` and waits until the connection task reports it written.
    async fn send_frame_acked(&self, generation: u64, frame: ClientFrame) -> Result<(), ClientError> {
        let written = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .filter(|a| a.generation == generation)
                .and_then(|a| a.connection.as_ref())
                .ok_or(ClientError::NotConnected)?
                .send_acked(frame)?
        };
        match written.await {
            Ok(result) => result.map_err(ClientError::Transport),
            Err(_) => Err(ClientError::NotConnected),
        }
    }

    fn publish_presence(&self, inner: &mut ChatState) {
        let view = inner.presence.view(&inner.connection);
        if inner.last_presence.as_ref() == Some(&view) {
            return;
        }
        inner.last_presence = Some(view.clone());
        self.emit(ChatEvent::PresenceChanged(view));
    }

    async fn persist(&self, chat_id: ChatId, messages: &[Message]) {
        if let Err(err) = self.cache.save(chat_id, messages).await {
            warn!(chat_id = chat_id.0, "chat: cache write failed: {err:#}");
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
