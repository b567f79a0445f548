//! Client-side conversation and message state.
//!
//! [`ChatStore`] is the only writer of the state views render from. Every
//! operation talks to the remote store (and, for sends, the AI responder),
//! then folds the outcome into [`ChatState`] and notifies observers. Failures
//! never escape an operation: they are logged and surfaced once as a
//! [`Notice`].

use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::models::{Conversation, ConversationPatch, Message, User, DEFAULT_TITLE};
use crate::services::auth::{AuthEvent, AuthProvider};
use crate::services::chat::ChatService;
use crate::services::events::{EventHub, Subscription};
use crate::services::remote::RemoteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub user: Option<User>,
    /// Most recently updated first, as of the last full load.
    pub conversations: Vec<Conversation>,
    pub active_conversation_id: Option<String>,
    /// Messages of the active conversation, oldest first.
    pub messages: Vec<Message>,
    pub messages_loading: bool,
    pub assistant_typing: bool,
    /// True until the first session state is known.
    pub auth_loading: bool,
}

impl ChatState {
    pub fn active_conversation(&self) -> Option<&Conversation> {
        let id = self.active_conversation_id.as_deref()?;
        self.conversations.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-visible outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Changed,
    Notice(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank content, no active conversation, or a reply already pending.
    Rejected,
    Delivered,
    Failed,
}

struct Shared {
    state: ChatState,
    /// Bumped whenever the active conversation changes.
    selection: u64,
    selection_cancel: CancellationToken,
}

impl Shared {
    /// Switch the active conversation, cancelling any in-flight message fetch.
    fn activate(&mut self, id: Option<String>) -> (u64, CancellationToken) {
        self.selection_cancel.cancel();
        self.selection_cancel = CancellationToken::new();
        self.selection += 1;
        self.state.active_conversation_id = id;
        self.state.messages.clear();
        self.state.messages_loading = false;
        (self.selection, self.selection_cancel.clone())
    }

    fn clear_session(&mut self) {
        self.state.user = None;
        self.state.conversations.clear();
        self.activate(None);
    }

    fn user_id(&self) -> Option<&str> {
        self.state.user.as_ref().map(|u| u.id.as_str())
    }
}

struct Inner {
    shared: Mutex<Shared>,
    remote: Arc<dyn RemoteStore>,
    chat: ChatService,
    auth: Arc<dyn AuthProvider>,
    events: EventHub<StoreEvent>,
    background: TaskTracker,
}

/// Cheap-to-clone handle to the conversation/message store.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Inner>,
}

impl ChatStore {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        chat: ChatService,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let state = ChatState {
            auth_loading: true,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state,
                    selection: 0,
                    selection_cancel: CancellationToken::new(),
                }),
                remote,
                chat,
                auth,
                events: EventHub::new(),
                background: TaskTracker::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> ChatState {
        self.lock().state.clone()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Wait for background refreshes started by earlier operations.
    pub async fn wait_idle(&self) {
        let tracker = &self.inner.background;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate shared state, then tell observers.
    fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let result = {
            let mut shared = self.lock();
            f(&mut shared)
        };
        self.inner.events.emit(&StoreEvent::Changed);
        result
    }

    fn notify(&self, notice: Notice) {
        self.inner.events.emit(&StoreEvent::Notice(notice));
    }

    // --- Session ---

    /// Follow the auth provider's session and apply the current one.
    pub async fn bind_auth(&self) -> Subscription {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.auth.subscribe(Box::new(move |event: &AuthEvent| {
            if let Some(inner) = weak.upgrade() {
                ChatStore { inner }.apply_session(event.clone());
            }
        }));

        match self.inner.auth.current_session().await {
            Ok(session) => self.apply_session(session.map(|s| s.user)),
            Err(e) => {
                tracing::error!("Failed to read current session: {}", e);
                self.apply_session(None);
            }
        }
        subscription
    }

    fn apply_session(&self, user: Option<User>) {
        self.update(|s| {
            match user {
                Some(user) => {
                    if s.user_id() != Some(user.id.as_str()) {
                        s.state.conversations.clear();
                        s.activate(None);
                    }
                    tracing::info!("Signed in as {}", user.email);
                    s.state.user = Some(user);
                }
                None => {
                    if s.state.user.is_some() {
                        tracing::info!("Signed out");
                    }
                    s.clear_session();
                }
            }
            s.state.auth_loading = false;
        });
    }

    pub async fn logout(&self) {
        if let Err(e) = self.inner.auth.sign_out().await {
            tracing::error!("Sign-out failed: {}", e);
            self.notify(Notice::error("Failed to sign out"));
        }
        self.update(Shared::clear_session);
    }

    // --- Conversations ---

    pub async fn load_conversations(&self) -> bool {
        let Some(user_id) = self.lock().user_id().map(str::to_string) else {
            tracing::debug!("Skipping conversation load without a user");
            return false;
        };

        match self.inner.remote.list_conversations(&user_id).await {
            Ok(conversations) => {
                self.update(|s| {
                    if s.user_id() == Some(user_id.as_str()) {
                        s.state.conversations = conversations;
                    }
                });
                true
            }
            Err(e) => {
                tracing::error!("Failed to load conversations: {}", e);
                self.notify(Notice::error("Failed to load conversations"));
                false
            }
        }
    }

    pub async fn select_conversation(&self, id: &str) -> bool {
        let (generation, cancel) = self.update(|s| {
            let ticket = s.activate(Some(id.to_string()));
            s.state.messages_loading = true;
            ticket
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Message fetch for {} superseded", id);
                return false;
            }
            result = self.inner.remote.list_messages(id) => result,
        };

        match result {
            Ok(messages) => {
                let applied = self.update(|s| {
                    if s.selection != generation {
                        return false;
                    }
                    s.state.messages = messages;
                    s.state.messages_loading = false;
                    true
                });
                if !applied {
                    tracing::debug!("Discarding stale messages for {}", id);
                }
                applied
            }
            Err(e) => {
                tracing::error!("Failed to load messages for {}: {}", id, e);
                let current = self.update(|s| {
                    let current = s.selection == generation;
                    if current {
                        s.state.messages_loading = false;
                    }
                    current
                });
                if current {
                    self.notify(Notice::error("Failed to load messages"));
                }
                false
            }
        }
    }

    pub async fn create_conversation(&self) -> Option<Conversation> {
        let Some(user_id) = self.lock().user_id().map(str::to_string) else {
            tracing::debug!("Cannot create a conversation without a user");
            return None;
        };

        match self
            .inner
            .remote
            .insert_conversation(&user_id, DEFAULT_TITLE)
            .await
        {
            Ok(conversation) => {
                let created = conversation.clone();
                self.update(|s| {
                    if s.user_id() == Some(user_id.as_str()) {
                        s.activate(Some(created.id.clone()));
                        s.state.conversations.insert(0, created);
                    }
                });
                Some(conversation)
            }
            Err(e) => {
                tracing::error!("Failed to create conversation: {}", e);
                self.notify(Notice::error("Failed to create conversation"));
                None
            }
        }
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> bool {
        let patch = ConversationPatch::retitle(title, Utc::now());
        match self.inner.remote.update_conversation(id, &patch).await {
            Ok(_) => {
                self.update(|s| {
                    if let Some(conv) = s.state.conversations.iter_mut().find(|c| c.id == id) {
                        conv.title = title.to_string();
                    }
                });
                self.notify(Notice::success("Conversation renamed"));
                true
            }
            Err(e) => {
                tracing::error!("Failed to rename conversation {}: {}", id, e);
                self.notify(Notice::error("Failed to rename conversation"));
                false
            }
        }
    }

    pub async fn delete_conversation(&self, id: &str) -> bool {
        match self.inner.remote.delete_conversation(id).await {
            Ok(()) => {
                self.update(|s| {
                    s.state.conversations.retain(|c| c.id != id);
                    if s.state.active_conversation_id.as_deref() == Some(id) {
                        s.activate(None);
                    }
                });
                self.notify(Notice::success("Conversation deleted"));
                true
            }
            Err(e) => {
                tracing::error!("Failed to delete conversation {}: {}", id, e);
                self.notify(Notice::error("Failed to delete conversation"));
                false
            }
        }
    }

    // --- Messages ---

    /// Send a user message to the active conversation and wait for the reply.
    ///
    /// The user message appears immediately as a pending entry and stays in
    /// the list even when the send fails.
    pub async fn send_message(&self, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Rejected;
        }

        let (conversation_id, generation) = {
            let mut shared = self.lock();
            let generation = shared.selection;
            let state = &mut shared.state;
            match state.active_conversation_id.clone() {
                Some(id) if !state.assistant_typing => {
                    state.messages.push(Message::pending(&id, content));
                    state.assistant_typing = true;
                    (id, generation)
                }
                _ => return SendOutcome::Rejected,
            }
        };
        self.inner.events.emit(&StoreEvent::Changed);

        let typing = TypingGuard {
            store: self.clone(),
        };

        match self.inner.chat.send(&conversation_id, content).await {
            Ok(reply) => {
                // A reselect since the send started already fetched the stored reply.
                self.update(|s| {
                    if s.selection == generation {
                        s.state.messages.push(reply);
                    }
                });
                drop(typing);

                // Pick up the new title and ordering.
                let store = self.clone();
                self.inner.background.spawn(async move {
                    store.load_conversations().await;
                });
                SendOutcome::Delivered
            }
            Err(e) => {
                drop(typing);
                tracing::error!("Failed to send message to {}: {}", conversation_id, e);
                self.notify(Notice::error("Failed to send message"));
                SendOutcome::Failed
            }
        }
    }
}

/// Clears the typing flag however the send ends, including cancellation.
struct TypingGuard {
    store: ChatStore,
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.store.update(|s| s.state.assistant_typing = false);
    }
}
