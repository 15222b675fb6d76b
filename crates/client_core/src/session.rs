use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use shared::domain::{Conversation, ConversationId, Message, Presence, Ts, UserId};
use tracing::{debug, info, warn};

use crate::{
    dispatch::{classify, route},
    error::{SyncError, SyncResult},
    live::{CloseReason, StreamEvent},
    message_store::MessageStore,
    read_state::ReadStateTracker,
    CoreUpdate, Operation, SyncClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Conversation,
    Thread,
}

/// A change applied to session state, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMutation {
    ConversationOpened { conversation_id: ConversationId },
    HistoryMerged { view: ViewKind, inserted: usize },
    ThreadOpened { root_id: Ts },
    ThreadClosed,
    Inserted { view: ViewKind, message_id: Ts },
    Edited { view: ViewKind, message_id: Ts },
    Deleted { view: ViewKind, message_id: Ts },
    ReactionsChanged { view: ViewKind, message_id: Ts },
    CollapseToggled { message_id: Ts, collapsed: bool },
    ReadStateChanged { conversation_id: ConversationId, unread: bool },
    MembershipChanged { conversation_id: ConversationId, user_id: UserId, joined: bool },
    PresenceChanged { user_id: UserId, presence: Presence },
    ConversationsLoaded { count: usize },
    UserResolved { user_id: UserId, name: String },
    LiveClosed { reason: CloseReason },
    Failure { operation: Operation, error: String },
}

#[derive(Debug, Clone)]
pub struct OpenView {
    pub conversation_id: ConversationId,
    pub store: MessageStore,
}

#[derive(Debug, Clone)]
pub struct ThreadView {
    pub conversation_id: ConversationId,
    pub root_id: Ts,
    pub store: MessageStore,
}

/// Everything the consuming task owns; mutated only from that task.
#[derive(Debug, Default)]
pub struct SessionState {
    pub self_user: Option<UserId>,
    pub open: Option<OpenView>,
    pub thread: Option<ThreadView>,
    pub read_state: ReadStateTracker,
    pub conversations: BTreeMap<ConversationId, Conversation>,
}

impl SessionState {
    pub fn open_conversation(&mut self, conversation_id: ConversationId, store: MessageStore) {
        self.thread = None;
        self.open = Some(OpenView {
            conversation_id,
            store,
        });
    }

    pub fn current_conversation(&self) -> Option<&ConversationId> {
        self.open.as_ref().map(|view| &view.conversation_id)
    }

    pub fn is_open(&self, conversation_id: &ConversationId) -> bool {
        self.current_conversation() == Some(conversation_id)
    }

    pub fn main_store(&self) -> Option<&MessageStore> {
        self.open.as_ref().map(|view| &view.store)
    }

    pub fn main_store_mut(&mut self) -> Option<&mut MessageStore> {
        self.open.as_mut().map(|view| &mut view.store)
    }

    pub fn thread_for(&mut self, conversation_id: &ConversationId, root_id: &Ts) -> Option<&mut ThreadView> {
        self.thread
            .as_mut()
            .filter(|thread| &thread.conversation_id == conversation_id && &thread.root_id == root_id)
    }

    /// Stores showing `conversation_id`, thread view first.
    pub fn stores_mut(&mut self, conversation_id: &ConversationId) -> Vec<(ViewKind, &mut MessageStore)> {
        let mut stores = Vec::with_capacity(2);
        if let Some(thread) = self
            .thread
            .as_mut()
            .filter(|thread| &thread.conversation_id == conversation_id)
        {
            stores.push((ViewKind::Thread, &mut thread.store));
        }
        if let Some(open) = self
            .open
            .as_mut()
            .filter(|open| &open.conversation_id == conversation_id)
        {
            stores.push((ViewKind::Conversation, &mut open.store));
        }
        stores
    }
}

type Subscriber = Box<dyn FnMut(&StoreMutation) + Send>;

/// The consumer side of the client: owns every store and applies results in arrival order.
pub struct ChatSession {
    client: Arc<SyncClient>,
    state: SessionState,
    names: HashMap<UserId, String>,
    requested_names: HashSet<UserId>,
    subscribers: Vec<Subscriber>,
}

impl ChatSession {
    pub fn new(client: Arc<SyncClient>) -> Self {
        Self {
            client,
            state: SessionState::default(),
            names: HashMap::new(),
            requested_names: HashSet::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_self_user(mut self, user_id: UserId) -> Self {
        self.state.self_user = Some(user_id);
        self
    }

    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: FnMut(&StoreMutation) + Send + 'static,
    {
        self.subscribers.push(Box::new(subscriber));
    }

    fn emit(&mut self, mutations: Vec<StoreMutation>) -> Vec<StoreMutation> {
        for mutation in &mutations {
            for subscriber in &mut self.subscribers {
                subscriber(mutation);
            }
        }
        mutations
    }

    /// Seeds conversation metadata and read markers, e.g. from a snapshot.
    pub fn seed_conversations(&mut self, conversations: impl IntoIterator<Item = Conversation>) {
        for conversation in conversations {
            self.state.read_state.seed(
                conversation.id.clone(),
                conversation.last_read.clone(),
                conversation.latest_message.clone(),
            );
            self.state
                .conversations
                .insert(conversation.id.clone(), conversation);
        }
    }

    pub fn seed_names(&mut self, names: impl IntoIterator<Item = (UserId, String)>) {
        self.names.extend(names);
    }

    pub fn current_conversation(&self) -> Option<&ConversationId> {
        self.state.current_conversation()
    }

    pub fn current_thread(&self) -> Option<&Ts> {
        self.state.thread.as_ref().map(|thread| &thread.root_id)
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.state.conversations.get(conversation_id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.state.conversations.values()
    }

    /// Conversation metadata with the tracker's current read markers folded in.
    pub fn conversation_snapshot(&self) -> Vec<Conversation> {
        self.state
            .conversations
            .values()
            .map(|conversation| {
                let mut conversation = conversation.clone();
                if let Some(state) = self.state.read_state.get(&conversation.id) {
                    conversation.last_read = state.last_read.clone();
                    conversation.latest_message = state.latest.clone();
                }
                conversation
            })
            .collect()
    }

    pub fn known_names(&self) -> impl Iterator<Item = (&UserId, &str)> {
        self.names.iter().map(|(id, name)| (id, name.as_str()))
    }

    pub fn main_store(&self) -> Option<&MessageStore> {
        self.state.main_store()
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        self.state
            .main_store()
            .map(MessageStore::visible_messages)
            .unwrap_or_default()
    }

    pub fn thread_messages(&self) -> &[Message] {
        self.state
            .thread
            .as_ref()
            .map(|thread| thread.store.messages())
            .unwrap_or(&[])
    }

    pub fn is_unread(&self, conversation_id: &ConversationId) -> bool {
        self.state.read_state.is_unread(conversation_id)
    }

    pub fn display_name(&self, user_id: &UserId) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }

    /// Applies one asynchronous result, returning the mutations it caused.
    pub fn apply(&mut self, update: CoreUpdate) -> Vec<StoreMutation> {
        let mutations = match update {
            CoreUpdate::HistoryLoaded {
                conversation_id,
                result,
            } => self.apply_history(conversation_id, result),
            CoreUpdate::ThreadLoaded {
                conversation_id,
                root_id,
                result,
            } => self.apply_thread(conversation_id, root_id, result),
            CoreUpdate::ConversationsLoaded(conversations) => {
                let count = conversations.len();
                self.seed_conversations(conversations);
                info!(count, "sync: conversation directory refreshed");
                vec![StoreMutation::ConversationsLoaded { count }]
            }
            CoreUpdate::Live(StreamEvent::Event(event)) => {
                let Some(event) = classify(event) else {
                    return Vec::new();
                };
                let mutations = route(event, &mut self.state);
                self.request_names_for(&mutations);
                mutations
            }
            CoreUpdate::Live(StreamEvent::Closed(reason)) => {
                vec![StoreMutation::LiveClosed { reason }]
            }
            CoreUpdate::UserResolved { user_id, name } => {
                self.requested_names.remove(&user_id);
                self.names.insert(user_id.clone(), name.clone());
                vec![StoreMutation::UserResolved { user_id, name }]
            }
            CoreUpdate::UserLookupFailed { user_id, error } => {
                // Forget the request so the next message from this user asks again.
                self.requested_names.remove(&user_id);
                vec![StoreMutation::Failure {
                    operation: Operation::ResolveUser,
                    error: error.to_string(),
                }]
            }
            CoreUpdate::OperationFailed { operation, error } => {
                vec![StoreMutation::Failure {
                    operation,
                    error: error.to_string(),
                }]
            }
        };
        self.emit(mutations)
    }

    fn apply_history(
        &mut self,
        conversation_id: ConversationId,
        result: SyncResult<crate::history::LoadedHistory>,
    ) -> Vec<StoreMutation> {
        if !self.state.is_open(&conversation_id) {
            debug!(conversation_id = %conversation_id, "sync: dropping stale history result");
            return Vec::new();
        }
        let history = match result {
            Ok(history) => history,
            Err(error) => {
                return vec![StoreMutation::Failure {
                    operation: Operation::LoadHistory,
                    error: error.to_string(),
                }]
            }
        };

        let authors: Vec<UserId> = history
            .messages
            .iter()
            .filter_map(|message| message.author_id.clone())
            .collect();
        let mut mutations = Vec::new();
        if let Some(store) = self.state.main_store_mut() {
            let inserted = store.extend(history.messages);
            mutations.push(StoreMutation::HistoryMerged {
                view: ViewKind::Conversation,
                inserted,
            });
        }
        if let Some(latest) = history.latest_ts {
            self.state.read_state.mark_read(&conversation_id, &latest);
            // Live events during the load may already have moved `latest` further.
            let tracked = self.state.read_state.get(&conversation_id).cloned();
            if let Some(conversation) = self.state.conversations.get_mut(&conversation_id) {
                conversation.last_read = Some(latest.clone());
                conversation.latest_message = tracked.as_ref().and_then(|state| state.latest.clone());
            }
            mutations.push(StoreMutation::ReadStateChanged {
                conversation_id: conversation_id.clone(),
                unread: tracked.is_some_and(|state| state.is_unread()),
            });
            self.client.spawn_mark_read(conversation_id, latest);
        }
        self.request_names(authors);
        mutations
    }

    fn apply_thread(
        &mut self,
        conversation_id: ConversationId,
        root_id: Ts,
        result: SyncResult<crate::history::LoadedThread>,
    ) -> Vec<StoreMutation> {
        let Some(thread) = self.state.thread_for(&conversation_id, &root_id) else {
            debug!(root_id = %root_id, "sync: dropping stale thread result");
            return Vec::new();
        };
        match result {
            Ok(loaded) => {
                let authors: Vec<UserId> = loaded
                    .messages
                    .iter()
                    .filter_map(|message| message.author_id.clone())
                    .collect();
                let inserted = thread.store.extend(loaded.messages);
                self.request_names(authors);
                vec![StoreMutation::HistoryMerged {
                    view: ViewKind::Thread,
                    inserted,
                }]
            }
            Err(error) => vec![StoreMutation::Failure {
                operation: Operation::LoadThread,
                error: error.to_string(),
            }],
        }
    }

    fn request_names_for(&mut self, mutations: &[StoreMutation]) {
        let authors: Vec<UserId> = mutations
            .iter()
            .filter_map(|mutation| match mutation {
                StoreMutation::Inserted {
                    view: ViewKind::Conversation,
                    message_id,
                } => self
                    .state
                    .main_store()
                    .and_then(|store| store.get(message_id))
                    .and_then(|message| message.author_id.clone()),
                _ => None,
            })
            .collect();
        self.request_names(authors);
    }

    fn request_names(&mut self, user_ids: impl IntoIterator<Item = UserId>) {
        for user_id in user_ids {
            if self.names.contains_key(&user_id) || !self.requested_names.insert(user_id.clone()) {
                continue;
            }
            self.client.spawn_resolve_user(user_id);
        }
    }

    pub fn open_conversation(&mut self, conversation_id: ConversationId) -> Vec<StoreMutation> {
        info!(conversation_id = %conversation_id, "sync: opening conversation");
        self.state
            .open_conversation(conversation_id.clone(), MessageStore::new());
        self.client.spawn_load_history(conversation_id.clone());
        self.emit(vec![StoreMutation::ConversationOpened { conversation_id }])
    }

    pub fn open_thread(&mut self, root_id: Ts) -> SyncResult<Vec<StoreMutation>> {
        let conversation_id = self
            .state
            .current_conversation()
            .cloned()
            .ok_or(SyncError::NoConversationOpen)?;
        self.state.thread = Some(ThreadView {
            conversation_id: conversation_id.clone(),
            root_id: root_id.clone(),
            store: MessageStore::new(),
        });
        self.client.spawn_load_thread(conversation_id, root_id.clone());
        Ok(self.emit(vec![StoreMutation::ThreadOpened { root_id }]))
    }

    pub fn close_thread(&mut self) -> Vec<StoreMutation> {
        if self.state.thread.take().is_none() {
            return Vec::new();
        }
        self.emit(vec![StoreMutation::ThreadClosed])
    }

    pub fn toggle_collapse(&mut self, message_id: &Ts) -> Option<bool> {
        let collapsed = self.state.main_store_mut()?.toggle_collapse(message_id)?;
        self.emit(vec![StoreMutation::CollapseToggled {
            message_id: message_id.clone(),
            collapsed,
        }]);
        Some(collapsed)
    }

    /// Marks the open conversation read up to its newest message.
    pub fn mark_read(&mut self) -> SyncResult<Vec<StoreMutation>> {
        let conversation_id = self.open_conversation_id()?;
        let latest = self
            .state
            .read_state
            .get(&conversation_id)
            .and_then(|state| state.latest.clone())
            .or_else(|| {
                self.state
                    .main_store()
                    .and_then(MessageStore::latest_top_level)
                    .map(|message| message.id.clone())
            });
        let Some(latest) = latest else {
            return Ok(Vec::new());
        };

        self.state.read_state.mark_read(&conversation_id, &latest);
        if let Some(conversation) = self.state.conversations.get_mut(&conversation_id) {
            conversation.last_read = Some(latest.clone());
        }
        self.client.spawn_mark_read(conversation_id.clone(), latest);
        Ok(self.emit(vec![StoreMutation::ReadStateChanged {
            conversation_id,
            unread: false,
        }]))
    }

    fn open_conversation_id(&self) -> SyncResult<ConversationId> {
        self.state
            .current_conversation()
            .cloned()
            .ok_or(SyncError::NoConversationOpen)
    }

    pub fn send_message(&self, text: impl Into<String>) -> SyncResult<()> {
        let conversation_id = self.open_conversation_id()?;
        self.client.spawn_post_message(conversation_id, text.into(), None);
        Ok(())
    }

    pub fn reply_in_thread(&self, text: impl Into<String>) -> SyncResult<()> {
        let thread = self.state.thread.as_ref().ok_or(SyncError::NoThreadOpen)?;
        self.client.spawn_post_message(
            thread.conversation_id.clone(),
            text.into(),
            Some(thread.root_id.clone()),
        );
        Ok(())
    }

    pub fn edit_message(&self, message_id: Ts, text: impl Into<String>) -> SyncResult<()> {
        let conversation_id = self.open_conversation_id()?;
        self.client
            .spawn_update_message(conversation_id, message_id, text.into());
        Ok(())
    }

    pub fn delete_message(&self, message_id: Ts) -> SyncResult<()> {
        let conversation_id = self.open_conversation_id()?;
        self.client.spawn_delete_message(conversation_id, message_id);
        Ok(())
    }

    pub fn add_reaction(&self, message_id: Ts, name: impl Into<String>) -> SyncResult<()> {
        let conversation_id = self.open_conversation_id()?;
        self.client
            .spawn_add_reaction(conversation_id, message_id, name.into());
        Ok(())
    }

    pub fn remove_reaction(&self, message_id: Ts, name: impl Into<String>) -> SyncResult<()> {
        let conversation_id = self.open_conversation_id()?;
        self.client
            .spawn_remove_reaction(conversation_id, message_id, name.into());
        Ok(())
    }

    pub fn load_conversations(&self) {
        self.client.spawn_load_conversations();
    }

    /// First conversation, by id, that the user is a member of.
    pub fn first_member_conversation(&self) -> Option<&ConversationId> {
        let found = self
            .state
            .conversations
            .values()
            .find(|conversation| conversation.is_member)
            .map(|conversation| &conversation.id);
        if found.is_none() {
            warn!("sync: no member conversation known");
        }
        found
    }
}
