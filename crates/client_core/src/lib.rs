use std::{fmt, future::Future, sync::Arc};

use shared::{
    domain::{Conversation, ConversationId, Presence, Ts, UserId},
    protocol::WireConversation,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod api;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod live;
pub mod message_store;
pub mod pagination;
pub mod read_state;
pub mod retry;
pub mod session;
pub mod user_directory;

pub use api::{Credentials, HttpPlatformApi, PlatformApi};
pub use error::{SyncError, SyncResult};
pub use history::{HistoryLoader, LoadedHistory, LoadedThread};
pub use live::{CloseReason, LiveEventStream, LiveStreamConfig, StreamEvent, StreamState};
pub use message_store::{MessageStore, REPLY_AUTHOR_DISPLAY_CAP};
pub use read_state::{ReadState, ReadStateTracker};
pub use session::{ChatSession, StoreMutation, ViewKind};
pub use user_directory::UserDirectory;

use crate::{pagination::paginate, retry::RateLimitedCaller};

/// Background work whose failure is reported back to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadHistory,
    LoadThread,
    LoadConversations,
    ResolveUser,
    SendMessage,
    EditMessage,
    DeleteMessage,
    AddReaction,
    RemoveReaction,
    MarkRead,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LoadHistory => "load history",
            Self::LoadThread => "load thread",
            Self::LoadConversations => "load conversations",
            Self::ResolveUser => "resolve user",
            Self::SendMessage => "send message",
            Self::EditMessage => "edit message",
            Self::DeleteMessage => "delete message",
            Self::AddReaction => "add reaction",
            Self::RemoveReaction => "remove reaction",
            Self::MarkRead => "mark read",
        };
        f.write_str(label)
    }
}

/// Everything background tasks hand to the consuming task.
#[derive(Debug)]
pub enum CoreUpdate {
    HistoryLoaded {
        conversation_id: ConversationId,
        result: SyncResult<LoadedHistory>,
    },
    ThreadLoaded {
        conversation_id: ConversationId,
        root_id: Ts,
        result: SyncResult<LoadedThread>,
    },
    ConversationsLoaded(Vec<Conversation>),
    Live(StreamEvent),
    UserResolved {
        user_id: UserId,
        name: String,
    },
    UserLookupFailed {
        user_id: UserId,
        error: SyncError,
    },
    OperationFailed {
        operation: Operation,
        error: SyncError,
    },
}

impl From<StreamEvent> for CoreUpdate {
    fn from(event: StreamEvent) -> Self {
        Self::Live(event)
    }
}

#[derive(Debug, Clone)]
pub struct OpenedConversation {
    pub conversation_id: ConversationId,
    pub store: MessageStore,
    pub read_state: ReadState,
}

/// Owns the platform connection and launches the work whose results feed a [`ChatSession`].
pub struct SyncClient {
    api: Arc<dyn PlatformApi>,
    users: UserDirectory,
    updates: mpsc::UnboundedSender<CoreUpdate>,
}

impl SyncClient {
    pub fn new(api: Arc<dyn PlatformApi>) -> (Arc<Self>, mpsc::UnboundedReceiver<CoreUpdate>) {
        let (updates, receiver) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            api,
            users: UserDirectory::new(),
            updates,
        });
        (client, receiver)
    }

    pub fn api(&self) -> &dyn PlatformApi {
        self.api.as_ref()
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn updates(&self) -> mpsc::UnboundedSender<CoreUpdate> {
        self.updates.clone()
    }

    pub async fn authenticate(&self) -> SyncResult<UserId> {
        let user_id = RateLimitedCaller::new("auth.test")
            .call(|| self.api.auth_test())
            .await?;
        info!(user_id = %user_id, "sync: authenticated");
        Ok(user_id)
    }

    /// Opens the live stream, delivering its events to this client's queue.
    pub async fn connect_live(&self, config: LiveStreamConfig) -> SyncResult<LiveEventStream> {
        LiveEventStream::connect(config, self.updates.clone()).await
    }

    pub async fn open_conversation(&self, conversation_id: &ConversationId) -> SyncResult<OpenedConversation> {
        let history = HistoryLoader::new(self.api.as_ref())
            .load_history(conversation_id)
            .await?;
        let read_state = ReadState {
            last_read: history.latest_ts.clone(),
            latest: history.latest_ts.clone(),
        };
        Ok(OpenedConversation {
            conversation_id: history.conversation_id,
            store: MessageStore::from_messages(history.messages),
            read_state,
        })
    }

    pub async fn open_thread(&self, conversation_id: &ConversationId, root_id: &Ts) -> SyncResult<MessageStore> {
        let thread = HistoryLoader::new(self.api.as_ref())
            .load_thread(conversation_id, root_id)
            .await?;
        Ok(MessageStore::from_messages(thread.messages))
    }

    /// Lists every conversation the user can see, with read markers and DM peers.
    ///
    /// Conversations whose detail lookups fail are skipped.
    pub async fn load_conversations(&self) -> SyncResult<Vec<Conversation>> {
        let api = self.api.as_ref();
        let listed = paginate("users.conversations", |cursor| async move {
            api.list_conversations(&cursor).await
        })
        .await?;

        let mut conversations = Vec::with_capacity(listed.len());
        for summary in listed {
            match self.describe_conversation(&summary.id).await {
                Ok(conversation) => conversations.push(conversation),
                Err(err) => {
                    warn!(conversation_id = %summary.id, error = %err, "sync: skipping conversation");
                }
            }
        }
        info!(count = conversations.len(), "sync: conversations loaded");
        Ok(conversations)
    }

    async fn describe_conversation(&self, conversation_id: &ConversationId) -> SyncResult<Conversation> {
        let info: WireConversation = RateLimitedCaller::new("conversations.info")
            .call(|| self.api.conversation_info(conversation_id))
            .await?;
        let latest_message = RateLimitedCaller::new("conversations.history")
            .call(|| self.api.latest_message(conversation_id))
            .await?;

        let peer_user_id = info.user.clone().filter(|_| info.is_im);
        let display_name = match (&peer_user_id, &info.name) {
            (Some(peer), _) => match self.users.resolve_waiting(self.api.as_ref(), peer).await {
                Ok(name) => name,
                Err(_) => peer.to_string(),
            },
            (None, Some(name)) => name.clone(),
            (None, None) => conversation_id.to_string(),
        };

        Ok(Conversation {
            id: info.id,
            display_name,
            last_read: info.last_read,
            latest_message,
            is_member: info.is_member || info.is_im,
            peer_user_id,
            peer_presence: Presence::Unknown,
        })
    }

    fn spawn_reported<F>(&self, operation: Operation, task: F)
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let updates = self.updates.clone();
        tokio::spawn(async move {
            if let Err(error) = task.await {
                warn!(operation = %operation, error = %error, "sync: background operation failed");
                let _ = updates.send(CoreUpdate::OperationFailed { operation, error });
            }
        });
    }

    pub fn spawn_load_history(self: &Arc<Self>, conversation_id: ConversationId) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = HistoryLoader::new(client.api.as_ref())
                .load_history(&conversation_id)
                .await;
            let _ = client.updates.send(CoreUpdate::HistoryLoaded {
                conversation_id,
                result,
            });
        });
    }

    pub fn spawn_load_thread(self: &Arc<Self>, conversation_id: ConversationId, root_id: Ts) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = HistoryLoader::new(client.api.as_ref())
                .load_thread(&conversation_id, &root_id)
                .await;
            let _ = client.updates.send(CoreUpdate::ThreadLoaded {
                conversation_id,
                root_id,
                result,
            });
        });
    }

    pub fn spawn_load_conversations(self: &Arc<Self>) {
        let client = Arc::clone(self);
        self.spawn_reported(Operation::LoadConversations, async move {
            let conversations = client.load_conversations().await?;
            let _ = client
                .updates
                .send(CoreUpdate::ConversationsLoaded(conversations));
            Ok(())
        });
    }

    pub fn spawn_resolve_user(self: &Arc<Self>, user_id: UserId) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let update = match client.users.resolve_waiting(client.api.as_ref(), &user_id).await {
                Ok(name) => CoreUpdate::UserResolved { user_id, name },
                Err(error) => CoreUpdate::UserLookupFailed { user_id, error },
            };
            let _ = client.updates.send(update);
        });
    }

    pub fn spawn_post_message(
        &self,
        conversation_id: ConversationId,
        text: String,
        thread_root_id: Option<Ts>,
    ) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::SendMessage, async move {
            RateLimitedCaller::new("chat.postMessage")
                .call(|| api.post_message(&conversation_id, &text, thread_root_id.as_ref()))
                .await
        });
    }

    pub fn spawn_update_message(&self, conversation_id: ConversationId, message_id: Ts, text: String) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::EditMessage, async move {
            RateLimitedCaller::new("chat.update")
                .call(|| api.update_message(&conversation_id, &message_id, &text))
                .await
        });
    }

    pub fn spawn_delete_message(&self, conversation_id: ConversationId, message_id: Ts) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::DeleteMessage, async move {
            RateLimitedCaller::new("chat.delete")
                .call(|| api.delete_message(&conversation_id, &message_id))
                .await
        });
    }

    pub fn spawn_add_reaction(&self, conversation_id: ConversationId, message_id: Ts, name: String) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::AddReaction, async move {
            RateLimitedCaller::new("reactions.add")
                .call(|| api.add_reaction(&conversation_id, &message_id, &name))
                .await
        });
    }

    pub fn spawn_remove_reaction(&self, conversation_id: ConversationId, message_id: Ts, name: String) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::RemoveReaction, async move {
            RateLimitedCaller::new("reactions.remove")
                .call(|| api.remove_reaction(&conversation_id, &message_id, &name))
                .await
        });
    }

    pub fn spawn_mark_read(&self, conversation_id: ConversationId, ts: Ts) {
        let api = Arc::clone(&self.api);
        self.spawn_reported(Operation::MarkRead, async move {
            RateLimitedCaller::new("conversations.mark")
                .call(|| api.mark_read(&conversation_id, &ts))
                .await
        });
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/live_tests.rs"]
mod live_tests;
