use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ConversationId, Ts, UserId},
    error::ApiError,
    protocol::{WireConversation, WireMessage, WireProfile, WireUser},
};

use crate::{
    api::PlatformApi,
    error::{SyncError, SyncResult},
    pagination::Page,
};

pub fn wire(ts: &str, thread_ts: Option<&str>) -> WireMessage {
    WireMessage {
        ts: Ts::from(ts),
        thread_ts: thread_ts.map(Ts::from),
        user: Some(UserId::from("U1")),
        text: format!("message {ts}"),
        ..WireMessage::default()
    }
}

/// In-memory platform with canned responses and a call log.
#[derive(Default)]
pub struct FakeApi {
    pub history: HashMap<String, Vec<WireMessage>>,
    pub replies: HashMap<(String, String), Page<WireMessage>>,
    pub conversations: Vec<WireConversation>,
    pub users: HashMap<String, String>,
    pub failing: HashSet<&'static str>,
    pub user_delay: Duration,
    pub log: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn failing(mut self, endpoint: &'static str) -> Self {
        self.failing.insert(endpoint);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().expect("call log").clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(endpoint))
            .count()
    }

    fn record(&self, endpoint: &'static str, detail: impl Into<String>) -> SyncResult<()> {
        let detail = detail.into();
        self.log
            .lock()
            .expect("call log")
            .push(format!("{endpoint} {detail}").trim_end().to_string());
        if self.failing.contains(endpoint) {
            return Err(SyncError::Api {
                endpoint: endpoint.to_string(),
                error: ApiError::from_platform("channel_not_found"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn auth_test(&self) -> SyncResult<UserId> {
        self.record("auth.test", "")?;
        Ok(UserId::from("U0"))
    }

    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> SyncResult<Vec<WireMessage>> {
        self.record("conversations.history", format!("{conversation_id} {limit}"))?;
        let messages = self
            .history
            .get(conversation_id.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(messages.into_iter().take(limit as usize).collect())
    }

    async fn conversation_replies(
        &self,
        conversation_id: &ConversationId,
        root_id: &Ts,
        cursor: &str,
    ) -> SyncResult<Page<WireMessage>> {
        self.record(
            "conversations.replies",
            format!("{conversation_id} {root_id} {cursor}"),
        )?;
        Ok(self
            .replies
            .get(&(root_id.to_string(), cursor.to_string()))
            .cloned()
            .unwrap_or_else(|| Page::last(Vec::new())))
    }

    async fn list_conversations(&self, cursor: &str) -> SyncResult<Page<WireConversation>> {
        self.record("users.conversations", cursor)?;
        Ok(Page::last(self.conversations.clone()))
    }

    async fn conversation_info(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<WireConversation> {
        self.record("conversations.info", conversation_id.as_str())?;
        self.conversations
            .iter()
            .find(|conversation| &conversation.id == conversation_id)
            .cloned()
            .ok_or_else(|| SyncError::Api {
                endpoint: "conversations.info".to_string(),
                error: ApiError::from_platform("channel_not_found"),
            })
    }

    async fn user_info(&self, user_id: &UserId) -> SyncResult<WireUser> {
        self.record("users.info", user_id.as_str())?;
        if !self.user_delay.is_zero() {
            tokio::time::sleep(self.user_delay).await;
        }
        Ok(WireUser {
            id: user_id.clone(),
            name: String::new(),
            profile: WireProfile {
                display_name: self.users.get(user_id.as_str()).cloned().unwrap_or_default(),
                ..WireProfile::default()
            },
        })
    }

    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        thread_root_id: Option<&Ts>,
    ) -> SyncResult<()> {
        let root = thread_root_id.map(Ts::to_string).unwrap_or_default();
        self.record("chat.postMessage", format!("{conversation_id} {text} {root}"))
    }

    async fn update_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        text: &str,
    ) -> SyncResult<()> {
        self.record("chat.update", format!("{conversation_id} {message_id} {text}"))
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
    ) -> SyncResult<()> {
        self.record("chat.delete", format!("{conversation_id} {message_id}"))
    }

    async fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()> {
        self.record("reactions.add", format!("{conversation_id} {message_id} {name}"))
    }

    async fn remove_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()> {
        self.record("reactions.remove", format!("{conversation_id} {message_id} {name}"))
    }

    async fn mark_read(&self, conversation_id: &ConversationId, ts: &Ts) -> SyncResult<()> {
        self.record("conversations.mark", format!("{conversation_id} {ts}"))
    }
}
