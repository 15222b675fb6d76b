use shared::{
    domain::{ConversationId, Message, Ts},
    protocol::WireMessage,
};
use tracing::{debug, info, warn};

use crate::{
    api::PlatformApi,
    error::{SyncError, SyncResult},
    pagination::paginate,
    retry::RateLimitedCaller,
};

pub const HISTORY_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedHistory {
    pub conversation_id: ConversationId,
    /// Oldest first, each thread root followed by its replies.
    pub messages: Vec<Message>,
    pub latest_ts: Option<Ts>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedThread {
    pub conversation_id: ConversationId,
    pub root_id: Ts,
    pub messages: Vec<Message>,
}

pub struct HistoryLoader<'a> {
    api: &'a dyn PlatformApi,
}

impl<'a> HistoryLoader<'a> {
    pub fn new(api: &'a dyn PlatformApi) -> Self {
        Self { api }
    }

    /// Loads the most recent page of a conversation plus every thread in it.
    ///
    /// Any failure discards what was fetched so far.
    pub async fn load_history(&self, conversation_id: &ConversationId) -> SyncResult<LoadedHistory> {
        self.fetch_history(conversation_id)
            .await
            .map_err(|source| {
                warn!(conversation_id = %conversation_id, error = %source, "history: load failed");
                SyncError::HistoryUnavailable {
                    conversation_id: conversation_id.clone(),
                    source: Box::new(source),
                }
            })
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> SyncResult<LoadedHistory> {
        let newest_first = RateLimitedCaller::new("conversations.history")
            .call(|| {
                self.api
                    .conversation_history(conversation_id, HISTORY_PAGE_LIMIT)
            })
            .await?;

        let mut messages = Vec::with_capacity(newest_first.len());
        let mut latest_ts = None;
        for wire in newest_first.into_iter().rev() {
            let threaded = wire.has_thread();
            let root = wire.into_message();
            if root.is_thread_root() {
                latest_ts = Some(root.id.clone());
            }
            if !threaded {
                messages.push(root);
                continue;
            }

            let root_id = root.id.clone();
            messages.push(root);
            let replies = self.fetch_replies(conversation_id, &root_id).await?;
            debug!(
                conversation_id = %conversation_id,
                root_id = %root_id,
                replies = replies.len(),
                "history: thread replies fetched"
            );
            messages.extend(
                replies
                    .into_iter()
                    .filter(|reply| reply.ts != root_id)
                    .map(WireMessage::into_message),
            );
        }

        info!(
            conversation_id = %conversation_id,
            messages = messages.len(),
            "history: loaded"
        );
        Ok(LoadedHistory {
            conversation_id: conversation_id.clone(),
            messages,
            latest_ts,
        })
    }

    /// Loads an open thread, root included.
    pub async fn load_thread(&self, conversation_id: &ConversationId, root_id: &Ts) -> SyncResult<LoadedThread> {
        let messages = self
            .fetch_replies(conversation_id, root_id)
            .await
            .map_err(|source| {
                warn!(
                    conversation_id = %conversation_id,
                    root_id = %root_id,
                    error = %source,
                    "history: thread load failed"
                );
                SyncError::HistoryUnavailable {
                    conversation_id: conversation_id.clone(),
                    source: Box::new(source),
                }
            })?
            .into_iter()
            .map(WireMessage::into_message)
            .collect();

        Ok(LoadedThread {
            conversation_id: conversation_id.clone(),
            root_id: root_id.clone(),
            messages,
        })
    }

    async fn fetch_replies(&self, conversation_id: &ConversationId, root_id: &Ts) -> SyncResult<Vec<WireMessage>> {
        paginate("conversations.replies", |cursor| async move {
            self.api
                .conversation_replies(conversation_id, root_id, &cursor)
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pagination::Page,
        test_support::{wire, FakeApi},
    };

    fn threaded_api() -> FakeApi {
        let mut api = FakeApi::default();
        api.history.insert(
            "C1".to_string(),
            vec![wire("30", None), wire("20", Some("20")), wire("10", None)],
        );
        api.replies.insert(
            ("20".to_string(), String::new()),
            Page::new(
                vec![wire("20", Some("20")), wire("21", Some("20"))],
                Some("more".to_string()),
            ),
        );
        api.replies.insert(
            ("20".to_string(), "more".to_string()),
            Page::last(vec![wire("22", Some("20"))]),
        );
        api
    }

    #[tokio::test]
    async fn interleaves_roots_with_their_replies_oldest_first() {
        let api = threaded_api();
        let loaded = HistoryLoader::new(&api)
            .load_history(&ConversationId::from("C1"))
            .await
            .expect("history");

        let order: Vec<_> = loaded.messages.iter().map(|m| m.id.to_string()).collect();
        assert_eq!(order, vec!["10", "20", "21", "22", "30"]);
        assert_eq!(loaded.latest_ts, Some(Ts::from("30")));
        assert_eq!(
            api.calls(),
            vec![
                "conversations.history C1 100",
                "conversations.replies C1 20",
                "conversations.replies C1 20 more",
            ]
        );
    }

    #[tokio::test]
    async fn a_failing_thread_fetch_discards_the_whole_load() {
        let api = threaded_api().failing("conversations.replies");
        let err = HistoryLoader::new(&api)
            .load_history(&ConversationId::from("C1"))
            .await
            .expect_err("load should fail");

        match err {
            SyncError::HistoryUnavailable {
                conversation_id,
                source,
            } => {
                assert_eq!(conversation_id, ConversationId::from("C1"));
                assert!(matches!(*source, SyncError::Api { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn thread_load_keeps_the_root() {
        let api = threaded_api();
        let thread = HistoryLoader::new(&api)
            .load_thread(&ConversationId::from("C1"), &Ts::from("20"))
            .await
            .expect("thread");

        let order: Vec<_> = thread.messages.iter().map(|m| m.id.to_string()).collect();
        assert_eq!(order, vec!["20", "21", "22"]);
        assert_eq!(thread.root_id, Ts::from("20"));
    }
}
