use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ConversationId, Ts, UserId},
    error::ApiError,
    protocol::{
        AuthTestResponse, ConversationInfoResponse, ConversationListResponse,
        DeleteMessageRequest, MarkRequest, MessagePageResponse, OkResponse, PostMessageRequest,
        ReactionRequest, UpdateMessageRequest, UserInfoResponse, WireConversation, WireMessage,
        WireUser,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    error::{SyncError, SyncResult},
    pagination::Page,
};

pub const DEFAULT_API_URL: &str = "https://slack.com/api/";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const CONVERSATION_LIST_LIMIT: u32 = 100;
const REPLIES_PAGE_LIMIT: u32 = 100;

/// The remote operations the synchronization core depends on.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn auth_test(&self) -> SyncResult<UserId>;
    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> SyncResult<Vec<WireMessage>>;
    async fn conversation_replies(
        &self,
        conversation_id: &ConversationId,
        root_id: &Ts,
        cursor: &str,
    ) -> SyncResult<Page<WireMessage>>;
    async fn list_conversations(&self, cursor: &str) -> SyncResult<Page<WireConversation>>;
    async fn conversation_info(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<WireConversation>;
    async fn latest_message(&self, conversation_id: &ConversationId) -> SyncResult<Option<Ts>> {
        let messages = self.conversation_history(conversation_id, 1).await?;
        Ok(messages.into_iter().next().map(|message| message.ts))
    }
    async fn user_info(&self, user_id: &UserId) -> SyncResult<WireUser>;
    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        thread_root_id: Option<&Ts>,
    ) -> SyncResult<()>;
    async fn update_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        text: &str,
    ) -> SyncResult<()>;
    async fn delete_message(&self, conversation_id: &ConversationId, message_id: &Ts)
        -> SyncResult<()>;
    async fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()>;
    async fn remove_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()>;
    async fn mark_read(&self, conversation_id: &ConversationId, ts: &Ts) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub cookie: Option<String>,
}

/// [`PlatformApi`] over the platform's HTTP Web API.
pub struct HttpPlatformApi {
    http: Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpPlatformApi {
    pub fn new(base_url: &str, credentials: Credentials) -> SyncResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|err| SyncError::decode("api base url", err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            credentials,
        })
    }

    fn endpoint_url(&self, method: &str) -> SyncResult<Url> {
        self.base_url
            .join(method)
            .map_err(|err| SyncError::decode(method, err.to_string()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.bearer_auth(&self.credentials.token);
        match &self.credentials.cookie {
            Some(cookie) => request.header(header::COOKIE, format!("d={cookie}")),
            None => request,
        }
    }

    async fn get<R, Q>(&self, method: &'static str, query: &Q) -> SyncResult<R>
    where
        R: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = self.http.get(self.endpoint_url(method)?).query(query);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| SyncError::transport(method, err))?;
        decode_response(method, response).await
    }

    async fn post<R, B>(&self, method: &'static str, body: &B) -> SyncResult<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.http.post(self.endpoint_url(method)?).json(body);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| SyncError::transport(method, err))?;
        decode_response(method, response).await
    }

    async fn post_ok<B>(&self, method: &'static str, body: &B) -> SyncResult<()>
    where
        B: Serialize + ?Sized,
    {
        let response: OkResponse = self.post(method, body).await?;
        ensure_ok(method, response.ok, response.error)
    }
}

async fn decode_response<R: DeserializeOwned>(
    endpoint: &'static str,
    response: Response,
) -> SyncResult<R> {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(SyncError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        });
    }

    let response = response
        .error_for_status()
        .map_err(|err| SyncError::transport(endpoint, err))?;
    let body = response
        .bytes()
        .await
        .map_err(|err| SyncError::transport(endpoint, err))?;
    debug!(endpoint, bytes = body.len(), "sync: response received");
    serde_json::from_slice(&body).map_err(|err| SyncError::decode(endpoint, err.to_string()))
}

fn ensure_ok(endpoint: &'static str, ok: bool, error: Option<String>) -> SyncResult<()> {
    if ok {
        return Ok(());
    }
    let raw = error.unwrap_or_else(|| "unknown_error".to_string());
    let error = ApiError::from_platform(&raw);
    if error.code == shared::error::ErrorCode::RateLimited {
        return Err(SyncError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after: DEFAULT_RETRY_AFTER,
        });
    }
    Err(SyncError::Api {
        endpoint: endpoint.to_string(),
        error,
    })
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn auth_test(&self) -> SyncResult<UserId> {
        const METHOD: &str = "auth.test";
        let response: AuthTestResponse = self.post(METHOD, &serde_json::json!({})).await?;
        ensure_ok(METHOD, response.ok, response.error)?;
        response
            .user_id
            .ok_or_else(|| SyncError::decode(METHOD, "missing user_id"))
    }

    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> SyncResult<Vec<WireMessage>> {
        const METHOD: &str = "conversations.history";
        let response: MessagePageResponse = self
            .get(
                METHOD,
                &[
                    ("channel", conversation_id.as_str()),
                    ("limit", &limit.to_string()),
                ],
            )
            .await?;
        ensure_ok(METHOD, response.ok, response.error)?;
        Ok(response.messages)
    }

    async fn conversation_replies(
        &self,
        conversation_id: &ConversationId,
        root_id: &Ts,
        cursor: &str,
    ) -> SyncResult<Page<WireMessage>> {
        const METHOD: &str = "conversations.replies";
        let limit = REPLIES_PAGE_LIMIT.to_string();
        let mut query = vec![
            ("channel", conversation_id.as_str()),
            ("ts", root_id.as_str()),
            ("limit", limit.as_str()),
        ];
        if !cursor.is_empty() {
            query.push(("cursor", cursor));
        }
        let response: MessagePageResponse = self.get(METHOD, &query).await?;
        let next_cursor = response.next_cursor();
        ensure_ok(METHOD, response.ok, response.error)?;
        Ok(Page::new(response.messages, next_cursor))
    }

    async fn list_conversations(&self, cursor: &str) -> SyncResult<Page<WireConversation>> {
        const METHOD: &str = "users.conversations";
        let limit = CONVERSATION_LIST_LIMIT.to_string();
        let mut query = vec![
            ("types", "public_channel,private_channel,im"),
            ("exclude_archived", "true"),
            ("limit", limit.as_str()),
        ];
        if !cursor.is_empty() {
            query.push(("cursor", cursor));
        }
        let response: ConversationListResponse = self.get(METHOD, &query).await?;
        let next_cursor = response.next_cursor();
        ensure_ok(METHOD, response.ok, response.error)?;
        Ok(Page::new(response.channels, next_cursor))
    }

    async fn conversation_info(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<WireConversation> {
        const METHOD: &str = "conversations.info";
        let response: ConversationInfoResponse = self
            .get(METHOD, &[("channel", conversation_id.as_str())])
            .await?;
        ensure_ok(METHOD, response.ok, response.error)?;
        response
            .channel
            .ok_or_else(|| SyncError::decode(METHOD, "missing channel"))
    }

    async fn user_info(&self, user_id: &UserId) -> SyncResult<WireUser> {
        const METHOD: &str = "users.info";
        let response: UserInfoResponse = self.get(METHOD, &[("user", user_id.as_str())]).await?;
        ensure_ok(METHOD, response.ok, response.error)?;
        response
            .user
            .ok_or_else(|| SyncError::decode(METHOD, "missing user"))
    }

    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        thread_root_id: Option<&Ts>,
    ) -> SyncResult<()> {
        self.post_ok(
            "chat.postMessage",
            &PostMessageRequest {
                channel: conversation_id.clone(),
                text: text.to_string(),
                thread_ts: thread_root_id.cloned(),
            },
        )
        .await
    }

    async fn update_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        text: &str,
    ) -> SyncResult<()> {
        self.post_ok(
            "chat.update",
            &UpdateMessageRequest {
                channel: conversation_id.clone(),
                ts: message_id.clone(),
                text: text.to_string(),
            },
        )
        .await
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
    ) -> SyncResult<()> {
        self.post_ok(
            "chat.delete",
            &DeleteMessageRequest {
                channel: conversation_id.clone(),
                ts: message_id.clone(),
            },
        )
        .await
    }

    async fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()> {
        self.post_ok(
            "reactions.add",
            &ReactionRequest {
                channel: conversation_id.clone(),
                timestamp: message_id.clone(),
                name: name.to_string(),
            },
        )
        .await
    }

    async fn remove_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &Ts,
        name: &str,
    ) -> SyncResult<()> {
        self.post_ok(
            "reactions.remove",
            &ReactionRequest {
                channel: conversation_id.clone(),
                timestamp: message_id.clone(),
                name: name.to_string(),
            },
        )
        .await
    }

    async fn mark_read(&self, conversation_id: &ConversationId, ts: &Ts) -> SyncResult<()> {
        self.post_ok(
            "conversations.mark",
            &MarkRequest {
                channel: conversation_id.clone(),
                ts: ts.clone(),
            },
        )
        .await
    }
}
