use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{Attachment, ConversationId, Message, Ts, UserId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireReaction {
    pub name: String,
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireLinkAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
}

fn collect_attachments(files: Vec<WireFile>, links: Vec<WireLinkAttachment>) -> Vec<Attachment> {
    let files = files.into_iter().map(|file| Attachment::File {
        name: file.name,
        url_private: file.url_private,
        permalink: file.permalink,
    });
    let links = links.into_iter().map(|link| Attachment::Link {
        title: link.title,
        url: link.from_url.or(link.original_url),
        image_url: link.image_url.or(link.thumb_url),
    });
    files.chain(links).collect()
}

/// A message as returned by the history and replies endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMessage {
    pub ts: Ts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<Ts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<WireFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<WireLinkAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<WireReaction>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_users: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<serde_json::Value>,
}

impl WireMessage {
    /// True when the platform reports this message as the root of a thread.
    pub fn has_thread(&self) -> bool {
        self.thread_ts.as_ref() == Some(&self.ts)
    }

    pub fn into_message(self) -> Message {
        let thread_root_id = self.thread_ts.unwrap_or_else(|| self.ts.clone());
        let reactions: BTreeMap<String, BTreeSet<UserId>> = self
            .reactions
            .into_iter()
            .map(|reaction| (reaction.name, reaction.users.into_iter().collect()))
            .collect();
        Message {
            id: self.ts,
            thread_root_id,
            author_id: self.user,
            body: self.text,
            attachments: collect_attachments(self.files, self.attachments),
            reactions,
            reply_count: self.reply_count,
            reply_users: self.reply_users,
            subtype: self.subtype,
            edited: self.edited.is_some(),
            is_collapsed: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

/// Shared shape of `conversations.history` and `conversations.replies`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePageResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_metadata: Option<ResponseMetadata>,
}

impl MessagePageResponse {
    pub fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .map(|meta| meta.next_cursor.clone())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthTestResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireUser {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profile: WireProfile,
}

impl WireUser {
    pub fn display_name(&self) -> String {
        [
            &self.profile.display_name,
            &self.profile.first_name,
            &self.profile.real_name,
            &self.name,
        ]
        .into_iter()
        .find(|candidate| !candidate.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<WireUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireConversation {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<Ts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub channels: Vec<WireConversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_metadata: Option<ResponseMetadata>,
}

impl ConversationListResponse {
    pub fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .map(|meta| meta.next_cursor.clone())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationInfoResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<WireConversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub channel: ConversationId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<Ts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMessageRequest {
    pub channel: ConversationId,
    pub ts: Ts,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub channel: ConversationId,
    pub ts: Ts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub channel: ConversationId,
    pub timestamp: Ts,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRequest {
    pub channel: ConversationId,
    pub ts: Ts,
}

/// Minimal view of a live frame, enough to pick a decoder.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangedMessage {
    pub ts: Ts,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<Ts>,
    /// Present only when a person changed the text; reply-count echoes on a root omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Ts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<Ts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<WireFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<WireLinkAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_ts: Option<Ts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChangedMessage>,
}

impl MessageEvent {
    pub fn into_message(self) -> Option<Message> {
        let ts = self.ts?;
        let thread_root_id = self.thread_ts.unwrap_or_else(|| ts.clone());
        Some(Message {
            thread_root_id,
            id: ts,
            author_id: self.user,
            body: self.text,
            attachments: collect_attachments(self.files, self.attachments),
            reactions: BTreeMap::new(),
            reply_count: 0,
            reply_users: Vec::new(),
            subtype: self.subtype,
            edited: false,
            is_collapsed: true,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Ts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub user: UserId,
    pub reaction: String,
    pub item: ReactionItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_ts: Option<Ts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberEvent {
    pub user: UserId,
    pub channel: ConversationId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceChangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserId>,
    pub presence: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMarkedEvent {
    pub channel: ConversationId,
    pub ts: Ts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_without_thread_is_its_own_root() {
        let wire: WireMessage = serde_json::from_str(
            r#"{"ts":"10.0","user":"U1","text":"hello","reactions":[{"name":"wave","users":["U2","U3"],"count":2}]}"#,
        )
        .expect("wire message");
        assert!(!wire.has_thread());
        let message = wire.into_message();
        assert!(message.is_thread_root());
        assert!(message.is_collapsed);
        assert_eq!(message.reaction_count("wave"), 2);
    }

    #[test]
    fn history_page_exposes_next_cursor_only_when_present() {
        let page: MessagePageResponse = serde_json::from_str(
            r#"{"ok":true,"messages":[],"response_metadata":{"next_cursor":""}}"#,
        )
        .expect("page");
        assert_eq!(page.next_cursor(), None);

        let page: MessagePageResponse = serde_json::from_str(
            r#"{"ok":true,"messages":[],"response_metadata":{"next_cursor":"abc"}}"#,
        )
        .expect("page");
        assert_eq!(page.next_cursor().as_deref(), Some("abc"));
    }

    #[test]
    fn user_display_name_falls_back_through_profile() {
        let user: WireUser = serde_json::from_str(
            r#"{"id":"U1","name":"jdoe","profile":{"display_name":"","first_name":"Jane"}}"#,
        )
        .expect("user");
        assert_eq!(user.display_name(), "Jane");
    }

    #[test]
    fn files_and_links_become_attachments() {
        let event: MessageEvent = serde_json::from_str(
            r#"{"channel":"C1","ts":"5.0","files":[{"permalink":"https://p"}],"attachments":[{"from_url":"https://l"}]}"#,
        )
        .expect("event");
        let message = event.into_message().expect("message");
        assert_eq!(message.attachments.len(), 2);
        assert!(matches!(message.attachments[0], Attachment::File { .. }));
    }
}
