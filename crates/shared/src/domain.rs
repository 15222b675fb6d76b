use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(ConversationId);
id_newtype!(UserId);
id_newtype!(Ts);

impl Ts {
    /// Platform timestamps are `"<seconds>.<micros>"`.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let (secs, frac) = self.0.split_once('.').unwrap_or((self.0.as_str(), "0"));
        let secs = secs.parse::<i64>().ok()?;
        let micros = frac.get(..frac.len().min(6))?.parse::<u32>().ok()?;
        let scale = 10u32.pow(6 - frac.len().min(6) as u32);
        DateTime::from_timestamp(secs, micros * scale * 1_000)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Active,
    Away,
    #[default]
    Unknown,
}

impl Presence {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "away" => Self::Away,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url_private: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permalink: Option<String>,
    },
    Link {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Ts,
    pub thread_root_id: Ts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reply_users: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub edited: bool,
    pub is_collapsed: bool,
}

impl Message {
    pub fn new(id: impl Into<Ts>, author_id: impl Into<UserId>, body: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            thread_root_id: id.clone(),
            id,
            author_id: Some(author_id.into()),
            body: body.into(),
            attachments: Vec::new(),
            reactions: BTreeMap::new(),
            reply_count: 0,
            reply_users: Vec::new(),
            subtype: None,
            edited: false,
            is_collapsed: true,
        }
    }

    pub fn reply(
        id: impl Into<Ts>,
        thread_root_id: impl Into<Ts>,
        author_id: impl Into<UserId>,
        body: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(id, author_id, body);
        message.thread_root_id = thread_root_id.into();
        message
    }

    pub fn is_thread_root(&self) -> bool {
        self.id == self.thread_root_id
    }

    pub fn is_reply(&self) -> bool {
        !self.is_thread_root()
    }

    pub fn reaction_count(&self, name: &str) -> usize {
        self.reactions.get(name).map_or(0, BTreeSet::len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<Ts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_message: Option<Ts>,
    pub is_member: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_user_id: Option<UserId>,
    #[serde(default)]
    pub peer_presence: Presence,
}

impl Conversation {
    pub fn new(id: impl Into<ConversationId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_read: None,
            latest_message: None,
            is_member: true,
            peer_user_id: None,
            peer_presence: Presence::Unknown,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.peer_user_id.is_some()
    }
}
