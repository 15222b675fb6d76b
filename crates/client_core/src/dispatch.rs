use shared::{
    domain::{ConversationId, Message, Presence, Ts, UserId},
    protocol::{
        ConversationMarkedEvent, Envelope, MemberEvent, MessageEvent, PresenceChangeEvent,
        ReactionEvent,
    },
};
use tracing::{debug, trace, warn};

use crate::session::{SessionState, StoreMutation, ViewKind};

/// Typed payload of one live frame.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    MemberJoined(MemberEvent),
    MemberLeft(MemberEvent),
    PresenceChange(PresenceChangeEvent),
    ConversationMarked(ConversationMarkedEvent),
    Unknown { kind: String },
}

pub type Decoder = fn(&str) -> serde_json::Result<LiveEvent>;

fn decode_message(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::Message)
}

fn decode_reaction_added(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::ReactionAdded)
}

fn decode_reaction_removed(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::ReactionRemoved)
}

fn decode_member_joined(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::MemberJoined)
}

fn decode_member_left(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::MemberLeft)
}

fn decode_presence_change(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::PresenceChange)
}

fn decode_marked(raw: &str) -> serde_json::Result<LiveEvent> {
    serde_json::from_str(raw).map(LiveEvent::ConversationMarked)
}

/// Frame `type` discriminators the client understands.
pub const DECODERS: &[(&str, Decoder)] = &[
    ("message", decode_message),
    ("reaction_added", decode_reaction_added),
    ("reaction_removed", decode_reaction_removed),
    ("member_joined_channel", decode_member_joined),
    ("member_left_channel", decode_member_left),
    ("presence_change", decode_presence_change),
    ("channel_marked", decode_marked),
    ("group_marked", decode_marked),
    ("im_marked", decode_marked),
];

pub fn decoder_for(kind: &str) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, decoder)| *decoder)
}

/// Reads the `type` of a frame and decodes the rest with the matching decoder.
pub fn decode_frame(raw: &str) -> serde_json::Result<LiveEvent> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    match decoder_for(&envelope.kind) {
        Some(decoder) => decoder(raw),
        None => Ok(LiveEvent::Unknown {
            kind: envelope.kind,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEventKind {
    NewMessage(Message),
    MessageEdited { message_id: Ts, body: String, edited: bool },
    MessageDeleted { message_id: Ts },
    ReactionAdded { message_id: Ts, name: String, user_id: UserId },
    ReactionRemoved { message_id: Ts, name: String, user_id: UserId },
    MemberJoined { user_id: UserId },
    MemberLeft { user_id: UserId },
    PresenceChanged { user_ids: Vec<UserId>, presence: Presence },
    ConversationMarked { ts: Ts },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    /// `None` for user-scoped events such as presence.
    pub conversation_id: Option<ConversationId>,
    pub kind: DomainEventKind,
}

impl DomainEvent {
    fn scoped(conversation_id: ConversationId, kind: DomainEventKind) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            kind,
        }
    }
}

pub fn classify(event: LiveEvent) -> Option<DomainEvent> {
    match event {
        LiveEvent::Message(message) => classify_message(message),
        LiveEvent::ReactionAdded(reaction) => {
            let (conversation_id, message_id) = reaction_target(&reaction)?;
            Some(DomainEvent::scoped(
                conversation_id,
                DomainEventKind::ReactionAdded {
                    message_id,
                    name: reaction.reaction,
                    user_id: reaction.user,
                },
            ))
        }
        LiveEvent::ReactionRemoved(reaction) => {
            let (conversation_id, message_id) = reaction_target(&reaction)?;
            Some(DomainEvent::scoped(
                conversation_id,
                DomainEventKind::ReactionRemoved {
                    message_id,
                    name: reaction.reaction,
                    user_id: reaction.user,
                },
            ))
        }
        LiveEvent::MemberJoined(member) => Some(DomainEvent::scoped(
            member.channel,
            DomainEventKind::MemberJoined {
                user_id: member.user,
            },
        )),
        LiveEvent::MemberLeft(member) => Some(DomainEvent::scoped(
            member.channel,
            DomainEventKind::MemberLeft {
                user_id: member.user,
            },
        )),
        LiveEvent::PresenceChange(change) => {
            let user_ids: Vec<UserId> = change.user.into_iter().chain(change.users).collect();
            if user_ids.is_empty() {
                return None;
            }
            Some(DomainEvent {
                conversation_id: None,
                kind: DomainEventKind::PresenceChanged {
                    user_ids,
                    presence: Presence::parse(&change.presence),
                },
            })
        }
        LiveEvent::ConversationMarked(marked) => Some(DomainEvent::scoped(
            marked.channel,
            DomainEventKind::ConversationMarked { ts: marked.ts },
        )),
        LiveEvent::Unknown { kind } => {
            trace!(kind = %kind, "live: ignoring unknown event");
            None
        }
    }
}

fn classify_message(event: MessageEvent) -> Option<DomainEvent> {
    let conversation_id = event.channel.clone();
    match event.subtype.as_deref() {
        Some("message_changed") => {
            let Some(changed) = event.message else {
                warn!(conversation_id = %conversation_id, "live: message_changed without message");
                return None;
            };
            Some(DomainEvent::scoped(
                conversation_id,
                DomainEventKind::MessageEdited {
                    message_id: changed.ts,
                    body: changed.text,
                    edited: changed.edited.is_some(),
                },
            ))
        }
        Some("message_deleted") => {
            let Some(message_id) = event.deleted_ts else {
                warn!(conversation_id = %conversation_id, "live: message_deleted without deleted_ts");
                return None;
            };
            Some(DomainEvent::scoped(
                conversation_id,
                DomainEventKind::MessageDeleted { message_id },
            ))
        }
        Some("message_replied") => None,
        _ => {
            let message = event.into_message()?;
            Some(DomainEvent::scoped(
                conversation_id,
                DomainEventKind::NewMessage(message),
            ))
        }
    }
}

fn reaction_target(reaction: &ReactionEvent) -> Option<(ConversationId, Ts)> {
    if reaction.item.kind != "message" {
        debug!(kind = %reaction.item.kind, "live: ignoring reaction on non-message item");
        return None;
    }
    Some((reaction.item.channel.clone()?, reaction.item.ts.clone()?))
}

/// Applies one classified event to the session, reporting every change made.
pub fn route(event: DomainEvent, state: &mut SessionState) -> Vec<StoreMutation> {
    let mut mutations = Vec::new();
    let Some(conversation_id) = event.conversation_id else {
        if let DomainEventKind::PresenceChanged { user_ids, presence } = event.kind {
            apply_presence(state, &user_ids, presence, &mut mutations);
        }
        return mutations;
    };

    let is_open = state.is_open(&conversation_id);
    match event.kind {
        DomainEventKind::NewMessage(message) => {
            if message.is_thread_root() {
                observe_latest(state, &conversation_id, &message.id, &mut mutations);
            }
            if !is_open {
                return mutations;
            }
            let message_id = message.id.clone();
            if let Some(thread) = state.thread_for(&conversation_id, &message.thread_root_id) {
                if thread.store.insert(message.clone()) {
                    mutations.push(StoreMutation::Inserted {
                        view: ViewKind::Thread,
                        message_id: message_id.clone(),
                    });
                }
            }
            if let Some(main) = state.main_store_mut() {
                if main.insert(message) {
                    mutations.push(StoreMutation::Inserted {
                        view: ViewKind::Conversation,
                        message_id,
                    });
                }
            }
        }
        DomainEventKind::MessageEdited {
            message_id,
            body,
            edited,
        } if is_open => {
            for (view, store) in state.stores_mut(&conversation_id) {
                if store.edit_body(&message_id, body.clone(), edited) {
                    mutations.push(StoreMutation::Edited {
                        view,
                        message_id: message_id.clone(),
                    });
                }
            }
        }
        DomainEventKind::MessageDeleted { message_id } if is_open => {
            for (view, store) in state.stores_mut(&conversation_id) {
                if store.delete(&message_id).is_some() {
                    mutations.push(StoreMutation::Deleted {
                        view,
                        message_id: message_id.clone(),
                    });
                }
            }
        }
        DomainEventKind::ReactionAdded {
            message_id,
            name,
            user_id,
        } if is_open => {
            for (view, store) in state.stores_mut(&conversation_id) {
                if store.add_reaction(&message_id, &name, &user_id) {
                    mutations.push(StoreMutation::ReactionsChanged {
                        view,
                        message_id: message_id.clone(),
                    });
                }
            }
        }
        DomainEventKind::ReactionRemoved {
            message_id,
            name,
            user_id,
        } if is_open => {
            for (view, store) in state.stores_mut(&conversation_id) {
                if store.remove_reaction(&message_id, &name, &user_id) {
                    mutations.push(StoreMutation::ReactionsChanged {
                        view,
                        message_id: message_id.clone(),
                    });
                }
            }
        }
        DomainEventKind::MemberJoined { user_id } => {
            apply_membership(state, conversation_id, user_id, true, &mut mutations);
        }
        DomainEventKind::MemberLeft { user_id } => {
            apply_membership(state, conversation_id, user_id, false, &mut mutations);
        }
        DomainEventKind::ConversationMarked { ts } => {
            state.read_state.mark_read(&conversation_id, &ts);
            if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
                conversation.last_read = Some(ts);
            }
            mutations.push(StoreMutation::ReadStateChanged {
                unread: state.read_state.is_unread(&conversation_id),
                conversation_id,
            });
        }
        DomainEventKind::PresenceChanged { user_ids, presence } => {
            apply_presence(state, &user_ids, presence, &mut mutations);
        }
        _ => {
            trace!(conversation_id = %conversation_id, "live: event for a conversation that is not open");
        }
    }
    mutations
}

fn observe_latest(
    state: &mut SessionState,
    conversation_id: &ConversationId,
    ts: &Ts,
    mutations: &mut Vec<StoreMutation>,
) {
    let was_unread = state.read_state.is_unread(conversation_id);
    if !state.read_state.observe(conversation_id, ts) {
        return;
    }
    if let Some(conversation) = state.conversations.get_mut(conversation_id) {
        conversation.latest_message = Some(ts.clone());
    }
    let unread = state.read_state.is_unread(conversation_id);
    if unread != was_unread {
        mutations.push(StoreMutation::ReadStateChanged {
            conversation_id: conversation_id.clone(),
            unread,
        });
    }
}

fn apply_membership(
    state: &mut SessionState,
    conversation_id: ConversationId,
    user_id: UserId,
    joined: bool,
    mutations: &mut Vec<StoreMutation>,
) {
    if state.self_user.as_ref() == Some(&user_id) {
        if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
            conversation.is_member = joined;
        }
    }
    mutations.push(StoreMutation::MembershipChanged {
        conversation_id,
        user_id,
        joined,
    });
}

fn apply_presence(
    state: &mut SessionState,
    user_ids: &[UserId],
    presence: Presence,
    mutations: &mut Vec<StoreMutation>,
) {
    for conversation in state.conversations.values_mut() {
        let Some(peer) = &conversation.peer_user_id else {
            continue;
        };
        if user_ids.contains(peer) && conversation.peer_presence != presence {
            conversation.peer_presence = presence;
            mutations.push(StoreMutation::PresenceChanged {
                user_id: peer.clone(),
                presence,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::Conversation;

    use super::*;
    use crate::{message_store::MessageStore, session::ThreadView};

    fn open_state() -> SessionState {
        let mut state = SessionState::default();
        state.open_conversation(
            ConversationId::from("C1"),
            MessageStore::from_messages([
                Message::new("10", "U1", "first"),
                Message::new("20", "U1", "root"),
            ]),
        );
        state
    }

    fn frame(raw: &str) -> DomainEvent {
        classify(decode_frame(raw).expect("decode")).expect("classified")
    }

    #[test]
    fn unknown_frame_types_decode_to_unknown() {
        let event = decode_frame(r#"{"type":"hello"}"#).expect("decode");
        assert!(matches!(event, LiveEvent::Unknown { ref kind } if kind == "hello"));
        assert!(classify(event).is_none());
    }

    #[test]
    fn every_known_discriminator_has_one_decoder() {
        for (kind, _) in DECODERS {
            assert_eq!(
                DECODERS.iter().filter(|(name, _)| name == kind).count(),
                1,
                "{kind}"
            );
        }
        assert!(decoder_for("im_marked").is_some());
        assert!(decoder_for("typing").is_none());
    }

    #[test]
    fn malformed_known_frame_is_a_decode_error() {
        assert!(decode_frame(r#"{"type":"reaction_added","user":42}"#).is_err());
    }

    #[test]
    fn message_subtypes_map_to_edit_and_delete() {
        let edited = frame(
            r#"{"type":"message","subtype":"message_changed","channel":"C1","message":{"ts":"10","text":"new","edited":{"user":"U1","ts":"11"}}}"#,
        );
        assert_eq!(
            edited.kind,
            DomainEventKind::MessageEdited {
                message_id: Ts::from("10"),
                body: "new".to_string(),
                edited: true,
            }
        );

        let deleted =
            frame(r#"{"type":"message","subtype":"message_deleted","channel":"C1","deleted_ts":"10"}"#);
        assert_eq!(
            deleted.kind,
            DomainEventKind::MessageDeleted {
                message_id: Ts::from("10")
            }
        );

        let replied = decode_frame(
            r#"{"type":"message","subtype":"message_replied","channel":"C1","message":{"ts":"20"}}"#,
        )
        .expect("decode");
        assert!(classify(replied).is_none());
    }

    #[test]
    fn reactions_on_files_are_ignored() {
        let event = decode_frame(
            r#"{"type":"reaction_added","user":"U2","reaction":"eyes","item":{"type":"file","file":"F1"}}"#,
        )
        .expect("decode");
        assert!(classify(event).is_none());
    }

    #[test]
    fn live_reply_lands_in_main_and_open_thread() {
        let mut state = open_state();
        state.thread = Some(ThreadView {
            conversation_id: ConversationId::from("C1"),
            root_id: Ts::from("20"),
            store: MessageStore::from_messages([Message::new("20", "U1", "root")]),
        });

        let mutations = route(
            frame(r#"{"type":"message","channel":"C1","user":"U2","text":"hi","ts":"21","thread_ts":"20"}"#),
            &mut state,
        );

        assert_eq!(
            mutations,
            vec![
                StoreMutation::Inserted {
                    view: ViewKind::Thread,
                    message_id: Ts::from("21")
                },
                StoreMutation::Inserted {
                    view: ViewKind::Conversation,
                    message_id: Ts::from("21")
                },
            ]
        );
        assert!(route(
            frame(r#"{"type":"message","channel":"C1","user":"U2","text":"hi","ts":"21","thread_ts":"20"}"#),
            &mut state,
        )
        .is_empty());
    }

    #[test]
    fn other_conversations_only_move_read_state() {
        let mut state = open_state();
        state
            .conversations
            .insert(ConversationId::from("C2"), Conversation::new("C2", "random"));

        let mutations = route(
            frame(r#"{"type":"message","channel":"C2","user":"U2","text":"psst","ts":"50"}"#),
            &mut state,
        );

        assert_eq!(
            mutations,
            vec![StoreMutation::ReadStateChanged {
                conversation_id: ConversationId::from("C2"),
                unread: true
            }]
        );
        assert_eq!(state.main_store().map(MessageStore::len), Some(2));
        assert_eq!(
            state.conversations[&ConversationId::from("C2")].latest_message,
            Some(Ts::from("50"))
        );
    }

    #[test]
    fn reply_count_echo_on_a_root_is_not_an_edit() {
        let mut state = open_state();
        let mutations = route(
            frame(r#"{"type":"message","subtype":"message_changed","channel":"C1","message":{"ts":"20","text":"root","thread_ts":"20","reply_count":1}}"#),
            &mut state,
        );
        assert_eq!(
            mutations,
            vec![StoreMutation::Edited {
                view: ViewKind::Conversation,
                message_id: Ts::from("20")
            }]
        );
        let root = state
            .main_store()
            .and_then(|store| store.get(&Ts::from("20")))
            .expect("root");
        assert!(!root.edited);

        route(
            frame(r#"{"type":"message","subtype":"message_changed","channel":"C1","message":{"ts":"20","text":"root v2","edited":{"user":"U1","ts":"21"}}}"#),
            &mut state,
        );
        let root = state
            .main_store()
            .and_then(|store| store.get(&Ts::from("20")))
            .expect("root");
        assert_eq!(root.body, "root v2");
        assert!(root.edited);
    }

    #[test]
    fn late_edit_for_unknown_message_is_a_no_op() {
        let mut state = open_state();
        let mutations = route(
            frame(r#"{"type":"message","subtype":"message_changed","channel":"C1","message":{"ts":"99","text":"x"}}"#),
            &mut state,
        );
        assert!(mutations.is_empty());
    }

    #[test]
    fn presence_updates_direct_message_peers() {
        let mut state = open_state();
        let mut direct = Conversation::new("D1", "jane");
        direct.peer_user_id = Some(UserId::from("U7"));
        state.conversations.insert(direct.id.clone(), direct);

        let mutations = route(
            frame(r#"{"type":"presence_change","users":["U7","U8"],"presence":"active"}"#),
            &mut state,
        );

        assert_eq!(
            mutations,
            vec![StoreMutation::PresenceChanged {
                user_id: UserId::from("U7"),
                presence: Presence::Active
            }]
        );
    }

    #[test]
    fn remote_mark_moves_last_read() {
        let mut state = open_state();
        state.read_state.observe(&ConversationId::from("C1"), &Ts::from("20"));

        let mutations = route(frame(r#"{"type":"channel_marked","channel":"C1","ts":"20"}"#), &mut state);

        assert_eq!(
            mutations,
            vec![StoreMutation::ReadStateChanged {
                conversation_id: ConversationId::from("C1"),
                unread: false
            }]
        );
    }
}
