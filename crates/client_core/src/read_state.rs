use std::collections::HashMap;

use shared::domain::{ConversationId, Ts};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    pub last_read: Option<Ts>,
    pub latest: Option<Ts>,
}

impl ReadState {
    pub fn is_unread(&self) -> bool {
        match &self.latest {
            Some(latest) => self.last_read.as_ref().map_or("", Ts::as_str) < latest.as_str(),
            None => false,
        }
    }
}

/// Per-conversation read markers.
#[derive(Debug, Clone, Default)]
pub struct ReadStateTracker {
    states: HashMap<ConversationId, ReadState>,
}

impl ReadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&ReadState> {
        self.states.get(conversation_id)
    }

    pub fn seed(&mut self, conversation_id: ConversationId, last_read: Option<Ts>, latest: Option<Ts>) {
        let state = self.states.entry(conversation_id).or_default();
        if last_read.is_some() {
            state.last_read = last_read;
        }
        if let Some(latest) = latest {
            advance(&mut state.latest, latest);
        }
    }

    /// Advances `latest` when `ts` is newer; returns whether it moved.
    pub fn observe(&mut self, conversation_id: &ConversationId, ts: &Ts) -> bool {
        let state = self.states.entry(conversation_id.clone()).or_default();
        advance(&mut state.latest, ts.clone())
    }

    /// Sets `last_read` unconditionally, also advancing `latest` if needed.
    pub fn mark_read(&mut self, conversation_id: &ConversationId, ts: &Ts) {
        let state = self.states.entry(conversation_id.clone()).or_default();
        state.last_read = Some(ts.clone());
        advance(&mut state.latest, ts.clone());
    }

    pub fn is_unread(&self, conversation_id: &ConversationId) -> bool {
        self.states
            .get(conversation_id)
            .is_some_and(ReadState::is_unread)
    }
}

fn advance(slot: &mut Option<Ts>, candidate: Ts) -> bool {
    match slot {
        Some(current) if *current >= candidate => false,
        _ => {
            *slot = Some(candidate);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_message_than_last_read_is_unread_until_marked() {
        let id = ConversationId::from("C1");
        let mut tracker = ReadStateTracker::new();
        tracker.seed(id.clone(), Some(Ts::from("100.0")), Some(Ts::from("200.0")));
        assert!(tracker.is_unread(&id));

        tracker.mark_read(&id, &Ts::from("200.0"));
        assert!(!tracker.is_unread(&id));
    }

    #[test]
    fn latest_only_moves_forward() {
        let id = ConversationId::from("C1");
        let mut tracker = ReadStateTracker::new();
        assert!(tracker.observe(&id, &Ts::from("200.0")));
        assert!(!tracker.observe(&id, &Ts::from("150.0")));
        assert_eq!(
            tracker.get(&id).and_then(|state| state.latest.clone()),
            Some(Ts::from("200.0"))
        );
    }

    #[test]
    fn missing_last_read_counts_as_unread_once_anything_arrives() {
        let id = ConversationId::from("D1");
        let mut tracker = ReadStateTracker::new();
        assert!(!tracker.is_unread(&id));
        tracker.observe(&id, &Ts::from("1.0"));
        assert!(tracker.is_unread(&id));
    }
}
