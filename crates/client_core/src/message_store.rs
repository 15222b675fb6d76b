use shared::domain::{Message, Ts, UserId};

/// Reply authors shown next to a collapsed thread root.
pub const REPLY_AUTHOR_DISPLAY_CAP: usize = 3;

/// Ordered, duplicate-free message collection backing one view.
///
/// Messages stay sorted ascending by id. Inserts are idempotent and
/// updates/deletes on unknown ids are no-ops, so history results and live
/// events may arrive in any interleaving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut store = Self::new();
        store.extend(messages);
        store
    }

    fn position(&self, id: &Ts) -> Result<usize, usize> {
        self.messages.binary_search_by(|message| message.id.cmp(id))
    }

    /// Returns `false` when a message with the same id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        match self.position(&message.id) {
            Ok(_) => false,
            Err(index) => {
                self.messages.insert(index, message);
                true
            }
        }
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|message| self.insert(message))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn update<F>(&mut self, id: &Ts, mutator: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.position(id) {
            Ok(index) => {
                mutator(&mut self.messages[index]);
                true
            }
            Err(_) => false,
        }
    }

    /// Replaces the body; `edited` only ever sets the flag, never clears it.
    pub fn edit_body(&mut self, id: &Ts, body: impl Into<String>, edited: bool) -> bool {
        let body = body.into();
        self.update(id, |message| {
            message.body = body;
            message.edited |= edited;
        })
    }

    pub fn add_reaction(&mut self, id: &Ts, name: &str, user: &UserId) -> bool {
        self.update(id, |message| {
            message
                .reactions
                .entry(name.to_string())
                .or_default()
                .insert(user.clone());
        })
    }

    pub fn remove_reaction(&mut self, id: &Ts, name: &str, user: &UserId) -> bool {
        self.update(id, |message| {
            if let Some(reactors) = message.reactions.get_mut(name) {
                reactors.remove(user);
                if reactors.is_empty() {
                    message.reactions.remove(name);
                }
            }
        })
    }

    pub fn delete(&mut self, id: &Ts) -> Option<Message> {
        self.position(id)
            .ok()
            .map(|index| self.messages.remove(index))
    }

    pub fn get(&self, id: &Ts) -> Option<&Message> {
        self.position(id).ok().map(|index| &self.messages[index])
    }

    pub fn contains(&self, id: &Ts) -> bool {
        self.position(id).is_ok()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message that is not a reply.
    pub fn latest_top_level(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.is_thread_root())
    }

    fn replies_of<'a>(&'a self, root: &'a Ts) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .iter()
            .filter(move |message| message.is_reply() && &message.thread_root_id == root)
    }

    pub fn thread_reply_count(&self, root: &Ts) -> usize {
        self.replies_of(root).count()
    }

    /// Authors of the replies under `root` in first-seen order, at most `cap`.
    pub fn distinct_reply_authors(&self, root: &Ts, cap: usize) -> Vec<UserId> {
        let mut authors: Vec<UserId> = Vec::new();
        for reply in self.replies_of(root) {
            if authors.len() >= cap {
                break;
            }
            if let Some(author) = &reply.author_id {
                if !authors.contains(author) {
                    authors.push(author.clone());
                }
            }
        }
        authors
    }

    pub fn is_visible(&self, message: &Message) -> bool {
        if message.is_thread_root() {
            return true;
        }
        self.get(&message.thread_root_id)
            .is_some_and(|root| !root.is_collapsed)
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|message| self.is_visible(message))
            .collect()
    }

    /// Flips the collapse flag of a thread root, returning the new value.
    pub fn toggle_collapse(&mut self, id: &Ts) -> Option<bool> {
        let index = self.position(id).ok()?;
        let message = &mut self.messages[index];
        if !message.is_thread_root() {
            return None;
        }
        message.is_collapsed = !message.is_collapsed;
        Some(message.is_collapsed)
    }
}
