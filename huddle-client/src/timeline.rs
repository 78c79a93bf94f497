use huddle_proto::Message;

/// Messages of one conversation, kept in ascending `(created_at, id)` order.
///
/// Every write goes through [`Timeline::upsert`], so feeding the same message
/// twice (say, once from the HTTP response and once from the broadcast) leaves
/// a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
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

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.position(message_id).map(|idx| &self.messages[idx])
    }

    /// Pinned messages, oldest first
    pub fn pinned(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_pinned)
    }

    pub fn latest_created_at(&self) -> Option<i64> {
        self.messages.last().map(|m| m.created_at)
    }

    /// Insert or replace by id. A copy older than the one held, or an
    /// undeleted copy of a deleted message, is ignored. Returns whether
    /// anything changed.
    pub fn upsert(&mut self, message: Message) -> bool {
        if let Some(idx) = self.position(&message.id) {
            if self.messages[idx] == message || !message.supersedes(&self.messages[idx]) {
                return false;
            }
            if self.messages[idx].created_at == message.created_at {
                self.messages[idx] = message;
                return true;
            }
            self.messages.remove(idx);
        }

        match self.search(&message) {
            Ok(idx) => self.messages[idx] = message,
            Err(idx) => self.messages.insert(idx, message),
        }
        true
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.upsert(message);
        }
    }

    fn search(&self, message: &Message) -> Result<usize, usize> {
        let key = (message.created_at, message.id.as_str());
        self.messages
            .binary_search_by(|held| (held.created_at, held.id.as_str()).cmp(&key))
    }

    fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id == message_id)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::message;
    use super::*;

    fn ids(timeline: &Timeline) -> Vec<&str> {
        timeline.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_inserts_are_sorted() {
        let mut timeline = Timeline::new();
        timeline.upsert(message("m3", 30, "c"));
        timeline.upsert(message("m1", 10, "a"));
        timeline.upsert(message("m2", 20, "b"));
        assert_eq!(ids(&timeline), vec!["m1", "m2", "m3"]);
        assert_eq!(timeline.latest_created_at(), Some(30));
    }

    #[test]
    fn test_same_message_twice_is_idempotent() {
        let mut timeline = Timeline::new();
        assert!(timeline.upsert(message("m1", 10, "hi")));
        let once = timeline.clone();
        assert!(!timeline.upsert(message("m1", 10, "hi")));
        assert_eq!(timeline, once);
    }

    #[test]
    fn test_replace_in_place() {
        let mut timeline = Timeline::new();
        timeline.upsert(message("m1", 10, "hi"));
        timeline.upsert(message("m2", 20, "yo"));

        let mut deleted = message("m1", 10, "hi");
        deleted.content = None;
        deleted.deleted_at = Some(99);
        deleted.updated_at = 99;
        timeline.upsert(deleted);

        assert_eq!(ids(&timeline), vec!["m1", "m2"]);
        assert!(timeline.get("m1").unwrap().is_deleted());
    }

    #[test]
    fn test_changed_created_at_is_repositioned() {
        let mut timeline = Timeline::new();
        timeline.upsert(message("m1", 10, "a"));
        timeline.upsert(message("m2", 20, "b"));
        let mut moved = message("m1", 30, "a");
        moved.updated_at = 40;
        timeline.upsert(moved);
        assert_eq!(ids(&timeline), vec!["m2", "m1"]);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_stale_copy_is_ignored() {
        let mut timeline = Timeline::new();
        let original = message("m1", 10, "hi");
        let mut pinned = original.clone();
        pinned.is_pinned = true;
        pinned.updated_at = 20;

        assert!(timeline.upsert(pinned.clone()));
        assert!(!timeline.upsert(original));
        assert_eq!(timeline.get("m1"), Some(&pinned));
    }

    #[test]
    fn test_ties_break_on_id() {
        let mut timeline = Timeline::new();
        timeline.upsert(message("b", 10, "b"));
        timeline.upsert(message("a", 10, "a"));
        assert_eq!(ids(&timeline), vec!["a", "b"]);
    }

    #[test]
    fn test_pinned_is_chronological() {
        let mut timeline = Timeline::new();
        let mut late = message("m3", 30, "c");
        late.is_pinned = true;
        let mut early = message("m1", 10, "a");
        early.is_pinned = true;
        timeline.upsert(late);
        timeline.upsert(message("m2", 20, "b"));
        timeline.upsert(early);

        let pinned: Vec<&str> = timeline.pinned().map(|m| m.id.as_str()).collect();
        assert_eq!(pinned, vec!["m1", "m3"]);
    }
}
