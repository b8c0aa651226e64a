use courier_shared::constants::MAX_SEARCH_RESULTS;
use courier_shared::types::ChatId;

use crate::memory::MemoryStore;
use crate::models::Message;

impl MemoryStore {
    /// Case-insensitive substring search over message text, newest first.
    ///
    /// Without a `chat` filter hidden chats are skipped. Empty queries match
    /// nothing.
    pub fn search_messages(&self, query: &str, chat: Option<ChatId>) -> Vec<Message> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let inner = self.lock();
        let mut hits: Vec<Message> = inner
            .chats
            .iter()
            .filter(|c| match chat {
                Some(id) => c.id == id,
                None => !c.hidden,
            })
            .flat_map(|c| c.messages.iter())
            .filter(|m| {
                m.content
                    .searchable_text()
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(MAX_SEARCH_RESULTS);
        hits
    }
}
