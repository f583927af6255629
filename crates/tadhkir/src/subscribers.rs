//! Conversations that opted in to reminders.

use std::sync::Arc;

use dashmap::DashSet;
use tadhkir_gateway_protocol::ChatId;

/// Concurrent set of subscribed conversations.
///
/// Clones share the same underlying set. Lives for the whole process; it is
/// not tied to any gateway session.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    members: Arc<DashSet<ChatId>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a conversation. Returns `true` if it was not already subscribed.
    pub fn add(&self, chat_id: ChatId) -> bool {
        self.members.insert(chat_id)
    }

    /// Remove a conversation. Returns `true` if it was subscribed.
    pub fn remove(&self, chat_id: &ChatId) -> bool {
        self.members.remove(chat_id).is_some()
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.members.contains(chat_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Copy of the current members, safe to iterate while others mutate the set.
    pub fn snapshot(&self) -> Vec<ChatId> {
        self.members.iter().map(|id| id.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let registry = SubscriberRegistry::new();
        assert!(registry.add(ChatId::from(1_i64)));
        assert!(!registry.add(ChatId::from(1_i64)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot(), vec![ChatId::from(1_i64)]);
    }

    #[test]
    fn remove_non_member_is_noop() {
        let registry = SubscriberRegistry::new();
        registry.add(ChatId::from(1_i64));
        assert!(!registry.remove(&ChatId::from(2_i64)));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&ChatId::from(1_i64)));
        assert!(!registry.remove(&ChatId::from(1_i64)));
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_members() {
        let registry = SubscriberRegistry::new();
        let other = registry.clone();
        other.add(ChatId::from("a"));
        assert!(registry.contains(&ChatId::from("a")));
    }

    #[test]
    fn snapshot_survives_concurrent_removal() {
        let registry = SubscriberRegistry::new();
        for id in 0..10_i64 {
            registry.add(ChatId::from(id));
        }

        let snapshot = registry.snapshot();
        for id in &snapshot {
            registry.remove(id);
        }

        assert_eq!(snapshot.len(), 10);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_adds_from_threads() {
        let registry = SubscriberRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for id in 0..100_i64 {
                        registry.add(ChatId::from(id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 100);
    }
}
