use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::Result;
use crate::event::{Event, Update};
use crate::session::Session;

/// Identity of a registered rule. Removal is keyed by this id, not by the
/// identity of the predicate/handler closures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RuleId(pub u64);

pub type Predicate = Arc<dyn Fn(&Update) -> bool + Send + Sync>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Session, Event) -> HandlerFuture + Send + Sync>;

struct FilterRule {
    id: RuleId,
    predicate: Predicate,
    handler: HandlerFn,
    /// One-shot rules (`false`) are removed as soon as they match.
    persistent: bool,
}

/// Ordered collection of (predicate, handler) rules.
///
/// Read by every dispatch and mutated by registration/removal from any task;
/// rules are evaluated in registration order. No cross-locking with the
/// activity table.
#[derive(Default)]
pub struct FilterRegistry {
    rules: Mutex<Vec<FilterRule>>,
    next_id: AtomicU64,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, predicate: Predicate, handler: HandlerFn, persistent: bool) -> RuleId {
        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.rules
            .lock()
            .expect("filter registry lock poisoned")
            .push(FilterRule {
                id,
                predicate,
                handler,
                persistent,
            });
        id
    }

    /// Remove a rule by id. Safe to call while a dispatch of the same rule is
    /// in flight; the dispatch already captured its handler reference.
    pub fn remove(&self, id: RuleId) -> bool {
        let mut rules = self.rules.lock().expect("filter registry lock poisoned");
        let before = rules.len();
        rules.retain(|rule| rule.id != id);
        rules.len() != before
    }

    /// Handlers of every rule matching the event, in registration order.
    ///
    /// Matched one-shot rules are removed here, under the lock, so a second
    /// identical event can never fire them again.
    pub fn take_matches(&self, event: &Event) -> Vec<(RuleId, HandlerFn)> {
        let mut rules = self.rules.lock().expect("filter registry lock poisoned");
        let matched: Vec<(RuleId, HandlerFn)> = rules
            .iter()
            .filter(|rule| (rule.predicate)(&event.update))
            .map(|rule| (rule.id, rule.handler.clone()))
            .collect();

        rules.retain(|rule| rule.persistent || !matched.iter().any(|(id, _)| *id == rule.id));
        matched
    }

    pub fn len(&self) -> usize {
        self.rules.lock().expect("filter registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> HandlerFn {
        Arc::new(|_session, _event| Box::pin(async { Ok(()) }))
    }

    fn event(update: Update) -> Event {
        Event { seq: 0, update }
    }

    fn text_event(text: &str) -> Event {
        event(Update::Message(crate::event::IncomingMessage {
            chat_id: crate::domain::ChatId(1),
            message_id: crate::domain::MessageId(0),
            from: Some(crate::domain::UserId(1)),
            text: Some(text.to_string()),
            attachment: None,
        }))
    }

    #[test]
    fn matches_in_registration_order() {
        let registry = FilterRegistry::new();
        let a = registry.insert(Arc::new(|_| true), noop_handler(), true);
        let b = registry.insert(Arc::new(|_| true), noop_handler(), true);

        let matched = registry.take_matches(&text_event("hi"));
        let ids: Vec<RuleId> = matched.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn one_shot_rule_matches_exactly_once() {
        let registry = FilterRegistry::new();
        registry.insert(
            Arc::new(|u: &Update| u.text() == Some("go")),
            noop_handler(),
            false,
        );

        assert_eq!(registry.take_matches(&text_event("go")).len(), 1);
        assert_eq!(registry.take_matches(&text_event("go")).len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn persistent_rule_survives_matching() {
        let registry = FilterRegistry::new();
        registry.insert(Arc::new(|_| true), noop_handler(), true);

        assert_eq!(registry.take_matches(&text_event("a")).len(), 1);
        assert_eq!(registry.take_matches(&text_event("b")).len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_by_id() {
        let registry = FilterRegistry::new();
        let id = registry.insert(Arc::new(|_| true), noop_handler(), true);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.take_matches(&text_event("x")).is_empty());
    }

    #[test]
    fn non_matching_one_shot_stays_registered() {
        let registry = FilterRegistry::new();
        registry.insert(
            Arc::new(|u: &Update| u.text() == Some("target")),
            noop_handler(),
            false,
        );

        assert!(registry.take_matches(&text_event("miss")).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
