use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::event::Event;

/// Unbounded FIFO buffer of inbound events for one chat.
///
/// Pushed to by ingestion (under the activity-table lock) and drained either
/// by a dispatcher worker popping exactly one event, or directly by a
/// suspended session. The activity marker guarantees those two consumers are
/// never concurrent. The `Notify` lets a draining session await arrival
/// instead of spinning.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events
            .lock()
            .expect("event queue lock poisoned")
            .push_back(event);
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<Event> {
        self.events
            .lock()
            .expect("event queue lock poisoned")
            .pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event queue lock poisoned").len()
    }

    /// Wait until another event may have been pushed. Spurious wakeups are
    /// fine; callers loop and re-pop.
    pub async fn wait_for_event(&self) {
        self.notify.notified().await;
    }
}
