use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::domain::ChatId;
use crate::event::Event;
use crate::queue::EventQueue;

/// Eligibility marker of a chat with buffered events.
///
/// Absent from the table entirely means "no pending work".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Events buffered, eligible for pickup since the given instant.
    Waiting(Instant),
    /// A dispatch tree currently owns the queue; the dispatcher must not
    /// pop from this chat again until release.
    Claimed,
}

struct ChatEntry {
    queue: Arc<EventQueue>,
    marker: Marker,
}

/// Process-wide map from chat identity to its queue and eligibility marker.
///
/// All transitions happen under one mutex, so the scan-and-claim step is
/// atomic with respect to ingestion and release. Queues are created lazily on
/// first event and garbage-collected together with their entry.
#[derive(Default)]
pub struct ActivityTable {
    chats: Mutex<HashMap<ChatId, ChatEntry>>,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the chat's queue, creating queue and marker on
    /// first use. An existing entry keeps its marker: a `Waiting` chat keeps
    /// its original wait-since timestamp and a `Claimed` chat stays claimed.
    pub fn enqueue(&self, chat: ChatId, event: Event) {
        let mut chats = self.chats.lock().expect("activity table lock poisoned");
        let entry = chats.entry(chat).or_insert_with(|| ChatEntry {
            queue: Arc::new(EventQueue::new()),
            marker: Marker::Waiting(Instant::now()),
        });
        entry.queue.push(event);
    }

    /// Claim the most-overdue eligible chat: the `Waiting` entry with the
    /// minimal timestamp, flipped to `Claimed` atomically.
    pub fn claim_next(&self) -> Option<(ChatId, Arc<EventQueue>)> {
        let mut chats = self.chats.lock().expect("activity table lock poisoned");
        let chat = chats
            .iter()
            .filter_map(|(chat, entry)| match entry.marker {
                Marker::Waiting(since) => Some((since, *chat)),
                Marker::Claimed => None,
            })
            .min()
            .map(|(_, chat)| chat)?;

        let entry = chats.get_mut(&chat).expect("claimed chat disappeared");
        entry.marker = Marker::Claimed;
        Some((chat, entry.queue.clone()))
    }

    /// Release a chat after its dispatch tree fully completed: re-mark
    /// eligible if events remain, otherwise drop entry and queue together.
    /// A missing entry is a no-op.
    pub fn release(&self, chat: ChatId) {
        let mut chats = self.chats.lock().expect("activity table lock poisoned");
        let Some(entry) = chats.get_mut(&chat) else {
            return;
        };
        if entry.queue.is_empty() {
            chats.remove(&chat);
        } else {
            entry.marker = Marker::Waiting(Instant::now());
        }
    }

    /// Current marker of a chat, if any.
    pub fn marker(&self, chat: ChatId) -> Option<Marker> {
        self.chats
            .lock()
            .expect("activity table lock poisoned")
            .get(&chat)
            .map(|entry| entry.marker)
    }

    pub fn pending_chats(&self) -> usize {
        self.chats
            .lock()
            .expect("activity table lock poisoned")
            .len()
    }
}
