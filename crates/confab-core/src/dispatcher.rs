//! Worker pool and dispatch fan-out.
//!
//! Each worker repeatedly claims the most-overdue eligible chat, pops exactly
//! one event and hands it to every matching filter rule as an independent
//! task. The chat stays claimed until the whole dispatch tree (including
//! nested dispatches from a suspended `click`) has completed; only then is it
//! re-marked eligible or retired.

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::bot::Bot;
use crate::domain::ChatId;
use crate::errors::Error;
use crate::event::Event;
use crate::queue::EventQueue;
use crate::session::Session;

pub(crate) async fn run_worker(bot: Bot, worker: usize, cancel: CancellationToken) {
    debug!(worker, "dispatcher worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let Some((chat, queue)) = bot.activity().claim_next() else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(bot.config().idle_backoff) => {}
            }
            continue;
        };

        let Some(event) = queue.pop() else {
            // Queue drained between marking and claiming; nothing to do.
            bot.activity().release(chat);
            continue;
        };

        let tracker = TaskTracker::new();
        let spawned = dispatch_fanout(&bot, chat, queue, &tracker, event);
        if spawned == 0 {
            bot.activity().release(chat);
            continue;
        }

        // Supervise the dispatch tree without stalling this worker: release
        // happens exactly once, after every handler task (and any tasks they
        // spawned while suspended) has finished, failed or cancelled.
        let bot = bot.clone();
        tokio::spawn(async move {
            tracker.close();
            tracker.wait().await;
            bot.activity().release(chat);
        });
    }
    debug!(worker, "dispatcher worker stopped");
}

/// Launch every matching filter rule for `event` as an independent task on
/// `tracker`, each with a fresh session bound to the chat's queue. Returns
/// the number of tasks spawned.
///
/// More than one rule may match; the resulting handlers intentionally race
/// over the same chat for this one event. Matched one-shot rules were already
/// removed by the registry.
pub(crate) fn dispatch_fanout(
    bot: &Bot,
    chat: ChatId,
    queue: Arc<EventQueue>,
    tracker: &TaskTracker,
    event: Event,
) -> usize {
    let matched = bot.registry().take_matches(&event);
    let spawned = matched.len();

    for (rule, handler) in matched {
        let session = Session::new(bot.clone(), chat, queue.clone(), tracker.clone());
        let event = event.clone();
        tracker.spawn(async move {
            match handler(session, event).await {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    debug!(chat = chat.0, rule = rule.0, "conversation cancelled")
                }
                Err(e) => warn!(chat = chat.0, rule = rule.0, error = %e, "handler failed"),
            }
        });
    }

    spawned
}
