use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::task::TaskTracker;

use crate::bot::Bot;
use crate::dispatcher;
use crate::domain::{ChatId, FileId, MessageId};
use crate::errors::{Error, Result};
use crate::event::{IncomingMessage, Update};
use crate::queue::EventQueue;
use crate::transport::types::{BotIdentity, InlineKeyboard, Message, SendOptions};

/// Execution context of one dispatched handler invocation.
///
/// Owns direct access to its chat's event queue for the duration of the
/// conversation: while the handler is suspended in [`Session::ask`] or
/// [`Session::click`], further events for this chat are drained here, never
/// re-popped by the dispatcher (the chat's activity marker stays claimed
/// until the whole dispatch tree completes).
#[derive(Clone)]
pub struct Session {
    bot: Bot,
    chat: ChatId,
    queue: Arc<EventQueue>,
    tracker: TaskTracker,
}

impl Session {
    pub(crate) fn new(bot: Bot, chat: ChatId, queue: Arc<EventQueue>, tracker: TaskTracker) -> Self {
        Self {
            bot,
            chat,
            queue,
            tracker,
        }
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// The error a handler returns to terminate its conversation early.
    /// Equivalent to normal completion for scheduling bookkeeping.
    pub fn cancel(&self) -> Error {
        Error::Cancelled
    }

    // === Outbound helpers ===

    pub async fn send(&self, text: &str) -> Result<Message> {
        self.send_with(text, &SendOptions::default()).await
    }

    pub async fn send_with(&self, text: &str, opts: &SendOptions) -> Result<Message> {
        self.bot.transport().send_text(self.chat, text, opts).await
    }

    pub async fn send_photo(
        &self,
        bytes: Vec<u8>,
        caption: Option<&str>,
        opts: &SendOptions,
    ) -> Result<Message> {
        self.bot
            .transport()
            .send_photo(self.chat, bytes, caption, opts)
            .await
    }

    pub async fn send_document(
        &self,
        bytes: Vec<u8>,
        name: &str,
        opts: &SendOptions,
    ) -> Result<Message> {
        self.bot
            .transport()
            .send_document(self.chat, bytes, name, opts)
            .await
    }

    pub async fn delete(&self, message_id: MessageId) -> Result<bool> {
        self.bot
            .transport()
            .delete_message(self.chat, message_id)
            .await
    }

    pub async fn edit_text(
        &self,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.bot
            .transport()
            .edit_text(self.chat, message_id, text, keyboard)
            .await
    }

    pub async fn edit_keyboard(&self, message_id: MessageId, keyboard: InlineKeyboard) -> Result<()> {
        self.bot
            .transport()
            .edit_keyboard(self.chat, message_id, keyboard)
            .await
    }

    pub async fn download(&self, file: &FileId) -> Result<Vec<u8>> {
        self.bot.transport().download_file(file).await
    }

    /// Content of the media attached to an incoming message, if any.
    pub async fn download_attachment(&self, message: &IncomingMessage) -> Result<Option<Vec<u8>>> {
        match &message.attachment {
            Some(att) => Ok(Some(self.download(att.file_id()).await?)),
            None => Ok(None),
        }
    }

    pub async fn identity(&self) -> Result<BotIdentity> {
        self.bot.transport().identity().await
    }

    // === Suspension primitives ===

    /// Optionally send `prompt`, then wait for the next incoming message with
    /// a text payload on this chat. Returns `None` once `timeout` elapses;
    /// non-matching events are discarded.
    pub async fn ask_within(
        &self,
        prompt: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        if let Some(text) = prompt {
            self.send(text).await?;
        }
        let deadline = Instant::now() + timeout;
        self.drain_until(Some(deadline), false, |update| {
            update.text().map(str::to_string)
        })
        .await
    }

    /// Unbounded [`Session::ask_within`]: waits until an answer arrives and
    /// never returns absent.
    pub async fn ask(&self, prompt: Option<&str>) -> Result<String> {
        if let Some(text) = prompt {
            self.send(text).await?;
        }
        let answer = self
            .drain_until(None, false, |update| update.text().map(str::to_string))
            .await?;
        Ok(answer.expect("unbounded wait yielded no value"))
    }

    /// Like [`Session::ask_within`] but yields the whole incoming message,
    /// text-bearing or not (media answers included).
    pub async fn ask_message_within(
        &self,
        prompt: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<IncomingMessage>> {
        if let Some(text) = prompt {
            self.send(text).await?;
        }
        let deadline = Instant::now() + timeout;
        self.drain_until(Some(deadline), false, |update| update.message().cloned())
            .await
    }

    pub async fn ask_message(&self, prompt: Option<&str>) -> Result<IncomingMessage> {
        if let Some(text) = prompt {
            self.send(text).await?;
        }
        let answer = self
            .drain_until(None, false, |update| update.message().cloned())
            .await?;
        Ok(answer.expect("unbounded wait yielded no value"))
    }

    /// Wait for a press on one of `message`'s callback buttons and return the
    /// pressed button's label, or `None` on timeout.
    ///
    /// The valid token set is fixed at call time from the keyboard attached
    /// to `message`; tokens of other messages never match. With
    /// `run_handlers`, non-matching events are evaluated against the filter
    /// registry exactly as the dispatcher would — nested handler tasks join
    /// this dispatch tree and reuse the session's queue ownership — so
    /// persistent catch-all rules keep working while the conversation is
    /// pinned on a button. Without it, non-matching events are discarded.
    pub async fn click_within(
        &self,
        message: &Message,
        timeout: Duration,
        run_handlers: bool,
    ) -> Result<Option<String>> {
        let tokens = Self::callback_tokens(message)?;
        let deadline = Instant::now() + timeout;
        self.drain_until(Some(deadline), run_handlers, |update| {
            update
                .callback()
                .and_then(|press| tokens.get(&press.token).cloned())
        })
        .await
    }

    /// Unbounded [`Session::click_within`].
    pub async fn click(&self, message: &Message, run_handlers: bool) -> Result<String> {
        let tokens = Self::callback_tokens(message)?;
        let label = self
            .drain_until(None, run_handlers, |update| {
                update
                    .callback()
                    .and_then(|press| tokens.get(&press.token).cloned())
            })
            .await?;
        Ok(label.expect("unbounded wait yielded no value"))
    }

    fn callback_tokens(message: &Message) -> Result<HashMap<String, String>> {
        let tokens: HashMap<String, String> = message
            .keyboard
            .iter()
            .flat_map(|kb| kb.callback_tokens())
            .collect();
        if tokens.is_empty() {
            return Err(Error::NoCallbackButtons);
        }
        Ok(tokens)
    }

    /// Drain this chat's queue until `extract` yields a value or the deadline
    /// passes. Suspends on the queue's notifier between polls; no worker
    /// thread is blocked for the wait.
    async fn drain_until<T>(
        &self,
        deadline: Option<Instant>,
        run_handlers: bool,
        mut extract: impl FnMut(&Update) -> Option<T>,
    ) -> Result<Option<T>> {
        loop {
            while let Some(event) = self.queue.pop() {
                if let Some(value) = extract(&event.update) {
                    return Ok(Some(value));
                }
                if run_handlers {
                    dispatcher::dispatch_fanout(
                        &self.bot,
                        self.chat,
                        self.queue.clone(),
                        &self.tracker,
                        event,
                    );
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
            }

            match deadline {
                None => self.queue.wait_for_event().await,
                Some(deadline) => tokio::select! {
                    _ = self.queue.wait_for_event() => {}
                    _ = sleep_until(deadline) => return Ok(None),
                },
            }
        }
    }
}
