//! Deterministic in-memory transport for scripted tests.
//!
//! Keeps an ordered list of sent messages per emulated chat and a synthetic
//! bot identity. Injection helpers synthesize inbound events and feed them
//! through [`Bot::on_event`], the same entry point a live adapter uses, so
//! the whole scheduling path is exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Instant};

use crate::bot::Bot;
use crate::domain::{ChatId, FileId, MessageId, MessageRef, UserId};
use crate::errors::{Error, Result};
use crate::event::{Attachment, CallbackPress, IncomingMessage, Update};
use crate::transport::port::Transport;
use crate::transport::types::{BotIdentity, ButtonKind, InlineKeyboard, Message, SendOptions};

pub struct Emulator {
    identity: BotIdentity,
    state: Mutex<EmulatorState>,
    callback_seq: AtomicU64,
}

#[derive(Default)]
struct EmulatorState {
    chats: HashMap<ChatId, EmulatedChat>,
    next_chat: i64,
    files: HashMap<FileId, Vec<u8>>,
}

#[derive(Default)]
struct EmulatedChat {
    /// Sent-message records, in send order. Edits mutate in place, deletes
    /// remove; ids stay sequential per chat.
    messages: Vec<Message>,
    next_message_id: i32,
}

impl EmulatedChat {
    fn alloc_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    /// Negative indices count from the end, like the scripted harness wants
    /// ("the last sent message" is `-1`).
    fn message_at(&self, index: isize) -> Option<&Message> {
        let len = self.messages.len() as isize;
        let idx = if index >= 0 { index } else { len + index };
        if (0..len).contains(&idx) {
            self.messages.get(idx as usize)
        } else {
            None
        }
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            identity: BotIdentity {
                id: UserId(0),
                username: "test_bot".to_string(),
                first_name: "Test Bot".to_string(),
                is_bot: true,
            },
            state: Mutex::new(EmulatorState::default()),
            callback_seq: AtomicU64::new(0),
        }
    }

    /// Create a new emulated chat bound to `bot` for event injection.
    pub fn create_chat(self: &Arc<Self>, bot: &Bot) -> TestChat {
        let chat = {
            let mut state = self.lock();
            let chat = ChatId(state.next_chat);
            state.next_chat += 1;
            state.chats.insert(chat, EmulatedChat::default());
            chat
        };
        TestChat {
            emulator: self.clone(),
            bot: bot.clone(),
            chat,
            user: UserId(chat.0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmulatorState> {
        self.state.lock().expect("emulator lock poisoned")
    }

    fn with_chat<T>(
        &self,
        chat: ChatId,
        f: impl FnOnce(&mut EmulatorState, ChatId) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        if !state.chats.contains_key(&chat) {
            return Err(Error::Transport(format!("no such emulated chat: {}", chat.0)));
        }
        f(&mut state, chat)
    }

    fn store_file(state: &mut EmulatorState, bytes: Vec<u8>) -> FileId {
        let id = FileId(state.files.len().to_string());
        state.files.insert(id.clone(), bytes);
        id
    }

    fn record(
        &self,
        chat: ChatId,
        text: Option<String>,
        attachment: Option<Attachment>,
        opts: &SendOptions,
    ) -> Result<Message> {
        self.with_chat(chat, |state, chat_id| {
            let entry = state.chats.get_mut(&chat_id).expect("chat checked above");
            let message = Message {
                chat_id,
                message_id: entry.alloc_id(),
                from: Some(self.identity.id),
                text,
                keyboard: opts.keyboard.clone(),
                attachment,
                date: Utc::now(),
            };
            entry.messages.push(message.clone());
            Ok(message)
        })
    }
}

#[async_trait]
impl Transport for Emulator {
    async fn identity(&self) -> Result<BotIdentity> {
        Ok(self.identity.clone())
    }

    async fn send_text(&self, chat: ChatId, text: &str, opts: &SendOptions) -> Result<Message> {
        self.record(chat, Some(text.to_string()), None, opts)
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        caption: Option<&str>,
        opts: &SendOptions,
    ) -> Result<Message> {
        let file = {
            let mut state = self.lock();
            Self::store_file(&mut state, bytes)
        };
        self.record(
            chat,
            caption.map(str::to_string),
            Some(Attachment::Photo(file)),
            opts,
        )
    }

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        name: &str,
        opts: &SendOptions,
    ) -> Result<Message> {
        let file = {
            let mut state = self.lock();
            Self::store_file(&mut state, bytes)
        };
        self.record(
            chat,
            None,
            Some(Attachment::Document {
                id: file,
                name: Some(name.to_string()),
            }),
            opts,
        )
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> Result<bool> {
        self.with_chat(chat, |state, chat_id| {
            let entry = state.chats.get_mut(&chat_id).expect("chat checked above");
            let before = entry.messages.len();
            entry.messages.retain(|m| m.message_id != message_id);
            Ok(entry.messages.len() != before)
        })
    }

    async fn edit_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.with_chat(chat, |state, chat_id| {
            let entry = state.chats.get_mut(&chat_id).expect("chat checked above");
            if let Some(message) = entry.messages.iter_mut().find(|m| m.message_id == message_id) {
                message.text = Some(text.to_string());
                // Editing text replaces the keyboard wholesale, as the live
                // backend does.
                message.keyboard = keyboard;
            }
            Ok(())
        })
    }

    async fn edit_keyboard(
        &self,
        chat: ChatId,
        message_id: MessageId,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.with_chat(chat, |state, chat_id| {
            let entry = state.chats.get_mut(&chat_id).expect("chat checked above");
            if let Some(message) = entry.messages.iter_mut().find(|m| m.message_id == message_id) {
                message.keyboard = Some(keyboard);
            }
            Ok(())
        })
    }

    async fn download_file(&self, file: &FileId) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(file)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown file id: {}", file.0)))
    }
}

/// Handle to one emulated chat: inject scripted user input and inspect what
/// the bot sent back.
pub struct TestChat {
    emulator: Arc<Emulator>,
    bot: Bot,
    chat: ChatId,
    user: UserId,
}

impl TestChat {
    pub fn chat_id(&self) -> ChatId {
        self.chat
    }

    /// Simulate the user sending a text message.
    pub fn send_text(&self, text: &str) {
        let message_id = {
            let mut state = self.emulator.lock();
            state
                .chats
                .get_mut(&self.chat)
                .expect("emulated chat exists")
                .alloc_id()
        };
        self.bot.on_event(Update::Message(IncomingMessage {
            chat_id: self.chat,
            message_id,
            from: Some(self.user),
            text: Some(text.to_string()),
            attachment: None,
        }));
    }

    /// Simulate a press on the button labeled `label` of the sent message at
    /// `index` (negative counts from the end). Fails if the message or a
    /// callback button with that label does not exist.
    pub fn press(&self, index: isize, label: &str) -> Result<()> {
        let (token, message_id) = {
            let state = self.emulator.lock();
            let entry = state.chats.get(&self.chat).expect("emulated chat exists");
            let message = entry
                .message_at(index)
                .ok_or_else(|| Error::Emulator(format!("no sent message at index {index}")))?;
            let token = message
                .keyboard
                .iter()
                .flat_map(|kb| kb.buttons())
                .find_map(|b| match (&b.kind, b.label == label) {
                    (ButtonKind::Callback(token), true) => Some(token.clone()),
                    _ => None,
                })
                .ok_or_else(|| {
                    Error::Emulator(format!("no callback button labeled {label:?} at index {index}"))
                })?;
            (token, message.message_id)
        };

        let id = self.emulator.callback_seq.fetch_add(1, Ordering::Relaxed);
        self.bot.on_event(Update::Callback(CallbackPress {
            id: id.to_string(),
            token,
            from: self.user,
            message: MessageRef {
                chat_id: self.chat,
                message_id,
            },
        }));
        Ok(())
    }

    /// Sent message at `index` (negative counts from the end).
    pub fn message(&self, index: isize) -> Option<Message> {
        let state = self.emulator.lock();
        state
            .chats
            .get(&self.chat)
            .and_then(|entry| entry.message_at(index).cloned())
    }

    pub fn messages(&self) -> Vec<Message> {
        let state = self.emulator.lock();
        state
            .chats
            .get(&self.chat)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        let state = self.emulator.lock();
        state
            .chats
            .get(&self.chat)
            .map(|entry| entry.messages.len())
            .unwrap_or(0)
    }

    /// Run the scripted injections in `script`, then wait until `count` new
    /// messages have been sent to this chat, failing once `timeout` elapses.
    pub async fn run_and_wait(
        &self,
        count: usize,
        timeout: Duration,
        script: impl FnOnce(),
    ) -> Result<()> {
        let target = self.message_count() + count;
        script();
        self.wait_for_message_count(target, timeout).await
    }

    /// Wait until at least `target` messages have been sent to this chat in
    /// total.
    pub async fn wait_for_message_count(&self, target: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let poll = self.bot.config().emulator_poll_interval;
        loop {
            if self.message_count() >= target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Emulator(format!(
                    "timed out waiting for {target} sent messages (have {})",
                    self.message_count()
                )));
            }
            sleep(poll).await;
        }
    }
}
