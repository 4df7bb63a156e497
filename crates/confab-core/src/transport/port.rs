use async_trait::async_trait;

use crate::domain::{ChatId, FileId, MessageId};
use crate::transport::types::{BotIdentity, InlineKeyboard, Message, SendOptions};
use crate::Result;

/// Outbound capability port.
///
/// Bound process-wide at engine construction and shared by every session.
/// Stateless with respect to conversation logic; implementations are the
/// live messenger adapter and the in-memory emulator.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn identity(&self) -> Result<BotIdentity>;

    async fn send_text(&self, chat: ChatId, text: &str, opts: &SendOptions) -> Result<Message>;

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        caption: Option<&str>,
        opts: &SendOptions,
    ) -> Result<Message>;

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        name: &str,
        opts: &SendOptions,
    ) -> Result<Message>;

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> Result<bool>;

    async fn edit_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;

    async fn edit_keyboard(
        &self,
        chat: ChatId,
        message_id: MessageId,
        keyboard: InlineKeyboard,
    ) -> Result<()>;

    async fn download_file(&self, file: &FileId) -> Result<Vec<u8>>;
}
