//! Telegram adapter (teloxide).
//!
//! This crate implements the `confab-core` transport port over the Telegram
//! Bot API and ships the long-polling router that feeds inbound updates into
//! the engine.

use std::io::Cursor;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::payloads::setters::*;
use teloxide::requests::Requester;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use teloxide::{ApiError, Bot, RequestError};
use tokio::time::sleep;
use tracing::warn;

pub mod router;

use confab_core::{
    Attachment, BotIdentity, ButtonKind, ChatId, Error, FileId, InlineKeyboard, Message,
    MessageId, Result, SendOptions, Transport, UserId,
};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Build from the `TELOXIDE_TOKEN` environment variable.
    pub fn from_env() -> Self {
        Self::new(Bot::from_env())
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    fn markup(keyboard: &InlineKeyboard) -> Result<InlineKeyboardMarkup> {
        let mut rows = Vec::with_capacity(keyboard.rows.len());
        for row in &keyboard.rows {
            let mut out = Vec::with_capacity(row.len());
            for button in row {
                out.push(match &button.kind {
                    ButtonKind::Callback(token) => {
                        InlineKeyboardButton::callback(button.label.clone(), token.clone())
                    }
                    ButtonKind::Url(link) => {
                        let url = url::Url::parse(link).map_err(|e| {
                            Error::Transport(format!("invalid button url {link:?}: {e}"))
                        })?;
                        InlineKeyboardButton::url(button.label.clone(), url)
                    }
                });
            }
            rows.push(out);
        }
        Ok(InlineKeyboardMarkup::new(rows))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    warn!(delay_ms = d.as_millis() as u64, "rate limited, retrying");
                    sleep(d).await;
                }
                Err(e) => return Err(Self::map_err(e)),
            }
        }
    }

    /// Normalize a just-sent message. The keyboard is taken from the options
    /// we sent with rather than re-parsed from the API echo, so the returned
    /// record carries exactly the callback tokens a `click` will wait on.
    fn normalize_sent(sent: teloxide::types::Message, opts: &SendOptions) -> Message {
        Message {
            chat_id: ChatId(sent.chat.id.0),
            message_id: MessageId(sent.id.0),
            from: sent.from().map(|u| UserId(u.id.0 as i64)),
            text: sent.text().or_else(|| sent.caption()).map(str::to_string),
            keyboard: opts.keyboard.clone(),
            attachment: attachment_of(&sent),
            date: sent.date,
        }
    }
}

/// Media attached to a Telegram message, by decreasing specificity. For
/// photos the largest size variant is kept.
pub(crate) fn attachment_of(msg: &teloxide::types::Message) -> Option<Attachment> {
    if let Some(sizes) = msg.photo() {
        return sizes
            .last()
            .map(|p| Attachment::Photo(FileId(p.file.id.clone())));
    }
    if let Some(doc) = msg.document() {
        return Some(Attachment::Document {
            id: FileId(doc.file.id.clone()),
            name: doc.file_name.clone(),
        });
    }
    if let Some(voice) = msg.voice() {
        return Some(Attachment::Voice(FileId(voice.file.id.clone())));
    }
    if let Some(video) = msg.video() {
        return Some(Attachment::Video(FileId(video.file.id.clone())));
    }
    None
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn identity(&self) -> Result<BotIdentity> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        Ok(BotIdentity {
            id: UserId(me.user.id.0 as i64),
            username: me.username().to_string(),
            first_name: me.user.first_name.clone(),
            is_bot: me.user.is_bot,
        })
    }

    async fn send_text(&self, chat: ChatId, text: &str, opts: &SendOptions) -> Result<Message> {
        let markup = opts.keyboard.as_ref().map(Self::markup).transpose()?;
        let sent = self
            .with_retry(|| {
                let mut req = self.bot.send_message(Self::tg_chat(chat), text.to_string());
                if let Some(markup) = markup.clone() {
                    req = req.reply_markup(markup);
                }
                if let Some(reply) = opts.reply_to {
                    req = req.reply_to_message_id(Self::tg_msg_id(reply));
                }
                req
            })
            .await?;
        Ok(Self::normalize_sent(sent, opts))
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        caption: Option<&str>,
        opts: &SendOptions,
    ) -> Result<Message> {
        let markup = opts.keyboard.as_ref().map(Self::markup).transpose()?;
        let sent = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_photo(Self::tg_chat(chat), InputFile::memory(bytes.clone()));
                if let Some(text) = caption {
                    req = req.caption(text.to_string());
                }
                if let Some(markup) = markup.clone() {
                    req = req.reply_markup(markup);
                }
                if let Some(reply) = opts.reply_to {
                    req = req.reply_to_message_id(Self::tg_msg_id(reply));
                }
                req
            })
            .await?;
        Ok(Self::normalize_sent(sent, opts))
    }

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        name: &str,
        opts: &SendOptions,
    ) -> Result<Message> {
        let markup = opts.keyboard.as_ref().map(Self::markup).transpose()?;
        let sent = self
            .with_retry(|| {
                let file = InputFile::memory(bytes.clone()).file_name(name.to_string());
                let mut req = self.bot.send_document(Self::tg_chat(chat), file);
                if let Some(markup) = markup.clone() {
                    req = req.reply_markup(markup);
                }
                if let Some(reply) = opts.reply_to {
                    req = req.reply_to_message_id(Self::tg_msg_id(reply));
                }
                req
            })
            .await?;
        Ok(Self::normalize_sent(sent, opts))
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> Result<bool> {
        match self
            .bot
            .delete_message(Self::tg_chat(chat), Self::tg_msg_id(message_id))
            .await
        {
            Ok(_) => Ok(true),
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => Ok(false),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn edit_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let markup = keyboard.as_ref().map(Self::markup).transpose()?;
        self.with_retry(|| {
            let mut req = self.bot.edit_message_text(
                Self::tg_chat(chat),
                Self::tg_msg_id(message_id),
                text.to_string(),
            );
            if let Some(markup) = markup.clone() {
                req = req.reply_markup(markup);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn edit_keyboard(
        &self,
        chat: ChatId,
        message_id: MessageId,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        let markup = Self::markup(&keyboard)?;
        self.with_retry(|| {
            self.bot
                .edit_message_reply_markup(Self::tg_chat(chat), Self::tg_msg_id(message_id))
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }

    async fn download_file(&self, file: &FileId) -> Result<Vec<u8>> {
        let meta = self.with_retry(|| self.bot.get_file(file.0.clone())).await?;
        let mut buf = Cursor::new(Vec::new());
        self.bot
            .download_file(&meta.path, &mut buf)
            .await
            .map_err(|e| Error::Transport(format!("telegram download error: {e}")))?;
        Ok(buf.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::InlineButton;

    #[test]
    fn keyboard_maps_callback_and_url_buttons() {
        let kb = InlineKeyboard::new(vec![vec![
            InlineButton {
                label: "Go".to_string(),
                kind: ButtonKind::Callback("cb:1".to_string()),
            },
            InlineButton::url("Docs", "https://example.com/docs"),
        ]]);

        let markup = TelegramTransport::markup(&kb).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[0][0].text, "Go");
    }

    #[test]
    fn invalid_button_url_is_rejected() {
        let kb = InlineKeyboard::one_per_row(vec![InlineButton::url("Bad", "not a url")]);
        assert!(matches!(
            TelegramTransport::markup(&kb),
            Err(Error::Transport(_))
        ));
    }
}
