use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MessageId, UserId};
use crate::event::Attachment;

/// Identity of the bot account behind a transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub is_bot: bool,
}

/// A message as sent (or edited) through a transport, normalized into the
/// in-memory shape the engine works with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from: Option<UserId>,
    pub text: Option<String>,
    pub keyboard: Option<InlineKeyboard>,
    pub attachment: Option<Attachment>,
    pub date: DateTime<Utc>,
}

/// Inline keyboard attached to an outbound message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { rows }
    }

    /// Convenience for "one button per row" layouts.
    pub fn one_per_row(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }

    /// (token, label) pairs of every callback button on this keyboard.
    pub fn callback_tokens(&self) -> Vec<(String, String)> {
        self.buttons()
            .filter_map(|b| match &b.kind {
                ButtonKind::Callback(token) => Some((token.clone(), b.label.clone())),
                ButtonKind::Url(_) => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    pub kind: ButtonKind,
}

impl InlineButton {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ButtonKind::Url(url.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        match &self.kind {
            ButtonKind::Callback(token) => Some(token),
            ButtonKind::Url(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ButtonKind {
    /// Press is reported back as a callback event carrying this token.
    Callback(String),
    /// Opens a link client-side; never produces an event.
    Url(String),
}

/// Options for outbound sends.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    pub keyboard: Option<InlineKeyboard>,
    pub reply_to: Option<MessageId>,
}

impl SendOptions {
    pub fn with_keyboard(keyboard: InlineKeyboard) -> Self {
        Self {
            keyboard: Some(keyboard),
            reply_to: None,
        }
    }
}
