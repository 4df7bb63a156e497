use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, FileId, MessageId, MessageRef, UserId};

/// One raw inbound occurrence, as normalized by an adapter.
///
/// Backend-specific fields live in the adapter; the emulator constructs these
/// values field-by-field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Update {
    Message(IncomingMessage),
    Callback(CallbackPress),
    /// Anything the adapter recognized but the engine does not route
    /// (channel posts, member updates, ...). Carries no chat identity and is
    /// dropped at ingestion.
    Other,
}

impl Update {
    /// The chat this update belongs to: a message's own chat, or the chat of
    /// the message a callback button sits on.
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Update::Message(m) => Some(m.chat_id),
            Update::Callback(c) => Some(c.message.chat_id),
            Update::Other => None,
        }
    }

    pub fn message(&self) -> Option<&IncomingMessage> {
        match self {
            Update::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.message().and_then(|m| m.text.as_deref())
    }

    pub fn callback(&self) -> Option<&CallbackPress> {
        match self {
            Update::Callback(c) => Some(c),
            _ => None,
        }
    }
}

/// An incoming text/media message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// Absent for backends that deliver authorless posts.
    pub from: Option<UserId>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

/// Media attached to an incoming message, by backend file id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Attachment {
    Photo(FileId),
    Document { id: FileId, name: Option<String> },
    Voice(FileId),
    Video(FileId),
}

impl Attachment {
    pub fn file_id(&self) -> &FileId {
        match self {
            Attachment::Photo(id) => id,
            Attachment::Document { id, .. } => id,
            Attachment::Voice(id) => id,
            Attachment::Video(id) => id,
        }
    }
}

/// A press on an inline keyboard button of a previously sent message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackPress {
    /// Backend callback id (answered by the live adapter).
    pub id: String,
    /// The opaque callback token carried by the pressed button.
    pub token: String,
    pub from: UserId,
    /// The message the keyboard is attached to.
    pub message: MessageRef,
}

/// An `Update` stamped with its ingestion sequence number.
///
/// Sequence numbers are process-wide and strictly increasing, so FIFO order
/// within a chat is observable by consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub update: Update,
}
