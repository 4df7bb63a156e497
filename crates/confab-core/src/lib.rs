//! Conversational-session engine.
//!
//! Inbound chat events (messages, button presses) are buffered per chat and
//! dispatched to handler routines written in an imperative "ask a question,
//! wait for the answer" style. The transport to the actual messenger lives
//! behind a port (trait) so the same conversation logic runs against a live
//! backend or the in-memory emulator used for testing.

pub mod activity;
pub mod bot;
pub mod config;
mod dispatcher;
pub mod domain;
pub mod errors;
pub mod event;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

pub use activity::Marker;
pub use bot::Bot;
pub use config::EngineConfig;
pub use domain::{ChatId, FileId, MessageId, MessageRef, UserId};
pub use errors::{Error, Result};
pub use event::{Attachment, CallbackPress, Event, IncomingMessage, Update};
pub use registry::RuleId;
pub use session::Session;
pub use transport::emulator::{Emulator, TestChat};
pub use transport::port::Transport;
pub use transport::types::{
    BotIdentity, ButtonKind, InlineButton, InlineKeyboard, Message, SendOptions,
};
