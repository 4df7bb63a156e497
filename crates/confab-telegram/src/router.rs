//! Long-polling router: teloxide updates, normalized and fed into the engine.

use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::dptree;
use teloxide::requests::Requester;
use teloxide::types::{CallbackQuery, Update};
use teloxide::Bot;
use tracing::{debug, info};

use confab_core::{
    Bot as Engine, CallbackPress, ChatId, IncomingMessage, MessageId, MessageRef,
    Update as EngineUpdate, UserId,
};

use crate::attachment_of;

/// Start the engine's worker pool and run long polling until the process is
/// stopped. Every inbound update is normalized and handed to the engine's
/// ingestion entry point; routing and scheduling happen there.
pub async fn run_polling(engine: Engine, bot: Bot) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        info!(username = me.username(), "telegram transport connected");
    }
    engine.start();

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(on_callback))
        .branch(Update::filter_message().endpoint(on_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn on_message(msg: teloxide::types::Message, engine: Engine) -> anyhow::Result<()> {
    engine.on_event(normalize_message(&msg));
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, engine: Engine) -> anyhow::Result<()> {
    // Stop the client-side spinner regardless of whether the press routes
    // anywhere.
    let _ = bot.answer_callback_query(q.id.clone()).await;

    match normalize_callback(q) {
        Some(update) => engine.on_event(update),
        None => debug!("callback query without data or message, ignored"),
    }
    Ok(())
}

fn normalize_message(msg: &teloxide::types::Message) -> EngineUpdate {
    EngineUpdate::Message(IncomingMessage {
        chat_id: ChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
        from: msg.from().map(|u| UserId(u.id.0 as i64)),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        attachment: attachment_of(msg),
    })
}

fn normalize_callback(q: CallbackQuery) -> Option<EngineUpdate> {
    let token = q.data?;
    let message = q.message?;
    Some(EngineUpdate::Callback(CallbackPress {
        id: q.id,
        token,
        from: UserId(q.from.id.0 as i64),
        message: MessageRef {
            chat_id: ChatId(message.chat.id.0),
            message_id: MessageId(message.id.0),
        },
    }))
}
