//! End-to-end conversation scenarios against the in-memory emulator: the
//! full path from injected events through the worker pool into suspended
//! handlers and back out through the transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use confab_core::{
    Bot, ButtonKind, Emulator, EngineConfig, InlineButton, InlineKeyboard, SendOptions,
};

const WAIT: Duration = Duration::from_secs(2);

fn engine() -> (Bot, Arc<Emulator>) {
    let emulator = Arc::new(Emulator::new());
    let bot = Bot::new(EngineConfig::default(), emulator.clone()).expect("valid config");
    (bot, emulator)
}

fn keyboard(prefix: &str, labels: &[&str]) -> InlineKeyboard {
    InlineKeyboard::one_per_row(
        labels
            .iter()
            .map(|label| InlineButton {
                label: label.to_string(),
                kind: ButtonKind::Callback(format!("{prefix}:{label}")),
            })
            .collect(),
    )
}

fn last_text(chat: &confab_core::TestChat) -> String {
    chat.message(-1)
        .and_then(|m| m.text)
        .expect("last sent message has text")
}

#[tokio::test(flavor = "multi_thread")]
async fn start_prompt_and_ask_fast_path() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_command(&["/start"], |session, _cmd| async move {
        let answer = session
            .ask_within(Some("What's your name?"), Duration::from_secs(5))
            .await?;
        let name = answer.unwrap_or_else(|| "stranger".to_string());
        session.send(&format!("Hello, {name}!")).await?;
        Ok(())
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    chat.run_and_wait(1, WAIT, || chat.send_text("/start")).await?;
    assert_eq!(last_text(&chat), "What's your name?");

    chat.run_and_wait(1, WAIT, || chat.send_text("hello")).await?;
    assert_eq!(last_text(&chat), "Hello, hello!");

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn click_matches_only_the_target_messages_keyboard() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_command(&["/pick"], |session, _cmd| async move {
        session
            .send_with(
                "old menu",
                &SendOptions::with_keyboard(keyboard("old", &["A", "B"])),
            )
            .await?;
        let menu = session
            .send_with(
                "pick one",
                &SendOptions::with_keyboard(keyboard("new", &["A", "B"])),
            )
            .await?;
        let label = session.click_within(&menu, Duration::from_secs(5), false).await?;
        match label {
            Some(label) => session.send(&format!("picked {label}")).await?,
            None => session.send("picked nothing").await?,
        };
        Ok(())
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    chat.run_and_wait(2, WAIT, || chat.send_text("/pick")).await?;

    // A press on the stale first menu carries a token that is not on the
    // awaited message's keyboard; it must be discarded, not matched.
    chat.press(0, "B")?;
    chat.run_and_wait(1, WAIT, || chat.press(1, "B").expect("button exists"))
        .await?;

    assert_eq!(last_text(&chat), "picked B");

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn one_shot_button_fires_exactly_once() -> anyhow::Result<()> {
    let (bot, emulator) = engine();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_in_handler = fired.clone();
    bot.on_command(&["/once"], move |session, _cmd| {
        let fired = fired_in_handler.clone();
        async move {
            let button = session.bot().button("Go", false, move |session, label| {
                let fired = fired.clone();
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                    session.send(&format!("{label} pressed")).await?;
                    Ok(())
                }
            });
            session
                .send_with(
                    "press it",
                    &SendOptions::with_keyboard(InlineKeyboard::one_per_row(vec![button])),
                )
                .await?;
            Ok(())
        }
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    chat.run_and_wait(1, WAIT, || chat.send_text("/once")).await?;

    chat.run_and_wait(1, WAIT, || chat.press(0, "Go").expect("button exists"))
        .await?;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(last_text(&chat), "Go pressed");

    // The rule was removed on first match; a second press reaches no handler.
    chat.press(0, "Go")?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(chat.message_count(), 2);

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unrelated_chats_are_served_concurrently() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_command(&["/slow"], |session, _cmd| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        session.send("done").await?;
        Ok(())
    });
    bot.start();

    let first = emulator.create_chat(&bot);
    let second = emulator.create_chat(&bot);

    let started = tokio::time::Instant::now();
    first.send_text("/slow");
    second.send_text("/slow");

    first.wait_for_message_count(1, WAIT).await?;
    second.wait_for_message_count(1, WAIT).await?;

    // Both handlers slept 300ms; serial execution would need ~600ms.
    assert!(
        started.elapsed() < Duration::from_millis(550),
        "chats were serialized: {:?}",
        started.elapsed()
    );

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_timeout_returns_absent_after_the_deadline() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_command(&["/wait"], |session, _cmd| async move {
        match session.ask_within(None, Duration::from_millis(500)).await? {
            Some(answer) => session.send(&format!("got {answer}")).await?,
            None => session.send("no answer").await?,
        };
        Ok(())
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    let started = tokio::time::Instant::now();
    chat.run_and_wait(1, WAIT, || chat.send_text("/wait")).await?;
    let elapsed = started.elapsed();

    assert_eq!(last_text(&chat), "no answer");
    assert!(elapsed >= Duration::from_millis(450), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "returned late: {elapsed:?}");

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn background_handlers_run_while_click_is_pending() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_text(
        |text| text.starts_with("note:"),
        |session, text| async move {
            session.send(&format!("noted {}", &text["note:".len()..])).await?;
            Ok(())
        },
    );
    bot.on_command(&["/menu"], |session, _cmd| async move {
        let menu = session
            .send_with(
                "menu",
                &SendOptions::with_keyboard(keyboard("menu", &["A"])),
            )
            .await?;
        let label = session.click_within(&menu, Duration::from_secs(5), true).await?;
        session
            .send(&format!("clicked {}", label.unwrap_or_else(|| "nothing".to_string())))
            .await?;
        Ok(())
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    chat.run_and_wait(1, WAIT, || chat.send_text("/menu")).await?;

    // While the conversation is pinned on the button, a persistent rule
    // still reacts to other events on this chat.
    chat.run_and_wait(1, WAIT, || chat.send_text("note:hi")).await?;
    assert_eq!(last_text(&chat), "noted hi");

    chat.run_and_wait(1, WAIT, || chat.press(0, "A").expect("button exists"))
        .await?;
    assert_eq!(last_text(&chat), "clicked A");

    bot.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_survives_send_and_download() -> anyhow::Result<()> {
    let (bot, emulator) = engine();

    bot.on_command(&["/photo"], |session, _cmd| async move {
        let sent = session
            .send_photo(vec![1, 2, 3], Some("a photo"), &SendOptions::default())
            .await?;
        let file = sent.attachment.expect("photo attached").file_id().clone();
        let bytes = session.download(&file).await?;
        session.send(&format!("{} bytes", bytes.len())).await?;
        Ok(())
    });
    bot.start();

    let chat = emulator.create_chat(&bot);
    chat.run_and_wait(2, WAIT, || chat.send_text("/photo")).await?;
    assert_eq!(last_text(&chat), "3 bytes");

    bot.shutdown();
    Ok(())
}
