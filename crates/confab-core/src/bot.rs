use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity::{ActivityTable, Marker};
use crate::config::EngineConfig;
use crate::dispatcher;
use crate::errors::{Error, Result};
use crate::event::{Event, IncomingMessage, Update};
use crate::registry::{FilterRegistry, HandlerFn, Predicate, RuleId};
use crate::session::Session;
use crate::transport::port::Transport;
use crate::transport::types::{ButtonKind, InlineButton};

/// The engine handle: ingestion entry point, filter/handler registration and
/// worker-pool lifecycle. Cheap to clone; every clone shares the same
/// scheduler state and transport binding.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: EngineConfig,
    transport: Arc<dyn Transport>,
    activity: ActivityTable,
    registry: FilterRegistry,
    /// Process-wide event sequence, assigned at ingestion.
    seq: AtomicU64,
    /// Source of unique callback tokens for [`Bot::button`].
    tokens: AtomicU64,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Bot {
    /// Create an engine bound to the given transport. The binding is fixed
    /// for the lifetime of the process; all sessions share it.
    pub fn new(cfg: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                transport,
                activity: ActivityTable::new(),
                registry: FilterRegistry::new(),
                seq: AtomicU64::new(0),
                tokens: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the dispatcher worker pool. Idempotent; must run inside a tokio
    /// runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in 0..self.inner.cfg.workers {
            let bot = self.clone();
            let cancel = self.inner.cancel.clone();
            tokio::spawn(async move {
                dispatcher::run_worker(bot, worker, cancel).await;
            });
        }
    }

    /// Stop the worker pool. Dispatch trees already in flight run to
    /// completion; no new chats are claimed.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Ingest one raw inbound event. Events with no derivable chat identity
    /// are dropped; everything else is appended to its chat's queue and the
    /// chat is marked eligible, atomically.
    pub fn on_event(&self, update: Update) {
        let Some(chat) = update.chat_id() else {
            debug!("dropping unroutable update");
            return;
        };
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.activity.enqueue(chat, Event { seq, update });
    }

    /// Scheduling state of a chat, for diagnostics and tests.
    pub fn marker(&self, chat: crate::domain::ChatId) -> Option<Marker> {
        self.inner.activity.marker(chat)
    }

    // === Handler registration DSL ===

    /// The registration primitive: run `handler` for every event matching
    /// `predicate`. All other registration helpers layer on this.
    pub fn on_update<P, H, Fut>(&self, predicate: P, handler: H) -> RuleId
    where
        P: Fn(&Update) -> bool + Send + Sync + 'static,
        H: Fn(Session, Update) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        let handler: HandlerFn =
            Arc::new(move |session, event| Box::pin(handler(session, event.update)));
        self.inner.registry.insert(predicate, handler, true)
    }

    /// Run `handler` for incoming messages satisfying `predicate`.
    pub fn on_message<P, H, Fut>(&self, predicate: P, handler: H) -> RuleId
    where
        P: Fn(&IncomingMessage) -> bool + Send + Sync + 'static,
        H: Fn(Session, IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_update(
            move |update| update.message().map(&predicate).unwrap_or(false),
            move |session, update| {
                let message = update.message().cloned().expect("predicate admitted message");
                handler(session, message)
            },
        )
    }

    /// Run `handler` for text messages satisfying `predicate`.
    pub fn on_text<P, H, Fut>(&self, predicate: P, handler: H) -> RuleId
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        H: Fn(Session, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_update(
            move |update| update.text().map(&predicate).unwrap_or(false),
            move |session, update| {
                let text = update.text().expect("predicate admitted text").to_string();
                handler(session, text)
            },
        )
    }

    /// Run `handler` when the message text equals one of `commands` exactly.
    pub fn on_command<H, Fut>(&self, commands: &[&str], handler: H) -> RuleId
    where
        H: Fn(Session, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let commands: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        self.on_text(move |text| commands.iter().any(|c| c == text), handler)
    }

    /// Run `handler` when the whole message text matches one of `patterns`.
    pub fn on_regex<H, Fut>(&self, patterns: &[&str], handler: H) -> Result<RuleId>
    where
        H: Fn(Session, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let regexes = patterns
            .iter()
            .map(|p| regex::Regex::new(&format!(r"\A(?:{p})\z")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("invalid handler regex: {e}")))?;

        Ok(self.on_text(
            move |text| regexes.iter().any(|re| re.is_match(text)),
            handler,
        ))
    }

    /// Run `handler` for every event (catch-all / default rule).
    pub fn on_any<H, Fut>(&self, handler: H) -> RuleId
    where
        H: Fn(Session, Update) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_update(|_| true, handler)
    }

    pub fn remove_rule(&self, id: RuleId) -> bool {
        self.inner.registry.remove(id)
    }

    /// Build an inline button wired to `on_press`.
    ///
    /// A unique opaque callback token is generated and stored in the rule
    /// record; the rule matches presses of exactly this button. With
    /// `persist` the rule stays registered for repeated presses (toggles);
    /// without it the rule fires at most once and is then removed.
    pub fn button<H, Fut>(&self, label: impl Into<String>, persist: bool, on_press: H) -> InlineButton
    where
        H: Fn(Session, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let token = format!("cb:{}", self.inner.tokens.fetch_add(1, Ordering::Relaxed));

        let wanted = token.clone();
        let predicate: Predicate = Arc::new(move |update| {
            update
                .callback()
                .map(|press| press.token == wanted)
                .unwrap_or(false)
        });

        let pressed = label.clone();
        let handler: HandlerFn =
            Arc::new(move |session, _event| Box::pin(on_press(session, pressed.clone())));

        self.inner.registry.insert(predicate, handler, persist);

        InlineButton {
            label,
            kind: ButtonKind::Callback(token),
        }
    }

    // === Shared state accessors for the dispatcher and sessions ===

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn activity(&self) -> &ActivityTable {
        &self.inner.activity
    }

    pub(crate) fn registry(&self) -> &FilterRegistry {
        &self.inner.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId, UserId};
    use crate::event::CallbackPress;
    use crate::transport::emulator::Emulator;

    fn bot() -> Bot {
        Bot::new(EngineConfig::default(), Arc::new(Emulator::new())).unwrap()
    }

    fn text_update(chat: i64, text: &str) -> Update {
        Update::Message(IncomingMessage {
            chat_id: ChatId(chat),
            message_id: MessageId(0),
            from: Some(UserId(chat)),
            text: Some(text.to_string()),
            attachment: None,
        })
    }

    fn press_update(chat: i64, token: &str) -> Update {
        Update::Callback(CallbackPress {
            id: "0".to_string(),
            token: token.to_string(),
            from: UserId(chat),
            message: crate::domain::MessageRef {
                chat_id: ChatId(chat),
                message_id: MessageId(0),
            },
        })
    }

    fn matches(bot: &Bot, update: Update) -> usize {
        bot.registry()
            .take_matches(&Event { seq: 0, update })
            .len()
    }

    #[test]
    fn unroutable_updates_are_dropped() {
        let bot = bot();
        bot.on_event(Update::Other);
        assert_eq!(bot.activity().pending_chats(), 0);
    }

    #[test]
    fn ingestion_marks_chat_eligible() {
        let bot = bot();
        bot.on_event(text_update(7, "hi"));
        assert!(matches!(bot.marker(ChatId(7)), Some(Marker::Waiting(_))));
    }

    #[test]
    fn ingestion_assigns_increasing_seq() {
        let bot = bot();
        bot.on_event(text_update(1, "a"));
        bot.on_event(text_update(1, "b"));
        let (_, queue) = bot.activity().claim_next().unwrap();
        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert!(first.seq < second.seq);
    }

    #[test]
    fn command_rule_matches_exact_text_only() {
        let bot = bot();
        bot.on_command(&["/start", "/help"], |_s, _t| async { Ok(()) });

        assert_eq!(matches(&bot, text_update(1, "/start")), 1);
        assert_eq!(matches(&bot, text_update(1, "/help")), 1);
        assert_eq!(matches(&bot, text_update(1, "/started")), 0);
        assert_eq!(matches(&bot, press_update(1, "cb:0")), 0);
    }

    #[test]
    fn regex_rule_matches_whole_text() {
        let bot = bot();
        bot.on_regex(&["[0-9]+"], |_s, _t| async { Ok(()) }).unwrap();

        assert_eq!(matches(&bot, text_update(1, "123")), 1);
        assert_eq!(matches(&bot, text_update(1, "x123")), 0);
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let bot = bot();
        let err = bot
            .on_regex(&["("], |_s, _t| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn catch_all_matches_any_event() {
        let bot = bot();
        bot.on_any(|_s, _u| async { Ok(()) });

        assert_eq!(matches(&bot, text_update(1, "hello")), 1);
        assert_eq!(matches(&bot, press_update(1, "anything")), 1);
    }

    #[test]
    fn buttons_get_unique_tokens() {
        let bot = bot();
        let a = bot.button("A", false, |_s, _l| async { Ok(()) });
        let b = bot.button("B", false, |_s, _l| async { Ok(()) });
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn button_rule_matches_only_its_own_token() {
        let bot = bot();
        let a = bot.button("A", true, |_s, _l| async { Ok(()) });

        assert_eq!(matches(&bot, press_update(1, a.token().unwrap())), 1);
        assert_eq!(matches(&bot, press_update(1, "cb:999")), 0);
    }

    #[test]
    fn one_shot_button_rule_fires_once() {
        let bot = bot();
        let a = bot.button("A", false, |_s, _l| async { Ok(()) });
        let token = a.token().unwrap();

        assert_eq!(matches(&bot, press_update(1, token)), 1);
        assert_eq!(matches(&bot, press_update(1, token)), 0);
    }
}
