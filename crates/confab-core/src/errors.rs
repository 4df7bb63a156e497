/// Core error type for the engine.
///
/// Failures are local to the conversation task that raised them; the
/// dispatcher stays correct regardless. A timed-out `ask`/`click` is not an
/// error, it is `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    /// Raised by a handler to terminate its own conversation. Treated as
    /// normal completion for scheduling bookkeeping.
    #[error("conversation cancelled")]
    Cancelled,

    /// `click` was pointed at a message whose keyboard has no callback
    /// buttons; no event could ever satisfy the wait.
    #[error("target message has no callback buttons")]
    NoCallbackButtons,

    #[error("config error: {0}")]
    Config(String),

    #[error("emulator error: {0}")]
    Emulator(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
