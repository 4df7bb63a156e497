use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing for a bot process.
///
/// Default: info for the engine crates, overridable with `RUST_LOG`.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,confab_core=info,confab_telegram=info,{service_name}=info"
        ))
    });

    // Tests and embedders may have installed a subscriber already.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
