use anyhow::{Context, Result};
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Initialize the logging system
///
/// `default_level` applies when `RUST_LOG` is unset; the env var always
/// takes precedence. Logs go to stderr so stdout stays free for the
/// operator prompt.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            default_level
                .parse()
                .with_context(|| format!("invalid log level: {default_level}"))?,
        )
        .from_env_lossy();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry().with(console_layer).init();

    tracing::info!("Logging initialized at level: {}", default_level);
    Ok(())
}
