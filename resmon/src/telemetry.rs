//! Tracing initialization.
//!
//! Logs go to stderr so that the report on stdout can be piped or captured on its own.
//! The level is taken from `RUST_LOG` and defaults to `info`, e.g.
//!
//! ```bash
//! RUST_LOG=resmon=debug resmon --active-only
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global subscriber. ANSI colours follow the report's colour setting.
pub fn init_telemetry(ansi: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
