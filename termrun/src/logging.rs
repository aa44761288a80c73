//! Logging setup for the `termrun` binary.
//!
//! Level selection, first match wins:
//! 1. `--log-level` flag
//! 2. `TERMRUN_LOG`, read as `EnvFilter` directives (e.g. `debug`,
//!    `termrun::process=trace`)
//! 3. `warn`
//!
//! Logs go to stderr. Child stderr is echoed there too, so the default
//! stays quiet.

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "TERMRUN_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<Level>) {
    let env = std::env::var(LOG_ENV).ok();
    fmt()
        .with_env_filter(build_filter(cli_level, env.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn build_filter(cli_level: Option<Level>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::default().add_directive(LevelFilter::from_level(level).into());
    }

    env.map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::WARN.into()))
}
