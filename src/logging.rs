use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global subscriber once. The filter comes from `REPORT_LOG`,
/// then `RUST_LOG`, and defaults to `info`. Logs go to stderr so the result
/// table on stdout stays clean.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let filter = std::env::var("REPORT_LOG")
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .and_then(|filter| EnvFilter::try_new(filter).ok())
            .unwrap_or_else(|| EnvFilter::new("info"));
        // Another subscriber (e.g. a test harness) may already be installed.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
