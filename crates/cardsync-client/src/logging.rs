use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "cardsync_client=debug,cardsync_store=info,cardsync_shared=info,warn";

/// Install the global `tracing` subscriber.
///
/// Respects `RUST_LOG`; otherwise falls back to [`DEFAULT_FILTER`].  Safe to
/// call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("cardsync client logging initialised");
    }
}
