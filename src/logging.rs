//! Tracing bootstrap. `RUST_LOG` wins when set; otherwise `info` for this
//! crate, or `debug` when asked for verbose.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(verbose: bool) {
    let default = if verbose {
        "lld_practice=debug,info"
    } else {
        "lld_practice=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // try_init so tests (and repeated callers) can race to install the
    // subscriber without panicking.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init();
}
