#![forbid(unsafe_code)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "tunegrab=debug,info"
    } else {
        "info"
    }
}

/// Installs the stderr subscriber once per process. `RUST_LOG` wins over the
/// debug flag.
pub fn init_logging(debug: bool) {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(debug)
            .try_init();
    });
}
