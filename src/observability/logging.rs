//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.
//! `RUST_LOG` wins over the configured level when set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::ports::PortMap;

/// Create a tracing span for one harness run
///
/// ```rust,ignore
/// let span = harness_span!("set_up", test_id);
/// ```
#[macro_export]
macro_rules! harness_span {
    ($operation:expr, $test_id:expr) => {
        tracing::info_span!(
            "harness",
            operation = %$operation,
            test_id = $test_id,
            run_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $test_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "harness",
            operation = %$operation,
            test_id = $test_id,
            run_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed, which is the normal
/// case when several tests in one binary initialize logging.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Log the allocated port map at startup
pub fn log_port_map(test_id: u16, ports: &PortMap) {
    tracing::info!(
        test_id,
        auth = ports.auth,
        sts = ports.sts,
        dynamic_listener = ports.dynamic_listener,
        static_listener = ports.static_listener,
        discovery = ports.discovery,
        backend = ports.backend,
        admin = ports.admin,
        "STS flow ports allocated"
    );
}
