//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::{GeneralConfig, LogFormat};

/// Install a global `tracing` subscriber for the process.
///
/// `RUST_LOG` takes precedence over `general.log_level`. Returns `false` if
/// a subscriber was already installed, which is not an error.
pub fn init(general: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&general.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match general.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
