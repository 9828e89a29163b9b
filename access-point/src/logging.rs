//! Log output setup

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;

/// The BLE stack logs every D-Bus round trip at debug level
const QUIET_TARGETS: [&str; 2] = ["btleplug", "bluez_async"];

/// Default directives: `info`, or `debug` when `debug` is set; the BLE stack stays at `warn`
pub fn default_directives(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `debug`.
pub fn init(debug: bool) -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(debug))
        .try_init()
}
