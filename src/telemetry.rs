use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber: `RUST_LOG` filter (default
/// `archivist=info`) and formatted output. `log` records emitted by the
/// retry and worker loops are forwarded through the same subscriber.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archivist=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
