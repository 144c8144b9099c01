use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` with
/// `verbose`. Burn and wgpu internals are kept at `warn` so per-batch lines stay
/// readable.
pub fn init(verbose: bool) -> Result<(), String> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},burn=warn,burn_train=warn,wgpu=warn,wgpu_core=warn,naga=warn,cubecl=warn"
        ))
    });

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("failed to initialize logging: {e}"))
}
