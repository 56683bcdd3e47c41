use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::Subscriber;

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init(verbosity: u8) -> anyhow::Result<()> {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| anyhow::anyhow!("Failed to install logger: {err}"))?;

    Ok(())
}
