use anyhow::Context as _;

/// Initialize tracing to stderr. `RUST_LOG` wins when set; otherwise
/// `--verbose` lowers the default level to debug and `--quiet` raises it
/// to error.
pub fn init(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
