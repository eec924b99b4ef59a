use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = confluence_export::cli::Cli::parse();

    if let Err(err) = confluence_export::logging::init(cli.verbose, cli.quiet) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    tracing::debug!(?cli, "parsed cli");

    match try_main(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: confluence_export::cli::Cli) -> anyhow::Result<confluence_export::run::RunOutcome> {
    let settings = confluence_export::config::Settings::resolve(cli).context("resolve settings")?;

    if let Some(path) = settings.save_config_path() {
        confluence_export::config::save_config(&settings, path).context("save config")?;
        return Ok(confluence_export::run::RunOutcome::success());
    }

    confluence_export::run::run(&settings).await.context("export")
}
