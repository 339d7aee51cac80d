use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linkpeek::app::AppContext;
use linkpeek::cli::{commands, CacheAction, Cli, Commands};
use linkpeek::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    cli.apply(&mut config);
    let ctx = AppContext::new(config)?;

    let result = match &cli.command {
        Commands::Preview { urls } => commands::preview(&ctx, urls).await,
        Commands::Read { url, text } => commands::read(&ctx, url, *text).await,
        Commands::Cache { action } => match action {
            CacheAction::Purge => commands::purge_cache(&ctx),
            CacheAction::Stats => commands::cache_stats(&ctx),
        },
    };

    ctx.shutdown().await;
    result?;
    Ok(())
}
