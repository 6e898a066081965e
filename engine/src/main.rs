// Weave command-line entry point

use clap::Parser;
use weave_engine::cli::{Cli, Command, ConfigAction};
use weave_engine::config::Config;
use weave_engine::handlers::{
    handle_actors, handle_config_show, handle_history, handle_sessions, OutputFormat,
};
use weave_engine::telemetry::init_telemetry_with;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path)?,
        None => Config::load_or_create()?,
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with(level, config.core.log_format);

    tracing::debug!("Weave v{}", env!("CARGO_PKG_VERSION"));

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::default_config_path()?,
                };
                println!("{}", path.display());
                Ok(())
            }
        },

        Command::History { session, limit } => {
            handle_history(&session, limit, &config, format).await
        }

        Command::Sessions { actor, limit } => handle_sessions(&actor, limit, &config, format).await,

        Command::Actors { query, limit } => {
            handle_actors(query.as_deref(), limit, &config, format).await
        }
    }
}
