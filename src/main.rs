use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jerai::config::{DEFAULT_CONFIG_FILE, JeraiConfig, LogFormat};
use jerai::logging;
use jerai::tracker::server;

#[derive(Parser)]
#[command(name = "jerai")]
#[command(version, about = "Issue tracker backend with an AI-assisted fix workflow")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to jerai.toml. A missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log output format. Overrides [logging] format.
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP + WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local frontend dev server)
        #[arg(long)]
        dev: bool,

        /// Initialize database only (don't start server)
        #[arg(long)]
        init: bool,
    },
    /// Print the effective configuration and any warnings
    Config {
        /// Save the effective configuration to the --config path instead.
        /// The API key is left out of the file.
        #[arg(long)]
        write: bool,
    },
}

fn load_config(cli: &Cli) -> Result<JeraiConfig> {
    let mut config = JeraiConfig::load_or_default(&cli.config)?;
    config
        .apply_env()
        .context("Invalid environment configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    logging::init(config.logging.format, cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
            init,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(db_path) = db_path {
                config.database.path = db_path;
            }
            config.server.dev_mode |= dev;

            if init {
                server::open_database(&config.database.path)?;
                println!("Database initialized at {}", config.database.path.display());
                return Ok(());
            }

            for warning in config.validate() {
                tracing::warn!("{}", warning);
            }
            server::start_server(&config).await?;
        }
        Commands::Config { write } => {
            if write {
                let mut saved = config.clone();
                saved.ai.api_key = None;
                saved.save(&cli.config)?;
                println!("Configuration written to {}", cli.config.display());
            } else {
                let mut shown = config.clone();
                if shown.ai.api_key.is_some() {
                    shown.ai.api_key = Some("<redacted>".to_string());
                }
                let rendered =
                    toml::to_string_pretty(&shown).context("Failed to render configuration")?;
                print!("{}", rendered);
            }
            for warning in config.validate() {
                eprintln!("warning: {}", warning);
            }
        }
    }

    Ok(())
}
