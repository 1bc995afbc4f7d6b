//! Marionette CLI - drive the script engine and code helper channels.

mod classify;
mod code;
mod colors;
mod payload;
mod prewarm;
mod script;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use marionette_core::Config;

#[derive(Parser)]
#[command(name = "marionette")]
#[command(about = "Remote-control primitives over long-lived automation interpreters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON). Defaults to $MARIONETTE_CONFIG or the user config dir
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script through the script engine
    Script {
        /// Script text, or "-" to read it from stdin
        script: String,

        /// Run in a fresh interpreter instead of the persistent one
        #[arg(long)]
        once: bool,

        /// Timeout in milliseconds (defaults to the configured value)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Execute code through the code helper
    Code {
        /// Source text, or "-" to read it from stdin
        code: String,

        /// Timeout in milliseconds (defaults to the configured value)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Start interpreters ahead of time and report cold-start latency
    Prewarm {
        /// Only the script engine
        #[arg(long)]
        script: bool,

        /// Only the code helper
        #[arg(long)]
        code: bool,
    },

    /// Classify interpreter diagnostic text
    Classify {
        /// Diagnostic text, or "-" to read it from stdin
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format marionette-core errors with guidance
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<marionette_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Script {
            script,
            once,
            timeout_ms,
        } => {
            let config = load_config(cli.config)?;
            script::execute(&config, &script, once, timeout_ms)
                .await
                .map_err(format_error)?;
        }

        Commands::Code { code, timeout_ms } => {
            let config = load_config(cli.config)?;
            code::execute(&config, &code, timeout_ms)
                .await
                .map_err(format_error)?;
        }

        Commands::Prewarm { script, code } => {
            let config = load_config(cli.config)?;
            // Neither flag means both.
            let (script, code) = if script || code { (script, code) } else { (true, true) };
            prewarm::execute(&config, script, code)
                .await
                .map_err(format_error)?;
        }

        Commands::Classify { text } => {
            classify::execute(&text).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_path(&path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    tracing::debug!(?config, "Configuration loaded");
    Ok(config)
}
