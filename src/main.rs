//! Flux Drill - Automatic floppy disk imaging
//!
//! Drives an external flux tool: finds a responding drive, captures flux
//! once, scores every candidate format against it and writes the best
//! match as a disk image.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flux_drill::cli::{self, Cli, Commands};
use flux_drill::config::Config;
use flux_drill::tool::CancelToken;
use flux_drill::worker::RunSlot;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load(),
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(format!("flux_drill={}", level).parse()?))
        .init();

    let cancel = CancelToken::new();
    watch_ctrl_c(cancel.clone());

    let output = cli.output.unwrap_or_default();

    if cli.easy {
        return cli::easy_mode::run_easy_mode(config, cancel).await;
    }

    let ok = match cli.command {
        Some(Commands::Read(args)) => cli::commands::read(config, &args, output, &cancel).await?,
        Some(Commands::Probe(args)) => cli::commands::probe(config, &args, output, &cancel).await?,
        Some(Commands::Capture(args)) => {
            cli::commands::capture(config, &args, output, &cancel).await?
        }
        Some(Commands::Detect(args)) => {
            cli::commands::detect(config, &args, output, &cancel).await?
        }
        Some(Commands::Config(args)) => {
            cli::commands::config(cli.config.as_deref(), &args)?;
            true
        }
        None => {
            // Default: guided mode
            cli::easy_mode::run_easy_mode(config, cancel).await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }

    Ok(())
}

/// First Ctrl-C cancels a running read; a second one, or one while idle, exits
fn watch_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !RunSlot::is_taken() || cancel.is_cancelled() {
                std::process::exit(130);
            }
            eprintln!("\nCancelling... (press Ctrl-C again to quit)");
            cancel.cancel();
        }
    });
}
