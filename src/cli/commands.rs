//! Command handlers - Wire configuration, the flux tool and the worker

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use super::{CaptureArgs, ConfigArgs, DetectArgs, OutputFormat, ProbeArgs, ReadArgs};
use crate::config::{generate_sample_config, Config};
use crate::core::FluxCapture;
use crate::display::{Presenter, StatusIcons};
use crate::report::{format_report, RunReport};
use crate::tool::{CancelToken, FluxTool, ProcessTool};
use crate::worker::{self, RunRequest};

/// Subprocess tool built from the configuration
pub fn build_tool(config: &Config, cancel: &CancelToken) -> Arc<dyn FluxTool> {
    Arc::new(
        ProcessTool::new(&config.tool.program)
            .with_timeout(config.tool.timeout())
            .with_cancel(cancel.clone()),
    )
}

/// Validate the configuration and create the dump directory
fn prepare(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    std::fs::create_dir_all(&config.output.dump_dir).with_context(|| {
        format!(
            "Failed to create dump directory {}",
            config.output.dump_dir.display()
        )
    })
}

/// Run the full pipeline in the background while presenting its progress
pub async fn run_read(
    config: &Config,
    output_name: &str,
    output: OutputFormat,
    cancel: &CancelToken,
) -> Result<RunReport> {
    prepare(config)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let request = RunRequest {
        tool: build_tool(config, cancel),
        settings: config.pipeline_settings(),
        output_name: output_name.to_string(),
        cancel: cancel.clone(),
    };

    let handle = worker::spawn_run(request, tx)?;
    let presenter = Presenter::new(rx).to_stderr(output == OutputFormat::Json);
    let report = presenter.follow(handle).await.context("Read task failed")?;
    Ok(report)
}

/// `flux-drill read`
pub async fn read(
    mut config: Config,
    args: &ReadArgs,
    output: OutputFormat,
    cancel: &CancelToken,
) -> Result<bool> {
    args.tool.apply(&mut config);
    args.drives.apply(&mut config);
    args.flux.apply(&mut config);
    args.formats.apply(&mut config);

    let name = args
        .filename
        .clone()
        .unwrap_or_else(|| config.output.default_filename.clone());

    let report = run_read(&config, &name, output, cancel).await?;

    match output {
        OutputFormat::Human => print!("{}", format_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    if let Some(ref path) = args.report {
        report.save(path)?;
        tracing::info!("Report saved to {}", path.display());
    }

    Ok(report.succeeded())
}

/// `flux-drill probe`
pub async fn probe(
    mut config: Config,
    args: &ProbeArgs,
    output: OutputFormat,
    cancel: &CancelToken,
) -> Result<bool> {
    args.tool.apply(&mut config);
    args.drives.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let tool = build_tool(&config, cancel);
    let settings = config.pipeline_settings();
    let (tx, rx) = crossbeam_channel::unbounded();

    let handle = worker::spawn_job(move || settings.prober(tool.as_ref()).find_drive(&tx))?;
    let drive = Presenter::new(rx)
        .to_stderr(output == OutputFormat::Json)
        .follow(handle)
        .await??;

    match output {
        OutputFormat::Human => match &drive {
            Some(d) => println!("{} Drive {} responds", StatusIcons::SUCCESS.green(), d),
            None => println!("{} No drive responded", StatusIcons::ERROR.red()),
        },
        OutputFormat::Json => println!("{}", json!({ "drive": drive })),
    }

    Ok(drive.is_some())
}

/// `flux-drill capture`
pub async fn capture(
    mut config: Config,
    args: &CaptureArgs,
    output: OutputFormat,
    cancel: &CancelToken,
) -> Result<bool> {
    args.tool.apply(&mut config);
    args.drives.apply(&mut config);
    args.flux.apply(&mut config);
    prepare(&config)?;

    let tool = build_tool(&config, cancel);
    let settings = config.pipeline_settings();
    let (tx, rx) = crossbeam_channel::unbounded();

    let handle = worker::spawn_job(move || -> Result<Option<FluxCapture>> {
        let Some(drive) = settings.prober(tool.as_ref()).find_drive(&tx)? else {
            return Ok(None);
        };
        let flux = settings.capturer(tool.as_ref()).capture_flux(&drive, &tx)?;
        Ok(Some(flux))
    })?;
    let flux = Presenter::new(rx)
        .to_stderr(output == OutputFormat::Json)
        .follow(handle)
        .await??;

    match output {
        OutputFormat::Human => match &flux {
            Some(f) => println!(
                "{} Flux saved to {} ({})",
                StatusIcons::DISK,
                f.path.display(),
                f.size_on_disk()
                    .map(|s| humansize::format_size(s, humansize::BINARY))
                    .unwrap_or_else(|| "size unknown".to_string())
            ),
            None => println!("{} No drive responded", StatusIcons::ERROR.red()),
        },
        OutputFormat::Json => println!("{}", json!({ "flux": flux })),
    }

    Ok(flux.is_some())
}

/// `flux-drill detect`
pub async fn detect(
    mut config: Config,
    args: &DetectArgs,
    output: OutputFormat,
    cancel: &CancelToken,
) -> Result<bool> {
    args.tool.apply(&mut config);
    args.formats.apply(&mut config);
    prepare(&config)?;

    if !args.flux_file.exists() {
        anyhow::bail!("Flux file not found: {}", args.flux_file.display());
    }

    let tool = build_tool(&config, cancel);
    let settings = config.pipeline_settings();
    let flux = FluxCapture::existing(&args.flux_file, settings.revolutions);
    let (tx, rx) = crossbeam_channel::unbounded();

    let handle =
        worker::spawn_job(move || settings.scorer(tool.as_ref()).detect_format(&flux, &tx))?;
    let detection = Presenter::new(rx)
        .to_stderr(output == OutputFormat::Json)
        .follow(handle)
        .await??;

    match output {
        OutputFormat::Human => match &detection {
            Some(d) => println!(
                "{} Format {} (score {:.3}{})",
                StatusIcons::SUCCESS.green(),
                d.format().to_string().bright_white(),
                d.adjusted_score(),
                if d.is_confident() { ", confident" } else { "" }
            ),
            None => println!("{} Format not detected", StatusIcons::ERROR.red()),
        },
        OutputFormat::Json => println!("{}", json!({ "detection": detection })),
    }

    Ok(detection.is_some())
}

/// `flux-drill config`
pub fn config(config_path: Option<&std::path::Path>, args: &ConfigArgs) -> Result<()> {
    if args.sample {
        print!("{}", generate_sample_config());
        return Ok(());
    }

    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None if args.init => Config::ensure_exists()?,
        None => Config::default_path(),
    };
    if args.init && !path.exists() {
        Config::default().save_to(&path)?;
    }

    println!("# {}", path.display());
    let config = if path.exists() {
        Config::load_from(&path)?
    } else {
        println!("# (not found, showing defaults)");
        Config::default()
    };
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
