//! Easy Mode - One button disk reading
//!
//! Asks for a file name, waits for the disk, and runs the whole automatic
//! read with live progress. Repeats for as many disks as the user has.

use anyhow::Result;
use colored::Colorize;
use console::Term;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};

use super::commands::run_read;
use super::OutputFormat;
use crate::config::Config;
use crate::core::{FailureKind, PipelineSettings};
use crate::display::StatusIcons;
use crate::report::RunReport;
use crate::tool::CancelToken;

/// Run the easy mode interactive workflow
pub async fn run_easy_mode(config: Config, cancel: CancelToken) -> Result<()> {
    let term = Term::stdout();
    term.clear_screen()?;

    print_banner();

    println!(
        "\n{}\n",
        "Welcome to Flux Drill Easy Mode! 💾".bright_cyan().bold()
    );
    println!(
        "Images are saved in {}\n",
        config.output.dump_dir.display().to_string().bright_white()
    );

    let mut suggested = config.output.default_filename.clone();

    loop {
        let filename = step_choose_filename(&config, &suggested)?;

        if !step_insert_disk()? {
            break;
        }

        println!();
        let report = run_read(&config, &filename, OutputFormat::Human, &cancel).await?;
        print_verdict(&report);

        if cancel.is_cancelled() {
            break;
        }

        if !Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Read another disk?")
            .default(true)
            .interact()?
        {
            break;
        }

        suggested = next_filename(&filename);
        println!();
    }

    println!("\n{}", "Bye!".bright_cyan());
    Ok(())
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║        💾  F L U X   D R I L L  💾                       ║
    ║                                                           ║
    ║          E A S Y   M O D E                                ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#;
    println!("{}", banner.bright_cyan());
}

fn step_choose_filename(config: &Config, suggested: &str) -> Result<String> {
    println!("{} Name the image", "Step 1:".bright_yellow().bold());

    let settings: PipelineSettings = config.pipeline_settings();
    let name: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("File name")
        .default(suggested.to_string())
        .validate_with(move |input: &String| -> Result<(), String> {
            settings.output_path(input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;

    Ok(name.trim().to_string())
}

fn step_insert_disk() -> Result<bool> {
    println!(
        "\n{} Insert the disk and close the drive door",
        "Step 2:".bright_yellow().bold()
    );

    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Ready to read?")
        .default(true)
        .interact()?)
}

fn print_verdict(report: &RunReport) {
    if let Some(image) = &report.image {
        println!(
            "\n{} {}",
            StatusIcons::SUCCESS.bright_green().bold(),
            format!("Saved {}", image.path.display()).bright_green()
        );
        return;
    }

    let hint = match report.failure {
        Some(FailureKind::DriveNotFound) => {
            "No drive answered. Check the cable, power and that the tool is connected."
        }
        Some(FailureKind::FormatNotDetected) => {
            "The disk could not be decoded. It may be blank, damaged or an unusual format."
        }
        Some(FailureKind::CaptureFailed) => "Reading the disk failed. Try cleaning the drive heads.",
        Some(FailureKind::WriteFailed) => "The image could not be written.",
        Some(FailureKind::InvalidOutputName) => "Pick a plain file name like disk1.img.",
        Some(FailureKind::Cancelled) => {
            println!("\n{} {}", StatusIcons::WARNING.bright_yellow(), "Read cancelled.".yellow());
            return;
        }
        None => "The read did not finish.",
    };
    println!(
        "\n{} {}",
        StatusIcons::ERROR.bright_red().bold(),
        hint.bright_red()
    );
}

/// Suggest the next name in a series: disk.img -> disk2.img -> disk3.img
pub fn next_filename(previous: &str) -> String {
    let (stem, ext) = match previous.rfind('.') {
        Some(i) if i > 0 => (&previous[..i], &previous[i..]),
        _ => (previous, ""),
    };

    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (base, number) = stem.split_at(stem.len() - digits);
    let next = number.parse::<u32>().map_or(2, |n| n + 1);

    format!("{}{}{}", base, next, ext)
}
