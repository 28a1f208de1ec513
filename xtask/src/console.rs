//! Banners, summaries and failure diagnostics printed by every task.

use std::time::Instant;

use colored::Colorize;
use pipeline::orchestrator::FAILURE_TAIL_LINES;
use pipeline::{LocateError, PipelineError, PublishError, RunError, RunReport};

pub fn banner(title: &str) {
    let rule = "=".repeat(50);
    println!();
    println!("{}", rule.cyan());
    println!("  {}", title.cyan().bold());
    println!("{}", rule.cyan());
    println!();
}

pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("   {:<10} {}", format!("{label}:").dimmed(), value);
}

pub fn finished(started: Instant) {
    println!(
        "{}",
        format!("✓ Done in {:.2}s", started.elapsed().as_secs_f64())
            .green()
            .bold()
    );
}

/// Toolchain used and any downgraded failures.
pub fn report(report: &RunReport) {
    if let Some(toolchain) = &report.toolchain {
        field(toolchain.name(), toolchain.root().display());
    }
    for warning in &report.warnings {
        field("Warning", warning.yellow());
    }
}

/// Print everything useful about `err`, then hand it back for `?`.
pub fn fail(err: PipelineError) -> anyhow::Error {
    eprintln!();
    match &err {
        PipelineError::Toolchain(LocateError::NotFound {
            toolchain,
            env_var,
            searched,
        }) => {
            eprintln!("{}", format!("✗ {toolchain} not found!").red().bold());
            eprintln!();
            eprintln!("Searched locations:");
            for path in searched {
                eprintln!("   {}", path.display().to_string().dimmed());
            }
            eprintln!();
            eprintln!("Set {} to your installation directory.", env_var.bold());
        }
        PipelineError::MissingArtifact(path) => {
            eprintln!(
                "{}",
                format!("✗ Build output not found: {}", path.display()).red().bold()
            );
            eprintln!("   {}", "Build first or drop --skip-build".dimmed());
        }
        PipelineError::FlashFailed { target, .. } => {
            eprintln!("{}", format!("✗ Flash failed on {target}").red().bold());
            eprintln!(
                "   {}",
                "Check the cable and that the device is powered, or pass --port".dimmed()
            );
        }
        PipelineError::Publish(publish) => publish_hint(publish),
        PipelineError::Run(RunError::Interrupted { .. }) => {
            eprintln!("{}", "Interrupted.".yellow().bold());
        }
        other => eprintln!("{}", format!("✗ {other}").red().bold()),
    }

    if let Some(output) = err.output() {
        let tail = output.tail(FAILURE_TAIL_LINES);
        if !tail.is_empty() {
            eprintln!();
            eprintln!("{}", format!("Last {FAILURE_TAIL_LINES} lines of output:").dimmed());
            for line in tail.lines() {
                eprintln!("   {line}");
            }
        }
    }
    eprintln!();

    anyhow::Error::new(err)
}

fn publish_hint(err: &PublishError) {
    eprintln!("{}", format!("✗ {err}").red().bold());
    let hint = match err {
        PublishError::ReleaseExists { .. } => {
            "Delete the existing release or bump FIRMWARE_VERSION in main/ota_manager.h"
        }
        PublishError::CliMissing => "Install it from https://cli.github.com",
        PublishError::NotAuthenticated => "Run: gh auth login",
        PublishError::UnknownVersion => "Define FIRMWARE_VERSION in main/ota_manager.h",
        PublishError::Server { .. } => "Is another server already using this port? Try --http-port",
        PublishError::Metadata { .. } | PublishError::CommandFailed { .. } => return,
    };
    eprintln!("   {}", hint.dimmed());
}
