use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use pipeline::device;
use pipeline::{
    NoPublish, Orchestrator, ResolvePolicy, RunReport, ShellRunner, ToolchainSpec, WorkflowRequest,
};

use crate::{config, console, projects};

#[derive(Debug, Default)]
pub struct Options {
    pub no_install: bool,
    pub clean: bool,
    pub force_deps: bool,
    pub debug: bool,
    pub device: Option<String>,
}

/// `device` is the adb serial to install on; ignored with `no_install`.
pub fn request(options: &Options, device: Option<String>) -> WorkflowRequest {
    WorkflowRequest {
        clean: options.clean,
        resolve: if options.force_deps {
            ResolvePolicy::Force
        } else {
            ResolvePolicy::Auto
        },
        flash: !options.no_install,
        target: if options.no_install { None } else { device },
        ..WorkflowRequest::default()
    }
}

/// Summary line for the install step; the launch is best-effort and its
/// failure only shows up as a warning.
pub fn install_status(request: &WorkflowRequest, report: &RunReport) -> Option<ColoredString> {
    if !request.flash {
        return None;
    }
    Some(if report.warnings.is_empty() {
        "installed and launched".green()
    } else {
        "installed, launch failed".yellow()
    })
}

pub async fn run(root: &Path, echo: bool, options: Options) -> Result<()> {
    let started = Instant::now();
    console::banner(&format!("{} Build & Install", config::APP_NAME));

    console::field("Version", projects::app_version(root));
    console::field("Mode", if options.debug { "debug log on" } else { "release" });

    let device = match (&options.device, options.no_install) {
        (_, true) => None,
        (Some(serial), false) => Some(serial.clone()),
        (None, false) => match device::first_connected().await {
            Ok(serial) => Some(serial),
            Err(e) => {
                eprintln!("{}", format!("✗ {e}").red().bold());
                eprintln!("   {}", "Use --no-install to build without a phone".dimmed());
                return Err(e).context("no device to install on");
            }
        },
    };
    if let Some(serial) = &device {
        console::field("Device", serial);
    }

    let layout = projects::app(root, options.debug);
    let request = request(&options, device);
    let spec = ToolchainSpec::flutter();
    let report = Orchestrator::new(&layout, &spec, ShellRunner::new(echo))
        .run(&request, &NoPublish)
        .await
        .map_err(console::fail)?;

    println!();
    match &report.artifact {
        Some(apk) => {
            console::field("APK", apk.path.display());
            console::field("Size", format!("{:.1} MB", apk.size_kb() / 1024.0));
        }
        None => console::field("APK", "not found after build".yellow()),
    }
    console::report(&report);
    if let Some(status) = install_status(&request, &report) {
        console::field("Status", status);
    }
    println!();
    console::finished(started);
    Ok(())
}
