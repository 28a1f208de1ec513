use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use colored::Colorize;
use pipeline::{NoPublish, Orchestrator, ShellRunner, ToolchainSpec, WorkflowRequest};

use crate::{config, console, projects};

#[derive(Debug, Default)]
pub struct Options {
    pub clean: bool,
    pub no_flash: bool,
    pub port: Option<String>,
}

pub fn request(options: Options) -> WorkflowRequest {
    WorkflowRequest {
        clean: options.clean,
        flash: !options.no_flash,
        target: options.port,
        ..WorkflowRequest::default()
    }
}

pub async fn run(root: &Path, echo: bool, options: Options) -> Result<()> {
    let started = Instant::now();
    console::banner(&format!("{} Build & Flash", config::FIRMWARE_NAME));

    let layout = projects::firmware(root);
    let version = projects::firmware_version(root);
    console::field("Version", &version);
    console::field("Project", layout.root.display());

    let request = request(options);
    let spec = ToolchainSpec::esp_idf();
    let report = Orchestrator::new(&layout, &spec, ShellRunner::new(echo))
        .run(&request, &NoPublish)
        .await
        .map_err(console::fail)?;

    println!();
    match &report.artifact {
        Some(binary) => {
            console::field("Binary", binary.path.display());
            console::field("Size", format!("{:.1} KB", binary.size_kb()));
        }
        None => console::field("Binary", "not found after build".yellow()),
    }
    console::report(&report);
    println!();
    if request.flash {
        println!("{}", "🤖 Zobo is running the new firmware!".bold());
        println!("   {}", "Monitor with: cargo xtask monitor".dimmed());
        println!();
    }
    console::finished(started);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{FlashFailure, PublishMode};

    #[test]
    fn build_and_flash_by_default() {
        let req = request(Options::default());
        assert!(req.build);
        assert!(req.flash);
        assert!(!req.clean);
        assert_eq!(req.flash_failure, FlashFailure::Abort);
        assert_eq!(req.publish, PublishMode::None);
        assert_eq!(req.target, None);
    }

    #[test]
    fn no_flash_with_port() {
        let req = request(Options {
            clean: true,
            no_flash: true,
            port: Some("/dev/ttyUSB0".into()),
        });
        assert!(req.clean);
        assert!(!req.flash);
        assert_eq!(req.target.as_deref(), Some("/dev/ttyUSB0"));
    }
}
