use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Result};
use colored::Colorize;
use pipeline::publish::metadata::release_tag;
use pipeline::{
    ArtifactPublisher, FlashFailure, Orchestrator, PublishMode, ShellRunner, ToolchainSpec,
    WorkflowRequest, UNKNOWN_VERSION,
};

use crate::{config, console, projects};

#[derive(Debug)]
pub struct Options {
    pub draft: bool,
    pub prerelease: bool,
    pub skip_build: bool,
    pub flash: bool,
    pub port: Option<String>,
    pub repo: String,
}

pub fn request(options: &Options) -> WorkflowRequest {
    WorkflowRequest {
        build: !options.skip_build,
        flash: options.flash,
        flash_failure: FlashFailure::Warn,
        publish: PublishMode::Release {
            draft: options.draft,
            prerelease: options.prerelease,
        },
        target: options.port.clone(),
        ..WorkflowRequest::default()
    }
}

pub async fn run(root: &Path, echo: bool, options: Options) -> Result<()> {
    let started = Instant::now();
    console::banner(&format!("{} GitHub Release", config::FIRMWARE_NAME));

    let version = projects::firmware_version(root);
    if version == UNKNOWN_VERSION {
        eprintln!(
            "{}",
            "✗ Could not determine the firmware version".red().bold()
        );
        eprintln!(
            "   {}",
            "Define FIRMWARE_VERSION in main/ota_manager.h".dimmed()
        );
        bail!("firmware version is unknown");
    }
    let tag = release_tag(&version);
    console::field("Version", &version);
    console::field("Tag", &tag);
    console::field("Repo", &options.repo);
    if options.draft {
        console::field("Mode", "draft");
    } else if options.prerelease {
        console::field("Mode", "pre-release");
    }

    let layout = projects::firmware(root);
    let publisher = ArtifactPublisher {
        product: config::FIRMWARE_NAME.to_string(),
        version,
        repo: options.repo.clone(),
    };
    let spec = ToolchainSpec::esp_idf();
    let report = Orchestrator::new(&layout, &spec, ShellRunner::new(echo))
        .run(&request(&options), &publisher)
        .await
        .map_err(console::fail)?;

    println!();
    console::field(
        "Release",
        format!("https://github.com/{}/releases/tag/{tag}", options.repo),
    );
    console::report(&report);
    println!();
    println!(
        "   {}",
        "The robot picks this up on its next update check.".dimmed()
    );
    console::finished(started);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            draft: false,
            prerelease: false,
            skip_build: false,
            flash: false,
            port: None,
            repo: config::RELEASE_REPO.to_string(),
        }
    }

    #[test]
    fn release_flags_reach_publish_mode() {
        let req = request(&Options {
            draft: true,
            prerelease: true,
            ..options()
        });
        assert_eq!(
            req.publish,
            PublishMode::Release {
                draft: true,
                prerelease: true
            }
        );
        assert!(req.build);
        assert!(!req.clean);
    }

    #[test]
    fn flash_before_release_only_warns() {
        let req = request(&Options {
            skip_build: true,
            flash: true,
            ..options()
        });
        assert!(!req.build);
        assert!(req.flash);
        assert_eq!(req.flash_failure, FlashFailure::Warn);
    }
}
