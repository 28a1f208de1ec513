use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use pipeline::{
    ArtifactPublisher, FlashFailure, Orchestrator, PublishMode, ShellRunner, ToolchainSpec,
    WorkflowRequest,
};

use crate::{config, console, projects};

#[derive(Debug)]
pub struct Options {
    pub skip_build: bool,
    pub clean: bool,
    pub flash: bool,
    pub port: Option<String>,
    pub http_port: u16,
}

/// A failed serial flash never blocks serving: the robot can still pull the
/// image over Wi-Fi.
pub fn request(options: Options) -> WorkflowRequest {
    WorkflowRequest {
        clean: options.clean,
        build: !options.skip_build,
        flash: options.flash,
        flash_failure: FlashFailure::Warn,
        publish: PublishMode::Http {
            port: options.http_port,
        },
        target: options.port,
        ..WorkflowRequest::default()
    }
}

pub async fn run(root: &Path, echo: bool, options: Options) -> Result<()> {
    let started = Instant::now();
    console::banner(&format!("{} OTA Server", config::FIRMWARE_NAME));

    let layout = projects::firmware(root);
    let version = projects::firmware_version(root);
    console::field("Version", &version);

    let publisher = ArtifactPublisher {
        product: config::FIRMWARE_NAME.to_string(),
        version,
        repo: config::RELEASE_REPO.to_string(),
    };
    let spec = ToolchainSpec::esp_idf();
    let report = Orchestrator::new(&layout, &spec, ShellRunner::new(echo))
        .run(&request(options), &publisher)
        .await
        .map_err(console::fail)?;

    console::report(&report);
    console::finished(started);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            skip_build: false,
            clean: false,
            flash: false,
            port: None,
            http_port: config::DEFAULT_OTA_PORT,
        }
    }

    #[test]
    fn serves_on_requested_port() {
        let req = request(Options {
            http_port: 9000,
            ..options()
        });
        assert!(req.build);
        assert!(!req.flash);
        assert_eq!(req.publish, PublishMode::Http { port: 9000 });
    }

    #[test]
    fn skip_build_and_flash_downgrades_failures() {
        let req = request(Options {
            skip_build: true,
            flash: true,
            port: Some("COM3".into()),
            ..options()
        });
        assert!(!req.build);
        assert!(req.flash);
        assert_eq!(req.flash_failure, FlashFailure::Warn);
        assert_eq!(req.target_label(), "COM3");
    }
}
