//! Publishing a built artifact together with its `version.json`.
//!
//! Two mutually exclusive paths, picked by [`PublishMode`]:
//!
//! - **HTTP**: write `version.json` into the build directory and serve that
//!   directory on the LAN until Ctrl-C ([`server`]).
//! - **Release**: write `version.json` and upload both files as a GitHub
//!   release tagged `v{version}` ([`release`]).

pub mod metadata;
pub mod release;
pub mod server;

use std::io;
use std::path::PathBuf;

use colored::Colorize;

pub use metadata::{VersionMetadata, METADATA_FILE};
pub use release::ReleaseRequest;

use crate::orchestrator::{Artifact, PublishMode};
use crate::version::UNKNOWN_VERSION;

/// Why an artifact could not be published.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// `version.json` could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Metadata {
        /// Metadata file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The OTA server could not start or failed while serving.
    #[error("OTA server failed on port {port}: {source}")]
    Server {
        /// Port the server was bound to.
        port: u16,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The version could not be determined.
    #[error("firmware version is unknown; refusing to publish a release")]
    UnknownVersion,
    /// `gh` is not installed.
    #[error("GitHub CLI (gh) not installed")]
    CliMissing,
    /// `gh` has no logged-in account.
    #[error("not authenticated with GitHub (run `gh auth login`)")]
    NotAuthenticated,
    /// A release with this tag already exists.
    #[error("release {tag} already exists")]
    ReleaseExists {
        /// Tag that is already taken.
        tag: String,
    },
    /// `gh release create` failed for another reason.
    #[error("release command failed: {stderr}")]
    CommandFailed {
        /// What `gh` printed on stderr.
        stderr: String,
    },
}

/// Hands a built artifact to its consumers.
#[allow(async_fn_in_trait)]
pub trait Publish {
    /// Publish `artifact` according to `mode`.
    async fn publish(&self, artifact: &Artifact, mode: &PublishMode) -> Result<(), PublishError>;
}

/// For workflows that never publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPublish;

impl Publish for NoPublish {
    async fn publish(&self, _artifact: &Artifact, _mode: &PublishMode) -> Result<(), PublishError> {
        Ok(())
    }
}

/// The real publisher: OTA server or GitHub release.
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    /// Product name used in release titles and notes.
    pub product: String,
    /// Version string published alongside the artifact.
    pub version: String,
    /// `owner/name` of the GitHub repository receiving releases.
    pub repo: String,
}

impl ArtifactPublisher {
    async fn serve(&self, artifact: &Artifact, port: u16) -> Result<(), PublishError> {
        let host = metadata::local_ip();
        let meta = VersionMetadata::for_http(artifact, &self.version, &host, port);
        let base = format!("http://{host}:{port}/");

        println!();
        println!("{}", "📡 Starting OTA server".cyan().bold());
        println!("   Serving at   {}", base.bold());
        println!("   Firmware URL {}", meta.url);
        println!("   Version JSON {}{}", base, METADATA_FILE);
        println!();
        println!("{}", "Press Ctrl+C to stop".dimmed());
        println!();

        server::serve_over_http(artifact.dir(), port, &meta)
            .await
            .map_err(|source| PublishError::Server { port, source })?;

        println!();
        println!("{}", "Server stopped.".yellow());
        Ok(())
    }

    async fn release(
        &self,
        artifact: &Artifact,
        draft: bool,
        prerelease: bool,
    ) -> Result<(), PublishError> {
        if self.version == UNKNOWN_VERSION {
            return Err(PublishError::UnknownVersion);
        }

        let meta = VersionMetadata::for_release(artifact, &self.version, &self.repo);
        let metadata_path = meta.write_to(artifact.dir()).map_err(|source| PublishError::Metadata {
            path: artifact.dir().join(METADATA_FILE),
            source,
        })?;
        println!("   {}", format!("Created {}", metadata_path.display()).dimmed());

        release::check_release_cli().await?;
        println!("   {}", "GitHub CLI ready".dimmed());

        let request = ReleaseRequest {
            tag: metadata::release_tag(&self.version),
            title: format!("Firmware {}", self.version),
            notes: release::firmware_notes(&self.product, &self.version, &artifact.file_name()),
            artifact: artifact.path.clone(),
            metadata: metadata_path,
            draft,
            prerelease,
        };
        println!("   {}", format!("Creating release {}...", request.tag).dimmed());
        let url = release::create_release(&request).await?;
        println!("{}", format!("✓ Release created: {url}").green());
        Ok(())
    }
}

impl Publish for ArtifactPublisher {
    async fn publish(&self, artifact: &Artifact, mode: &PublishMode) -> Result<(), PublishError> {
        match *mode {
            PublishMode::None => Ok(()),
            PublishMode::Http { port } => self.serve(artifact, port).await,
            PublishMode::Release { draft, prerelease } => {
                self.release(artifact, draft, prerelease).await
            }
        }
    }
}
