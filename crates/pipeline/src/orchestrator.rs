//! Build/flash orchestration.
//!
//! ```text
//! INIT → (CLEAN) → (RESOLVE) → BUILD → (FLASH) → (PUBLISH) → DONE
//! ```
//!
//! Stages run strictly in order. The first failing stage stops the run; there
//! are no retries and nothing is rolled back. The one exception is FLASH under
//! [`FlashFailure::Warn`]: the failure is recorded as a warning and the run
//! carries on to publishing, since a firmware image that built but could not
//! be flashed over serial can still be handed out over OTA.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use colored::Colorize;

use crate::deps::{self, Decision, GateError};
use crate::publish::{Publish, PublishError};
use crate::runner::{CommandOutput, RunError, Runner};
use crate::toolchain::{LocateError, Toolchain, ToolchainSpec};

/// Number of output lines kept in stage-failure errors.
pub const FAILURE_TAIL_LINES: usize = 40;

/// One step of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Remove prior build output.
    Clean,
    /// Fetch dependencies.
    Resolve,
    /// Compile the artifact.
    Build,
    /// Write the artifact to a device.
    Flash,
    /// Hand the artifact to its consumers.
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::Resolve => "resolve",
            Self::Build => "build",
            Self::Flash => "flash",
            Self::Publish => "publish",
        })
    }
}

/// How prior build output is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanAction {
    /// Delete a directory tree. A missing directory is not an error.
    RemoveDir(PathBuf),
    /// Run a tool-provided clean command (`flutter clean`).
    Command(String),
}

/// Dependency resolution guarded by the fingerprint gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveStep {
    /// Manifest whose contents are fingerprinted.
    pub manifest: PathBuf,
    /// Lock file written by the resolve command.
    pub lock: PathBuf,
    /// Sidecar file holding the last recorded fingerprint.
    pub record: PathBuf,
    /// Resolve command, run from the project root.
    pub command: String,
}

/// A command that optionally names a target device.
///
/// `targeted` contains a `{target}` placeholder; `untargeted` is used when no
/// target is given and lets the tool pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Command with a `{target}` placeholder.
    pub targeted: String,
    /// Command used when no target is given.
    pub untargeted: String,
}

impl CommandTemplate {
    /// Pair a targeted command with its fallback.
    pub fn new(targeted: impl Into<String>, untargeted: impl Into<String>) -> Self {
        Self {
            targeted: targeted.into(),
            untargeted: untargeted.into(),
        }
    }

    /// Substitute `target`, or fall back to the untargeted form.
    pub fn render(&self, target: Option<&str>) -> String {
        match target {
            Some(target) => self.targeted.replace("{target}", target),
            None => self.untargeted.clone(),
        }
    }
}

/// Everything the orchestrator needs to know about one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    /// Product name shown in banners.
    pub name: String,
    /// Working directory for every command.
    pub root: PathBuf,
    /// How `--clean` removes prior output.
    pub clean: CleanAction,
    /// Gated dependency resolution, if the project has one.
    pub resolve: Option<ResolveStep>,
    /// Build command.
    pub build: String,
    /// Flash or install command.
    pub flash: Option<CommandTemplate>,
    /// Best-effort follow-up after a successful flash (e.g. launching the app).
    pub post_flash: Option<CommandTemplate>,
    /// Binary produced by a successful build.
    pub artifact: PathBuf,
}

/// Whether dependency resolution consults the fingerprint gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Ask the fingerprint gate.
    #[default]
    Auto,
    /// Resolve regardless of the gate.
    Force,
    /// Never resolve.
    Skip,
}

/// What a failed flash does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlashFailure {
    /// A failed flash ends the run.
    #[default]
    Abort,
    /// A failed flash is recorded as a warning and the run continues.
    Warn,
}

/// Where the artifact goes after a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// Keep the artifact local.
    #[default]
    None,
    /// Serve the artifact directory over HTTP on `port`.
    Http {
        /// TCP port to listen on.
        port: u16,
    },
    /// Create an external release.
    Release {
        /// Leave the release unpublished.
        draft: bool,
        /// Mark the release as a pre-release.
        prerelease: bool,
    },
}

/// The resolved set of stages for one invocation. Built once by the entry
/// point and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    /// Remove prior build output first.
    pub clean: bool,
    /// Dependency resolution policy.
    pub resolve: ResolvePolicy,
    /// Run the build. When off the artifact must already exist.
    pub build: bool,
    /// Flash or install the artifact.
    pub flash: bool,
    /// Whether a failed flash ends the run.
    pub flash_failure: FlashFailure,
    /// Publishing step after flashing.
    pub publish: PublishMode,
    /// Serial port or device serial. `None` lets the tool choose.
    pub target: Option<String>,
}

impl Default for WorkflowRequest {
    fn default() -> Self {
        Self {
            clean: false,
            resolve: ResolvePolicy::Auto,
            build: true,
            flash: false,
            flash_failure: FlashFailure::Abort,
            publish: PublishMode::None,
            target: None,
        }
    }
}

impl WorkflowRequest {
    /// Display form of the flash target.
    pub fn target_label(&self) -> &str {
        self.target.as_deref().unwrap_or("default port")
    }
}

/// A built binary on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location on disk.
    pub path: PathBuf,
    /// Length in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl Artifact {
    /// Stat `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, `NotFound` if there is no artifact.
    pub fn inspect(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a file"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
        })
    }

    /// File name without its directory.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory holding the artifact.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Size in KiB.
    pub fn size_kb(&self) -> f64 {
        self.size as f64 / 1024.0
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Toolchain used, `None` when no stage needed one.
    pub toolchain: Option<Toolchain>,
    /// Stages that completed, in order.
    pub stages: Vec<Stage>,
    /// Fingerprint gate decision, when the gate was consulted.
    pub resolve: Option<Decision>,
    /// Failures downgraded to warnings.
    pub warnings: Vec<String>,
    /// The built artifact. Only a build-and-flash run may end without one.
    pub artifact: Option<Artifact>,
    /// Whether the publish stage ran.
    pub published: bool,
}

/// Why a run stopped.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No toolchain installation was found.
    #[error(transparent)]
    Toolchain(#[from] LocateError),
    /// A stage command exited non-zero.
    #[error("{stage} failed")]
    StageFailed {
        /// Stage whose command failed.
        stage: Stage,
        /// Everything the command printed.
        output: CommandOutput,
    },
    /// The flash command exited non-zero.
    #[error("flash failed on {target}")]
    FlashFailed {
        /// Port or device that was flashed, `default port` when the tool picked one.
        target: String,
        /// Everything the flash tool printed.
        output: CommandOutput,
    },
    /// The artifact is missing where one is required.
    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),
    /// Prior build output could not be removed.
    #[error("failed to clean {}: {source}", path.display())]
    Clean {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The fingerprint gate failed.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// A command could not be run or was interrupted.
    #[error(transparent)]
    Run(#[from] RunError),
    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// Failed stage, if the error came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            Self::FlashFailed { .. } => Some(Stage::Flash),
            Self::Clean { .. } => Some(Stage::Clean),
            Self::Gate(_) => Some(Stage::Resolve),
            Self::Publish(_) => Some(Stage::Publish),
            Self::Toolchain(_) | Self::MissingArtifact(_) | Self::Run(_) => None,
        }
    }

    /// Captured command output, if any.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::StageFailed { output, .. } | Self::FlashFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Drives one project through the requested stages.
pub struct Orchestrator<'a, R> {
    layout: &'a ProjectLayout,
    toolchain: &'a ToolchainSpec,
    runner: R,
}

impl<'a, R: Runner> Orchestrator<'a, R> {
    /// Orchestrate `layout` with the `toolchain` it builds with.
    pub fn new(layout: &'a ProjectLayout, toolchain: &'a ToolchainSpec, runner: R) -> Self {
        Self {
            layout,
            toolchain,
            runner,
        }
    }

    /// Execute `request`, handing the artifact to `publisher` at the end.
    ///
    /// The toolchain is located once, before any stage, and only if some
    /// stage needs it.
    ///
    /// # Errors
    ///
    /// Returns the first failure; see [`PipelineError`].
    pub async fn run<P: Publish>(
        &self,
        request: &WorkflowRequest,
        publisher: &P,
    ) -> Result<RunReport, PipelineError> {
        let toolchain = if self.needs_toolchain(request) {
            Some(self.toolchain.locate()?)
        } else {
            None
        };

        let mut stages = Vec::new();
        let mut warnings = Vec::new();
        let mut resolve = None;

        if request.clean {
            self.clean(toolchain.as_ref()).await?;
            stages.push(Stage::Clean);
        }

        if let (Some(step), Some(tc)) = (&self.layout.resolve, toolchain.as_ref()) {
            if request.resolve != ResolvePolicy::Skip {
                let decision = match request.resolve {
                    ResolvePolicy::Force => Decision::Forced,
                    _ => deps::needs_resolution(&step.manifest, &step.lock, &step.record),
                };
                if decision.needed() {
                    section(&format!(
                        "Resolving dependencies ({})...",
                        decision.reason().unwrap_or_default()
                    ));
                    self.stage(Stage::Resolve, tc, &step.command).await?;
                    deps::record_resolution(&step.manifest, &step.record)?;
                    stages.push(Stage::Resolve);
                } else {
                    println!("{}", "  Dependencies: up to date".dimmed());
                }
                resolve = Some(decision);
            }
        }

        if request.build {
            if let Some(tc) = toolchain.as_ref() {
                section(&format!("Building {}...", self.layout.name));
                let start = Instant::now();
                self.stage(Stage::Build, tc, &self.layout.build).await?;
                println!(
                    "{}",
                    format!("✓ Build successful in {:.2}s", start.elapsed().as_secs_f64()).green()
                );
                stages.push(Stage::Build);
            }
        }

        // Publishing and skipped builds cannot go on without the image; a
        // plain build-and-flash only reports it afterwards.
        let requires_artifact = request.publish != PublishMode::None || !request.build;
        let mut artifact = if requires_artifact {
            Some(self.require_artifact()?)
        } else {
            None
        };

        if request.flash {
            if let (Some(template), Some(tc)) = (&self.layout.flash, toolchain.as_ref()) {
                match self.flash(tc, template, request, &mut warnings).await {
                    Ok(()) => stages.push(Stage::Flash),
                    Err(e @ PipelineError::FlashFailed { .. })
                        if request.flash_failure == FlashFailure::Warn =>
                    {
                        let warning = e.to_string();
                        println!("{}", format!("⚠ {warning}, continuing").yellow().bold());
                        tracing::warn!(error = %e, "flash failure downgraded to warning");
                        warnings.push(warning);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if artifact.is_none() {
            artifact = Artifact::inspect(&self.layout.artifact).ok();
            if artifact.is_none() {
                tracing::warn!(path = %self.layout.artifact.display(), "build left no artifact");
            }
        }

        let mut published = false;
        if request.publish != PublishMode::None {
            if let Some(image) = &artifact {
                publisher.publish(image, &request.publish).await?;
                stages.push(Stage::Publish);
                published = true;
            }
        }

        Ok(RunReport {
            toolchain,
            stages,
            resolve,
            warnings,
            artifact,
            published,
        })
    }

    fn needs_toolchain(&self, request: &WorkflowRequest) -> bool {
        let clean_runs_tool =
            request.clean && matches!(self.layout.clean, CleanAction::Command(_));
        let resolves = self.layout.resolve.is_some() && request.resolve != ResolvePolicy::Skip;
        let flashes = request.flash && self.layout.flash.is_some();
        request.build || flashes || clean_runs_tool || resolves
    }

    async fn clean(&self, toolchain: Option<&Toolchain>) -> Result<(), PipelineError> {
        match (&self.layout.clean, toolchain) {
            (CleanAction::RemoveDir(dir), _) => {
                println!("{}", format!("  Cleaning {}...", dir.display()).dimmed());
                match fs::remove_dir_all(dir) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(source) => Err(PipelineError::Clean {
                        path: dir.clone(),
                        source,
                    }),
                }
            }
            (CleanAction::Command(command), Some(tc)) => {
                section("Cleaning build...");
                self.stage(Stage::Clean, tc, command).await.map(|_| ())
            }
            (CleanAction::Command(_), None) => Ok(()),
        }
    }

    fn require_artifact(&self) -> Result<Artifact, PipelineError> {
        Artifact::inspect(&self.layout.artifact)
            .map_err(|_| PipelineError::MissingArtifact(self.layout.artifact.clone()))
    }

    /// A failing post-flash step is pushed to `warnings` instead of failing
    /// the flash.
    async fn flash(
        &self,
        toolchain: &Toolchain,
        template: &CommandTemplate,
        request: &WorkflowRequest,
        warnings: &mut Vec<String>,
    ) -> Result<(), PipelineError> {
        let target = request.target.as_deref();
        section(&format!("Flashing to {}...", request.target_label()));
        let start = Instant::now();
        let output = self
            .runner
            .run(toolchain, &template.render(target), &self.layout.root)
            .await?;
        if !output.success {
            return Err(PipelineError::FlashFailed {
                target: request.target_label().to_string(),
                output,
            });
        }
        println!(
            "{}",
            format!("✓ Flash successful in {:.2}s", start.elapsed().as_secs_f64()).green()
        );

        if let Some(post) = &self.layout.post_flash {
            let command = post.render(target);
            let warning = match self.runner.run(toolchain, &command, &self.layout.root).await {
                Ok(out) if out.success => None,
                Ok(out) => {
                    tracing::warn!(code = ?out.code, "post-flash command failed");
                    Some(match out.code {
                        Some(code) => format!("`{command}` failed with exit code {code}"),
                        None => format!("`{command}` failed"),
                    })
                }
                Err(e @ RunError::Interrupted { .. }) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "post-flash command could not run");
                    Some(e.to_string())
                }
            };
            if let Some(warning) = warning {
                println!("{}", format!("⚠ {warning}").yellow().bold());
                warnings.push(warning);
            }
        }
        Ok(())
    }

    async fn stage(
        &self,
        stage: Stage,
        toolchain: &Toolchain,
        command: &str,
    ) -> Result<CommandOutput, PipelineError> {
        tracing::info!(%stage, command, "stage started");
        let output = self
            .runner
            .run(toolchain, command, &self.layout.root)
            .await?;
        if output.success {
            Ok(output)
        } else {
            tracing::info!(%stage, code = ?output.code, "stage failed");
            Err(PipelineError::StageFailed { stage, output })
        }
    }
}

fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::toolchain::Activation;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Scripted runner: commands containing a `failing` needle exit non-zero,
    /// ones containing an `interrupting` needle are cut off by Ctrl-C. Every
    /// command is recorded. `build` commands create the artifact unless
    /// `writes_artifact` is off.
    struct ScriptedRunner<'a> {
        failing: Vec<&'static str>,
        interrupting: Vec<&'static str>,
        writes_artifact: bool,
        artifact: PathBuf,
        calls: &'a RefCell<Vec<String>>,
        seen_build_dir: &'a RefCell<Option<bool>>,
        build_dir: PathBuf,
    }

    impl Runner for ScriptedRunner<'_> {
        async fn run(
            &self,
            _toolchain: &Toolchain,
            command: &str,
            _cwd: &Path,
        ) -> Result<CommandOutput, RunError> {
            self.calls.borrow_mut().push(command.to_string());
            if self.interrupting.iter().any(|needle| command.contains(needle)) {
                return Err(RunError::Interrupted {
                    command: command.to_string(),
                });
            }
            if self.failing.iter().any(|needle| command.contains(needle)) {
                return Ok(CommandOutput {
                    success: false,
                    code: Some(2),
                    output: format!("{command}: no serial data received\n"),
                });
            }
            if command.contains("build") {
                *self.seen_build_dir.borrow_mut() = Some(self.build_dir.exists());
            }
            if command.contains("build") && self.writes_artifact {
                fs::create_dir_all(self.artifact.parent().unwrap()).unwrap();
                fs::write(&self.artifact, vec![0u8; 2048]).unwrap();
            }
            Ok(CommandOutput {
                success: true,
                code: Some(0),
                output: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: RefCell<Vec<(u64, PublishMode)>>,
    }

    impl Publish for RecordingPublisher {
        async fn publish(&self, artifact: &Artifact, mode: &PublishMode) -> Result<(), PublishError> {
            self.published.borrow_mut().push((artifact.size, *mode));
            Ok(())
        }
    }

    struct Fixture {
        tmp: TempDir,
        layout: ProjectLayout,
        spec: ToolchainSpec,
        calls: RefCell<Vec<String>>,
        seen_build_dir: RefCell<Option<bool>>,
    }

    impl Fixture {
        fn new(with_resolve: bool) -> Self {
            let tmp = TempDir::new().unwrap();
            let idf = tmp.path().join("esp-idf");
            fs::create_dir_all(&idf).unwrap();
            fs::write(idf.join("export.sh"), "").unwrap();

            let root = tmp.path().join("zobo_esp32");
            fs::create_dir_all(&root).unwrap();
            let build = root.join("build");
            let resolve = with_resolve.then(|| ResolveStep {
                manifest: root.join("pubspec.yaml"),
                lock: root.join("pubspec.lock"),
                record: root.join(".deps_hash"),
                command: "pub get".into(),
            });
            let layout = ProjectLayout {
                name: "Zobo ESP32".into(),
                root: root.clone(),
                clean: CleanAction::RemoveDir(build.clone()),
                resolve,
                build: "idf.py build".into(),
                flash: Some(CommandTemplate::new("idf.py -p {target} flash", "idf.py flash")),
                post_flash: None,
                artifact: build.join("zobo_esp32.bin"),
            };
            let spec = ToolchainSpec {
                name: "ESP-IDF",
                env_var: "IDF_PATH",
                env_override: Some(idf),
                ide_settings: None,
                ide_keys: vec![],
                roots: vec![],
                versioned: None,
                marker: PathBuf::from("export.sh"),
                activation: Activation::SourceScript(PathBuf::from("export.sh")),
            };
            Self {
                tmp,
                layout,
                spec,
                calls: RefCell::new(Vec::new()),
                seen_build_dir: RefCell::new(None),
            }
        }

        fn runner(&self, failing: Vec<&'static str>) -> ScriptedRunner<'_> {
            ScriptedRunner {
                failing,
                interrupting: vec![],
                writes_artifact: true,
                artifact: self.layout.artifact.clone(),
                calls: &self.calls,
                seen_build_dir: &self.seen_build_dir,
                build_dir: self.layout.root.join("build"),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    fn request(flash: bool, failure: FlashFailure, publish: PublishMode) -> WorkflowRequest {
        WorkflowRequest {
            flash,
            flash_failure: failure,
            publish,
            target: Some("/dev/ttyUSB0".into()),
            ..WorkflowRequest::default()
        }
    }

    #[tokio::test]
    async fn failing_build_never_flashes() {
        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec!["build"]));
        let publisher = RecordingPublisher::default();
        let err = orch
            .run(&request(true, FlashFailure::Warn, PublishMode::Http { port: 8080 }), &publisher)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Build));
        assert_eq!(fx.calls(), vec!["idf.py build".to_string()]);
        assert!(publisher.published.borrow().is_empty());
    }

    #[tokio::test]
    async fn flash_failure_halts_by_default() {
        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec!["flash"]));
        let publisher = RecordingPublisher::default();
        let err = orch
            .run(&request(true, FlashFailure::Abort, PublishMode::Http { port: 8080 }), &publisher)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "flash failed on /dev/ttyUSB0");
        assert!(err.output().unwrap().output.contains("no serial data"));
        assert!(publisher.published.borrow().is_empty());
    }

    #[tokio::test]
    async fn flash_failure_in_warn_mode_still_publishes() {
        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec!["flash"]));
        let publisher = RecordingPublisher::default();
        let report = orch
            .run(&request(true, FlashFailure::Warn, PublishMode::Http { port: 8080 }), &publisher)
            .await
            .unwrap();

        assert_eq!(report.warnings, vec!["flash failed on /dev/ttyUSB0".to_string()]);
        assert_eq!(report.stages, vec![Stage::Build, Stage::Publish]);
        assert!(report.published);
        assert_eq!(
            *publisher.published.borrow(),
            vec![(2048, PublishMode::Http { port: 8080 })]
        );
    }

    #[tokio::test]
    async fn flash_uses_target_when_given() {
        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let report = orch
            .run(&request(true, FlashFailure::Abort, PublishMode::None), &RecordingPublisher::default())
            .await
            .unwrap();
        assert_eq!(report.stages, vec![Stage::Build, Stage::Flash]);
        assert_eq!(fx.calls(), vec!["idf.py build", "idf.py -p /dev/ttyUSB0 flash"]);

        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let req = WorkflowRequest {
            flash: true,
            ..WorkflowRequest::default()
        };
        orch.run(&req, &RecordingPublisher::default()).await.unwrap();
        assert_eq!(fx.calls(), vec!["idf.py build", "idf.py flash"]);
    }

    #[tokio::test]
    async fn clean_removes_prior_output_before_build() {
        let fx = Fixture::new(false);
        let build = fx.layout.root.join("build");
        fs::create_dir_all(build.join("esp-idf")).unwrap();
        fs::write(build.join("stale.o"), b"old").unwrap();

        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let req = WorkflowRequest {
            clean: true,
            ..WorkflowRequest::default()
        };
        let report = orch.run(&req, &RecordingPublisher::default()).await.unwrap();

        assert_eq!(*fx.seen_build_dir.borrow(), Some(false));
        assert_eq!(report.stages, vec![Stage::Clean, Stage::Build]);
        assert!(!build.join("stale.o").exists());
    }

    #[tokio::test]
    async fn clean_of_missing_output_is_a_no_op() {
        let fx = Fixture::new(false);
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let req = WorkflowRequest {
            clean: true,
            ..WorkflowRequest::default()
        };
        assert!(orch.run(&req, &RecordingPublisher::default()).await.is_ok());
    }

    #[tokio::test]
    async fn unchanged_manifest_skips_resolve() {
        let fx = Fixture::new(true);
        let step = fx.layout.resolve.clone().unwrap();
        fs::write(&step.manifest, "name: zobo_flutter\n").unwrap();
        fs::write(&step.lock, "packages: {}\n").unwrap();
        deps::record_resolution(&step.manifest, &step.record).unwrap();

        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let report = orch
            .run(&WorkflowRequest::default(), &RecordingPublisher::default())
            .await
            .unwrap();

        assert_eq!(report.resolve, Some(Decision::UpToDate));
        assert_eq!(report.stages, vec![Stage::Build]);
        assert_eq!(fx.calls(), vec!["idf.py build"]);
    }

    #[tokio::test]
    async fn successful_resolve_records_fingerprint() {
        let fx = Fixture::new(true);
        let step = fx.layout.resolve.clone().unwrap();
        fs::write(&step.manifest, "name: zobo_flutter\n").unwrap();
        fs::write(&step.lock, "packages: {}\n").unwrap();

        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let report = orch
            .run(&WorkflowRequest::default(), &RecordingPublisher::default())
            .await
            .unwrap();

        assert_eq!(report.resolve, Some(Decision::FirstRun));
        assert_eq!(report.stages, vec![Stage::Resolve, Stage::Build]);
        assert_eq!(
            deps::needs_resolution(&step.manifest, &step.lock, &step.record),
            Decision::UpToDate
        );
    }

    #[tokio::test]
    async fn failed_resolve_does_not_record() {
        let fx = Fixture::new(true);
        let step = fx.layout.resolve.clone().unwrap();
        fs::write(&step.manifest, "name: zobo_flutter\n").unwrap();
        fs::write(&step.lock, "packages: {}\n").unwrap();

        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec!["pub get"]));
        let err = orch
            .run(&WorkflowRequest::default(), &RecordingPublisher::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Resolve));
        assert!(!step.record.exists());
        assert_eq!(fx.calls(), vec!["pub get"]);
    }

    #[tokio::test]
    async fn missing_toolchain_aborts_before_any_stage() {
        let mut fx = Fixture::new(false);
        fx.spec.env_override = Some(fx.tmp.path().join("nowhere"));
        let build = fx.layout.root.join("build");
        fs::create_dir_all(&build).unwrap();

        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let req = WorkflowRequest {
            clean: true,
            ..WorkflowRequest::default()
        };
        let err = orch.run(&req, &RecordingPublisher::default()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Toolchain(_)));
        assert!(build.exists());
        assert!(fx.calls().is_empty());
    }

    #[tokio::test]
    async fn skipped_build_requires_existing_artifact() {
        let mut fx = Fixture::new(false);
        fx.spec.env_override = None;
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec![]));
        let req = WorkflowRequest {
            build: false,
            publish: PublishMode::Http { port: 8080 },
            ..WorkflowRequest::default()
        };
        let err = orch.run(&req, &RecordingPublisher::default()).await.unwrap_err();
        match err {
            PipelineError::MissingArtifact(path) => assert_eq!(path, fx.layout.artifact),
            other => panic!("unexpected error: {other}"),
        }

        fs::create_dir_all(fx.layout.artifact.parent().unwrap()).unwrap();
        fs::write(&fx.layout.artifact, b"firmware").unwrap();
        let report = orch.run(&req, &RecordingPublisher::default()).await.unwrap();
        assert!(report.toolchain.is_none());
        assert_eq!(report.artifact.unwrap().size, 8);
        assert!(fx.calls().is_empty());
    }

    #[tokio::test]
    async fn interrupted_flash_stops_run_even_in_warn_mode() {
        let fx = Fixture::new(false);
        let mut runner = fx.runner(vec![]);
        runner.interrupting = vec!["flash"];
        let orch = Orchestrator::new(&fx.layout, &fx.spec, runner);
        let publisher = RecordingPublisher::default();
        let req = request(
            true,
            FlashFailure::Warn,
            PublishMode::Release {
                draft: false,
                prerelease: false,
            },
        );
        let err = orch.run(&req, &publisher).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Run(RunError::Interrupted { ref command }) if command.contains("flash")
        ));
        assert!(publisher.published.borrow().is_empty());
    }

    #[tokio::test]
    async fn flash_runs_when_build_leaves_no_image() {
        let fx = Fixture::new(false);
        let mut runner = fx.runner(vec![]);
        runner.writes_artifact = false;
        let orch = Orchestrator::new(&fx.layout, &fx.spec, runner);
        let report = orch
            .run(&request(true, FlashFailure::Abort, PublishMode::None), &RecordingPublisher::default())
            .await
            .unwrap();

        assert_eq!(report.stages, vec![Stage::Build, Stage::Flash]);
        assert!(report.artifact.is_none());
        assert_eq!(fx.calls(), vec!["idf.py build", "idf.py -p /dev/ttyUSB0 flash"]);
    }

    #[tokio::test]
    async fn publishing_checks_image_before_flash() {
        let fx = Fixture::new(false);
        let mut runner = fx.runner(vec![]);
        runner.writes_artifact = false;
        let orch = Orchestrator::new(&fx.layout, &fx.spec, runner);
        let err = orch
            .run(
                &request(true, FlashFailure::Warn, PublishMode::Http { port: 8080 }),
                &RecordingPublisher::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MissingArtifact(_)));
        assert_eq!(fx.calls(), vec!["idf.py build"]);
    }

    #[tokio::test]
    async fn failed_launch_after_flash_is_a_warning() {
        let mut fx = Fixture::new(false);
        fx.layout.post_flash = Some(CommandTemplate::new("launch {target}", "launch"));
        let orch = Orchestrator::new(&fx.layout, &fx.spec, fx.runner(vec!["launch"]));
        let report = orch
            .run(&request(true, FlashFailure::Abort, PublishMode::None), &RecordingPublisher::default())
            .await
            .unwrap();

        assert_eq!(report.stages, vec![Stage::Build, Stage::Flash]);
        assert_eq!(
            report.warnings,
            vec!["`launch /dev/ttyUSB0` failed with exit code 2".to_string()]
        );
    }
}
