//! Build → flash → publish pipeline shared by every Zobo entry point.
//!
//! # Modules
//!
//! - [`toolchain`]: locate an installed ESP-IDF / Flutter SDK
//! - [`version`]: read the firmware version from a `#define` in source
//! - [`deps`]: fingerprint gate that skips redundant dependency resolution
//! - [`runner`]: run a command inside an activated toolchain environment
//! - [`orchestrator`]: clean → resolve → build → flash, then publish
//! - [`publish`]: `version.json`, OTA HTTP serving and GitHub releases
//! - [`device`]: Android device probing via `adb`
//! - [`monitor`]: serial console and port listing

#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod deps;
pub mod device;
pub mod monitor;
pub mod orchestrator;
pub mod publish;
pub mod runner;
pub mod toolchain;
pub mod version;

pub use deps::{needs_resolution, record_resolution, Decision, GateError};
pub use monitor::{MonitorError, PortInfo};
pub use orchestrator::{
    Artifact, CleanAction, CommandTemplate, FlashFailure, Orchestrator, PipelineError,
    ProjectLayout, PublishMode, ResolvePolicy, ResolveStep, RunReport, Stage, WorkflowRequest,
};
pub use publish::{ArtifactPublisher, NoPublish, Publish, PublishError, VersionMetadata};
pub use runner::{CommandOutput, RunError, Runner, ShellRunner};
pub use toolchain::{Activation, LocateError, Toolchain, ToolchainSpec};
pub use version::UNKNOWN_VERSION;
