//! GitHub releases through the `gh` CLI.

use std::path::PathBuf;
use std::process::Output;

use tokio::process::Command;

use super::PublishError;

/// One `gh release create` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// Release tag, `v{version}`.
    pub tag: String,
    /// Release title.
    pub title: String,
    /// Markdown release notes.
    pub notes: String,
    /// Firmware image to upload.
    pub artifact: PathBuf,
    /// `version.json` to upload alongside.
    pub metadata: PathBuf,
    /// Create as draft.
    pub draft: bool,
    /// Mark as pre-release.
    pub prerelease: bool,
}

impl ReleaseRequest {
    /// Arguments for `gh`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "release".to_string(),
            "create".to_string(),
            self.tag.clone(),
            "--title".to_string(),
            self.title.clone(),
            "--notes".to_string(),
            self.notes.clone(),
            self.artifact.display().to_string(),
            self.metadata.display().to_string(),
        ];
        if self.draft {
            args.push("--draft".to_string());
        }
        if self.prerelease {
            args.push("--prerelease".to_string());
        }
        args
    }
}

/// Release notes for firmware `version` shipping `artifact_name`.
pub fn firmware_notes(product: &str, version: &str, artifact_name: &str) -> String {
    format!(
        "## {product} Firmware {version}

### Changes
- See commit history for details

### Files
- `{artifact_name}` - Firmware binary for OTA update
- `version.json` - Version metadata

### OTA Update
The app will automatically detect this update when connected to the robot.
"
    )
}

/// Check that `gh` is installed and authenticated.
///
/// # Errors
///
/// [`PublishError::CliMissing`] or [`PublishError::NotAuthenticated`].
pub async fn check_release_cli() -> Result<(), PublishError> {
    match gh(&["--version"]).await {
        Ok(out) if out.status.success() => {}
        _ => return Err(PublishError::CliMissing),
    }
    match gh(&["auth", "status"]).await {
        Ok(out) if out.status.success() => Ok(()),
        _ => Err(PublishError::NotAuthenticated),
    }
}

/// Create the release, returning what `gh` printed (the release URL).
///
/// # Errors
///
/// [`PublishError::ReleaseExists`] when the tag is already released,
/// [`PublishError::CommandFailed`] for any other failure.
pub async fn create_release(request: &ReleaseRequest) -> Result<String, PublishError> {
    let args = request.args();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    tracing::debug!(tag = %request.tag, draft = request.draft, prerelease = request.prerelease, "creating release");
    let out = gh(&args).await.map_err(|_| PublishError::CliMissing)?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        Err(classify_failure(&request.tag, &stderr))
    }
}

/// Tell a duplicate tag apart from every other `gh` failure.
pub fn classify_failure(tag: &str, stderr: &str) -> PublishError {
    if stderr.contains("already exists") {
        PublishError::ReleaseExists {
            tag: tag.to_string(),
        }
    } else {
        PublishError::CommandFailed {
            stderr: stderr.trim().to_string(),
        }
    }
}

async fn gh(args: &[&str]) -> std::io::Result<Output> {
    Command::new("gh").args(args).output().await
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            tag: "v1.0.3".into(),
            title: "Firmware 1.0.3".into(),
            notes: firmware_notes("Zobo ESP32", "1.0.3", "zobo_esp32.bin"),
            artifact: PathBuf::from("build/zobo_esp32.bin"),
            metadata: PathBuf::from("build/version.json"),
            draft: false,
            prerelease: false,
        }
    }

    #[test]
    fn args_attach_both_files() {
        let args = request().args();
        assert_eq!(&args[..3], ["release", "create", "v1.0.3"]);
        assert!(args.contains(&"build/zobo_esp32.bin".to_string()));
        assert!(args.contains(&"build/version.json".to_string()));
        assert!(!args.contains(&"--draft".to_string()));
    }

    #[test]
    fn draft_and_prerelease_flags() {
        let mut r = request();
        r.draft = true;
        r.prerelease = true;
        let args = r.args();
        assert_eq!(&args[args.len() - 2..], ["--draft", "--prerelease"]);
    }

    #[test]
    fn duplicate_tag_is_distinguished() {
        let err = classify_failure("v1.0.3", "a release with the same tag name already exists: v1.0.3");
        assert!(matches!(err, PublishError::ReleaseExists { ref tag } if tag == "v1.0.3"));

        let err = classify_failure("v1.0.3", "HTTP 401: Bad credentials\n");
        match err {
            PublishError::CommandFailed { stderr } => assert_eq!(stderr, "HTTP 401: Bad credentials"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn notes_name_the_version_and_files() {
        let notes = firmware_notes("Zobo ESP32", "1.0.3", "zobo_esp32.bin");
        assert!(notes.starts_with("## Zobo ESP32 Firmware 1.0.3"));
        assert!(notes.contains("`zobo_esp32.bin`"));
        assert!(notes.contains("`version.json`"));
    }
}
