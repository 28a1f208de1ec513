//! Toolchain discovery.
//!
//! A toolchain is a directory that carries an activation marker directly
//! beneath it (`export.sh` for ESP-IDF, `bin/flutter` for the Flutter SDK).
//! Candidates are tried in a fixed order and the first one carrying the
//! marker wins:
//!
//! 1. the environment-variable override (`IDF_PATH`, `FLUTTER_ROOT`)
//! 2. paths stored in the VS Code user `settings.json`
//! 3. conventional installation roots
//! 4. versioned subdirectories of a conventional parent (`~/esp/v5.2.6/esp-idf`)
//!
//! The environment and home directory are read once, when the
//! [`ToolchainSpec`] is built, so [`ToolchainSpec::locate`] itself only
//! touches the filesystem.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// How a located toolchain is brought into a shell session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Source a script relative to the toolchain root (`export.sh`).
    SourceScript(PathBuf),
    /// Prepend a directory relative to the toolchain root to `PATH`.
    PathPrefix(PathBuf),
}

/// A `{parent}/{prefix}*/{suffix}` family of versioned installs.
#[derive(Debug, Clone)]
pub struct VersionedParent {
    /// Directory holding one subdirectory per version.
    pub dir: PathBuf,
    /// Prefix every version directory starts with.
    pub prefix: &'static str,
    /// Path below a version directory where the root sits.
    pub suffix: Option<PathBuf>,
}

/// Where to look for one kind of toolchain and how to recognise it.
#[derive(Debug, Clone)]
pub struct ToolchainSpec {
    /// Human-readable name, used in messages.
    pub name: &'static str,
    /// Name of the override variable, kept for messages.
    pub env_var: &'static str,
    /// Value of the override variable when this description was built.
    pub env_override: Option<PathBuf>,
    /// VS Code user `settings.json`, if one could be located.
    pub ide_settings: Option<PathBuf>,
    /// Keys in `settings.json` holding a toolchain path.
    pub ide_keys: Vec<&'static str>,
    /// Conventional installation roots, in priority order.
    pub roots: Vec<PathBuf>,
    /// Versioned installs, tried newest first after `roots`.
    pub versioned: Option<VersionedParent>,
    /// File that must exist directly beneath a valid root.
    pub marker: PathBuf,
    /// How the located root is activated.
    pub activation: Activation,
}

/// A validated toolchain installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    name: &'static str,
    root: PathBuf,
    activation: Activation,
}

impl Toolchain {
    /// Wrap an already validated root.
    pub fn new(name: &'static str, root: impl Into<PathBuf>, activation: Activation) -> Self {
        Self {
            name,
            root: root.into(),
            activation,
        }
    }

    /// Human-readable toolchain name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Installation root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// How to activate this installation.
    pub fn activation(&self) -> &Activation {
        &self.activation
    }
}

/// Toolchain discovery failure.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// No candidate root carried the marker file.
    #[error("{toolchain} not found")]
    NotFound {
        /// Toolchain name.
        toolchain: &'static str,
        /// Variable the user can set to point at an install.
        env_var: &'static str,
        /// Every candidate tried, in order.
        searched: Vec<PathBuf>,
    },
}

#[cfg(windows)]
const IDF_EXPORT_SCRIPT: &str = "export.bat";
#[cfg(not(windows))]
const IDF_EXPORT_SCRIPT: &str = "export.sh";

#[cfg(windows)]
const FLUTTER_LAUNCHER: &str = "bin/flutter.bat";
#[cfg(not(windows))]
const FLUTTER_LAUNCHER: &str = "bin/flutter";

impl ToolchainSpec {
    /// ESP-IDF, as installed by the Espressif installer, VS Code extension
    /// or a manual `git clone` under `~/esp`.
    pub fn esp_idf() -> Self {
        let home = dirs_next::home_dir();
        let mut roots = Vec::new();
        if let Some(home) = &home {
            roots.push(home.join("esp").join("esp-idf"));
            roots.push(home.join(".espressif").join("esp-idf"));
        }
        roots.push(PathBuf::from("/opt/esp/idf"));
        roots.push(PathBuf::from("/opt/esp-idf"));
        #[cfg(windows)]
        {
            roots.push(PathBuf::from("C:/Espressif/frameworks/esp-idf"));
            roots.push(PathBuf::from("C:/esp/esp-idf"));
        }

        Self {
            name: "ESP-IDF",
            env_var: "IDF_PATH",
            env_override: env_path("IDF_PATH"),
            ide_settings: vscode_settings_path(),
            ide_keys: vec!["idf.espIdfPath", "idf.espIdfPathWin"],
            roots,
            versioned: home.map(|home| VersionedParent {
                dir: home.join("esp"),
                prefix: "v",
                suffix: Some(PathBuf::from("esp-idf")),
            }),
            marker: PathBuf::from(IDF_EXPORT_SCRIPT),
            activation: Activation::SourceScript(PathBuf::from(IDF_EXPORT_SCRIPT)),
        }
    }

    /// Flutter SDK, including `fvm`-managed versions.
    pub fn flutter() -> Self {
        let home = dirs_next::home_dir();
        let mut roots = Vec::new();
        if let Some(home) = &home {
            roots.push(home.join("flutter"));
            roots.push(home.join("development").join("flutter"));
            roots.push(home.join("snap").join("flutter").join("common").join("flutter"));
        }
        roots.push(PathBuf::from("/opt/flutter"));
        roots.push(PathBuf::from("/usr/local/flutter"));
        #[cfg(windows)]
        roots.push(PathBuf::from("C:/src/flutter"));

        Self {
            name: "Flutter SDK",
            env_var: "FLUTTER_ROOT",
            env_override: env_path("FLUTTER_ROOT"),
            ide_settings: vscode_settings_path(),
            ide_keys: vec!["dart.flutterSdkPath"],
            roots,
            versioned: home.map(|home| VersionedParent {
                dir: home.join("fvm").join("versions"),
                prefix: "",
                suffix: None,
            }),
            marker: PathBuf::from(FLUTTER_LAUNCHER),
            activation: Activation::PathPrefix(PathBuf::from("bin")),
        }
    }

    /// Every candidate root, in the order they are tried.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.env_override {
            candidates.push(path.clone());
        }
        if let Some(settings) = &self.ide_settings {
            candidates.extend(read_ide_paths(settings, &self.ide_keys));
        }
        candidates.extend(self.roots.iter().cloned());
        if let Some(versioned) = &self.versioned {
            candidates.extend(versioned_dirs(versioned));
        }
        candidates
    }

    /// Whether `root` is non-empty and carries the marker file.
    pub fn is_valid_root(&self, root: &Path) -> bool {
        !root.as_os_str().is_empty() && root.join(&self.marker).is_file()
    }

    /// Return the first candidate that carries the activation marker.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::NotFound`] listing every candidate tried when
    /// none validates.
    pub fn locate(&self) -> Result<Toolchain, LocateError> {
        let candidates = self.candidates();
        for candidate in &candidates {
            if self.is_valid_root(candidate) {
                tracing::debug!(toolchain = self.name, root = %candidate.display(), "toolchain found");
                return Ok(Toolchain::new(
                    self.name,
                    candidate.clone(),
                    self.activation.clone(),
                ));
            }
            tracing::trace!(toolchain = self.name, root = %candidate.display(), "candidate rejected");
        }
        Err(LocateError::NotFound {
            toolchain: self.name,
            env_var: self.env_var,
            searched: candidates,
        })
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn vscode_settings_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("Code").join("User").join("settings.json"))
}

/// Paths stored under `keys` in a VS Code `settings.json`.
///
/// A missing or unparseable file yields no paths. VS Code allows comments in
/// this file; such files fail strict JSON parsing and are ignored as well.
pub fn read_ide_paths(settings: &Path, keys: &[&str]) -> Vec<PathBuf> {
    let Ok(text) = fs::read_to_string(settings) else {
        return Vec::new();
    };
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(path = %settings.display(), error = %e, "ignoring unparseable IDE settings");
            return Vec::new();
        }
    };
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Versioned installs under `parent.dir`, newest version first.
fn versioned_dirs(parent: &VersionedParent) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(&parent.dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .filter(|(name, _)| name.starts_with(parent.prefix))
        .collect();
    dirs.sort_by(|a, b| compare_versions(&b.0, &a.0, parent.prefix));
    dirs.into_iter()
        .map(|(_, path)| match &parent.suffix {
            Some(suffix) => path.join(suffix),
            None => path,
        })
        .collect()
}

/// Orders `v5.10.0` after `v5.9.1` and `3.24.0` after `3.9.2`. Names whose
/// numeric parts tie fall back to plain string order.
fn compare_versions(a: &str, b: &str, prefix: &str) -> Ordering {
    version_key(a, prefix)
        .cmp(&version_key(b, prefix))
        .then_with(|| a.cmp(b))
}

/// Leading numeric components of `name` after `prefix`, up to the first
/// part that is not a number (`5.2-rc1` gives `[5]`, then `rc1` stops it).
fn version_key(name: &str, prefix: &str) -> Vec<u64> {
    name.strip_prefix(prefix)
        .unwrap_or(name)
        .split(['.', '-', '+'])
        .map_while(|part| part.parse::<u64>().ok())
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_install(root: &Path) {
        fs::create_dir_all(root).unwrap();
        fs::write(root.join("export.sh"), "# activate").unwrap();
    }

    fn spec(env_override: Option<PathBuf>, roots: Vec<PathBuf>) -> ToolchainSpec {
        ToolchainSpec {
            name: "ESP-IDF",
            env_var: "IDF_PATH",
            env_override,
            ide_settings: None,
            ide_keys: vec!["idf.espIdfPath"],
            roots,
            versioned: None,
            marker: PathBuf::from("export.sh"),
            activation: Activation::SourceScript(PathBuf::from("export.sh")),
        }
    }

    #[test]
    fn override_wins_over_other_valid_candidates() {
        let tmp = TempDir::new().unwrap();
        let over = tmp.path().join("override");
        let conventional = tmp.path().join("conventional");
        make_install(&over);
        make_install(&conventional);

        let found = spec(Some(over.clone()), vec![conventional]).locate().unwrap();
        assert_eq!(found.root(), over.as_path());
    }

    #[test]
    fn invalid_override_falls_through_to_roots() {
        let tmp = TempDir::new().unwrap();
        let over = tmp.path().join("override");
        fs::create_dir_all(&over).unwrap();
        let conventional = tmp.path().join("conventional");
        make_install(&conventional);

        let found = spec(Some(over), vec![conventional.clone()]).locate().unwrap();
        assert_eq!(found.root(), conventional.as_path());
    }

    #[test]
    fn not_found_when_no_candidate_has_marker() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        let err = spec(None, vec![empty.clone(), tmp.path().join("missing")])
            .locate()
            .unwrap_err();
        let LocateError::NotFound { searched, .. } = err;
        assert_eq!(searched.len(), 2);
        assert_eq!(searched[0], empty);
    }

    #[test]
    fn ide_settings_path_is_used() {
        let tmp = TempDir::new().unwrap();
        let install = tmp.path().join("from-ide");
        make_install(&install);
        let settings = tmp.path().join("settings.json");
        let json = serde_json::json!({ "idf.espIdfPath": install.to_str().unwrap() });
        fs::write(&settings, json.to_string()).unwrap();

        let mut s = spec(None, vec![]);
        s.ide_settings = Some(settings);
        assert_eq!(s.locate().unwrap().root(), install.as_path());
    }

    #[test]
    fn malformed_ide_settings_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let settings = tmp.path().join("settings.json");
        fs::write(&settings, "{ // comment\n \"idf.espIdfPath\": ").unwrap();
        assert!(read_ide_paths(&settings, &["idf.espIdfPath"]).is_empty());

        let conventional = tmp.path().join("conventional");
        make_install(&conventional);
        let mut s = spec(None, vec![conventional.clone()]);
        s.ide_settings = Some(settings);
        assert_eq!(s.locate().unwrap().root(), conventional.as_path());
    }

    #[test]
    fn versioned_dirs_are_tried_newest_first() {
        let tmp = TempDir::new().unwrap();
        let esp = tmp.path().join("esp");
        make_install(&esp.join("v5.1.2").join("esp-idf"));
        make_install(&esp.join("v5.2.6").join("esp-idf"));
        fs::create_dir_all(esp.join("tools")).unwrap();

        let mut s = spec(None, vec![]);
        s.versioned = Some(VersionedParent {
            dir: esp.clone(),
            prefix: "v",
            suffix: Some(PathBuf::from("esp-idf")),
        });
        let found = s.locate().unwrap();
        assert_eq!(found.root(), esp.join("v5.2.6").join("esp-idf").as_path());

        make_install(&esp.join("v5.10.0").join("esp-idf"));
        let found = s.locate().unwrap();
        assert_eq!(found.root(), esp.join("v5.10.0").join("esp-idf").as_path());
    }

    #[test]
    fn multi_digit_versions_sort_numerically() {
        let tmp = TempDir::new().unwrap();
        let versions = tmp.path().join("fvm").join("versions");
        for version in ["3.9.2", "3.24.0", "3.19.6"] {
            make_install(&versions.join(version));
        }

        let mut s = spec(None, vec![]);
        s.versioned = Some(VersionedParent {
            dir: versions.clone(),
            prefix: "",
            suffix: None,
        });
        let order: Vec<PathBuf> = s
            .candidates()
            .into_iter()
            .filter(|path| path.starts_with(&versions))
            .collect();
        assert_eq!(
            order,
            vec![
                versions.join("3.24.0"),
                versions.join("3.19.6"),
                versions.join("3.9.2"),
            ]
        );
        assert_eq!(s.locate().unwrap().root(), versions.join("3.24.0").as_path());
    }

    #[test]
    fn version_keys_stop_at_first_non_numeric_part() {
        assert_eq!(version_key("v5.2.6", "v"), vec![5, 2, 6]);
        assert_eq!(version_key("3.24.0-0.1.pre", ""), vec![3, 24, 0, 0, 1]);
        assert_eq!(version_key("stable", ""), Vec::<u64>::new());
        assert_eq!(compare_versions("3.9.2", "3.24.0", ""), Ordering::Less);
    }

    #[test]
    fn empty_path_is_never_valid() {
        let s = spec(Some(PathBuf::new()), vec![]);
        assert!(!s.is_valid_root(Path::new("")));
        assert!(s.locate().is_err());
    }
}
