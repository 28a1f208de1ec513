//! Project layouts handed to the pipeline.

use std::path::{Path, PathBuf};

use pipeline::{CleanAction, CommandTemplate, ProjectLayout, ResolveStep};

use crate::config;

/// ESP-IDF firmware under `{root}/zobo_esp32`.
pub fn firmware(root: &Path) -> ProjectLayout {
    let dir = root.join(config::FIRMWARE_DIR);
    let build = dir.join("build");
    ProjectLayout {
        name: config::FIRMWARE_NAME.to_string(),
        clean: CleanAction::RemoveDir(build.clone()),
        resolve: None,
        build: "idf.py build".to_string(),
        flash: Some(CommandTemplate::new(
            "idf.py -p {target} flash",
            "idf.py flash",
        )),
        post_flash: None,
        artifact: build.join(config::FIRMWARE_BIN),
        root: dir,
    }
}

pub fn firmware_version(root: &Path) -> String {
    let dir = root.join(config::FIRMWARE_DIR);
    let sources: Vec<PathBuf> = config::VERSION_SOURCES
        .iter()
        .map(|source| dir.join(source))
        .collect();
    pipeline::version::extract(&sources)
}

/// Flutter app under `{root}/zobo_flutter`. `debug` builds the release APK
/// with the in-app log enabled.
pub fn app(root: &Path, debug: bool) -> ProjectLayout {
    let dir = root.join(config::APP_DIR);
    let apk = dir.join(config::APK_PATH);

    let mut build = "flutter build apk --release".to_string();
    if debug {
        build.push_str(" --dart-define=DEBUG_MODE=true");
    }

    ProjectLayout {
        name: config::APP_NAME.to_string(),
        clean: CleanAction::Command("flutter clean".to_string()),
        resolve: Some(ResolveStep {
            manifest: dir.join("pubspec.yaml"),
            lock: dir.join("pubspec.lock"),
            record: dir.join(config::DEPS_RECORD),
            command: "flutter pub get".to_string(),
        }),
        build,
        flash: Some(CommandTemplate::new(
            format!("adb -s {{target}} install -r \"{}\"", apk.display()),
            format!("adb install -r \"{}\"", apk.display()),
        )),
        post_flash: Some(CommandTemplate::new(
            format!("adb -s {{target}} shell am start -n {}", config::APP_ACTIVITY),
            format!("adb shell am start -n {}", config::APP_ACTIVITY),
        )),
        artifact: apk,
        root: dir,
    }
}

pub fn app_version(root: &Path) -> String {
    pipeline::version::pubspec_version(&root.join(config::APP_DIR).join("pubspec.yaml"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn firmware_layout_paths() {
        let layout = firmware(Path::new("/repo"));
        assert_eq!(layout.root, Path::new("/repo/zobo_esp32"));
        assert_eq!(
            layout.artifact,
            Path::new("/repo/zobo_esp32/build/zobo_esp32.bin")
        );
        assert_eq!(
            layout.clean,
            CleanAction::RemoveDir(PathBuf::from("/repo/zobo_esp32/build"))
        );
        let flash = layout.flash.unwrap();
        assert_eq!(flash.render(Some("/dev/ttyUSB0")), "idf.py -p /dev/ttyUSB0 flash");
        assert_eq!(flash.render(None), "idf.py flash");
    }

    #[test]
    fn app_layout_debug_build() {
        assert_eq!(app(Path::new("/repo"), false).build, "flutter build apk --release");
        assert_eq!(
            app(Path::new("/repo"), true).build,
            "flutter build apk --release --dart-define=DEBUG_MODE=true"
        );
    }

    #[test]
    fn app_install_targets_device() {
        let layout = app(Path::new("/repo"), false);
        let install = layout.flash.unwrap().render(Some("R58M123ABC"));
        assert_eq!(
            install,
            "adb -s R58M123ABC install -r \"/repo/zobo_flutter/build/app/outputs/flutter-apk/app-release.apk\""
        );
        let launch = layout.post_flash.unwrap().render(Some("R58M123ABC"));
        assert!(launch.ends_with("am start -n cz.davidpetrov.zobo_flutter/.MainActivity"));
    }

    #[test]
    fn firmware_version_prefers_ota_header() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join(config::FIRMWARE_DIR).join("main");
        fs::create_dir_all(&main).unwrap();
        fs::write(main.join("main.c"), "#define FIRMWARE_VERSION \"0.0.1\"\n").unwrap();
        assert_eq!(firmware_version(tmp.path()), "0.0.1");

        fs::write(main.join("ota_manager.h"), "#define FIRMWARE_VERSION \"1.0.3\"\n").unwrap();
        assert_eq!(firmware_version(tmp.path()), "1.0.3");
    }
}
