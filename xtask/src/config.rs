//! Project configuration and constants
//!
//! Names, paths and defaults for the two Zobo projects. Ports, repository
//! and root can be overridden from the command line or environment.

/// Firmware product name
pub const FIRMWARE_NAME: &str = "Zobo ESP32";

/// Mobile app product name
pub const APP_NAME: &str = "Zobo Flutter";

/// ESP-IDF project directory, relative to the repository root
pub const FIRMWARE_DIR: &str = "zobo_esp32";

/// Flutter project directory, relative to the repository root
pub const APP_DIR: &str = "zobo_flutter";

/// Firmware image produced by `idf.py build` under `build/`
pub const FIRMWARE_BIN: &str = "zobo_esp32.bin";

/// Sources searched for `#define FIRMWARE_VERSION`, in order
pub const VERSION_SOURCES: &[&str] = &["main/ota_manager.h", "main/main.c"];

/// Default OTA server port
pub const DEFAULT_OTA_PORT: u16 = 8080;

/// GitHub repository receiving firmware releases
pub const RELEASE_REPO: &str = "DavidPetrov2023/Zobo";

/// Release APK produced by `flutter build apk --release`
pub const APK_PATH: &str = "build/app/outputs/flutter-apk/app-release.apk";

/// Sidecar file holding the last-resolved `pubspec.yaml` digest
pub const DEPS_RECORD: &str = ".deps_hash";

/// Activation launched after installing the app
pub const APP_ACTIVITY: &str = "cz.davidpetrov.zobo_flutter/.MainActivity";
