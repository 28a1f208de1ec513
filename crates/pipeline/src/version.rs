//! Version extraction from source files.
//!
//! The firmware declares its version as a C macro:
//!
//! ```c
//! #define FIRMWARE_VERSION "1.0.3"
//! ```
//!
//! Extraction never fails; when nothing matches the caller gets
//! [`UNKNOWN_VERSION`] and is expected to carry on with it.

use std::fs;
use std::path::Path;

use regex::Regex;

/// Returned when no source file yields a version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Macro name holding the firmware version.
pub const FIRMWARE_VERSION_IDENT: &str = "FIRMWARE_VERSION";

/// Extract `FIRMWARE_VERSION` from the first path that declares it.
pub fn extract<P: AsRef<Path>>(paths: &[P]) -> String {
    extract_define(paths, FIRMWARE_VERSION_IDENT)
}

/// Extract the string value of `#define <ident> "<value>"` from the first
/// path that declares it. Unreadable and non-matching files are skipped.
pub fn extract_define<P: AsRef<Path>>(paths: &[P], ident: &str) -> String {
    let pattern = format!(r#"#define\s+{}\s+"([^"]+)""#, regex::escape(ident));
    let Ok(re) = Regex::new(&pattern) else {
        return UNKNOWN_VERSION.to_string();
    };
    paths
        .iter()
        .find_map(|path| first_capture(&re, path.as_ref()))
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// Extract the `version:` field of a Flutter `pubspec.yaml`.
pub fn pubspec_version(path: &Path) -> String {
    let Ok(re) = Regex::new(r"(?m)^version:\s*([^\s#]+)") else {
        return UNKNOWN_VERSION.to_string();
    };
    first_capture(&re, path).unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

fn first_capture(re: &Regex, path: &Path) -> Option<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "skipping version source");
            return None;
        }
    };
    re.captures(&content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn empty_search_list_is_unknown() {
        let paths: [PathBuf; 0] = [];
        assert_eq!(extract(&paths), UNKNOWN_VERSION);
    }

    #[test]
    fn missing_and_non_matching_files_are_unknown() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("ota_manager.h");
        fs::write(&header, "#define OTA_URL \"http://x\"\n").unwrap();
        let missing = tmp.path().join("main.c");
        assert_eq!(extract(&[header, missing]), UNKNOWN_VERSION);
    }

    #[test]
    fn first_matching_file_wins() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("ota_manager.h");
        let main_c = tmp.path().join("main.c");
        fs::write(&header, "#pragma once\n#define FIRMWARE_VERSION \"1.0.3\"\n").unwrap();
        fs::write(&main_c, "#define FIRMWARE_VERSION \"0.9.0\"\n").unwrap();
        assert_eq!(extract(&[&header, &main_c]), "1.0.3");
    }

    #[test]
    fn later_file_used_when_earlier_does_not_match() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("ota_manager.h");
        let main_c = tmp.path().join("main.c");
        fs::write(&header, "// no version here\n").unwrap();
        fs::write(&main_c, "#define  FIRMWARE_VERSION\t\"2.1.0-rc1\"\n").unwrap();
        assert_eq!(extract(&[&header, &main_c]), "2.1.0-rc1");
    }

    #[test]
    fn first_declaration_in_file_wins() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("ota_manager.h");
        fs::write(
            &header,
            "#define FIRMWARE_VERSION \"1.0.0\"\n#define FIRMWARE_VERSION \"2.0.0\"\n",
        )
        .unwrap();
        assert_eq!(extract(&[header]), "1.0.0");
    }

    #[test]
    fn other_identifiers_do_not_match() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("ota_manager.h");
        fs::write(&header, "#define FIRMWARE_VERSION_MAJOR \"1\"\n").unwrap();
        assert_eq!(extract(&[header]), UNKNOWN_VERSION);
    }

    #[test]
    fn pubspec_version_is_read() {
        let tmp = TempDir::new().unwrap();
        let pubspec = tmp.path().join("pubspec.yaml");
        fs::write(&pubspec, "name: zobo_flutter\nversion: 1.2.0+7 # bump\n").unwrap();
        assert_eq!(pubspec_version(&pubspec), "1.2.0+7");
        assert_eq!(pubspec_version(&tmp.path().join("nope.yaml")), UNKNOWN_VERSION);
    }
}
