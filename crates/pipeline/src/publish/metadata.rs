//! `version.json`: the record the device and the app poll for updates.

use std::fs;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::orchestrator::Artifact;

/// File name written next to the artifact.
pub const METADATA_FILE: &str = "version.json";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Contents of `version.json`, read by the robot when checking for updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Firmware version string.
    pub version: String,
    /// Artifact length in bytes at generation time.
    pub size: u64,
    /// Local build time, `YYYY-MM-DD HH:MM:SS`.
    pub date: String,
    /// Where the robot downloads the image from.
    pub url: String,
}

impl VersionMetadata {
    /// Metadata for serving `artifact` from `http://{host}:{port}/`.
    /// The date is the artifact's modification time.
    pub fn for_http(artifact: &Artifact, version: &str, host: &str, port: u16) -> Self {
        Self {
            version: version.to_string(),
            size: artifact.size,
            date: format_date(DateTime::<Local>::from(artifact.modified)),
            url: http_url(host, port, &artifact.file_name()),
        }
    }

    /// Metadata for a GitHub release of `repo` tagged `v{version}`.
    /// The date is the time of publishing.
    pub fn for_release(artifact: &Artifact, version: &str, repo: &str) -> Self {
        Self {
            version: version.to_string(),
            size: artifact.size,
            date: format_date(Local::now()),
            url: release_url(repo, &release_tag(version), &artifact.file_name()),
        }
    }

    /// Write pretty-printed JSON to `dir/version.json`, returning its path.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from writing the file.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Release tag for `version`.
pub fn release_tag(version: &str) -> String {
    format!("v{version}")
}

/// Download URL of `file` on the OTA server.
pub fn http_url(host: &str, port: u16, file: &str) -> String {
    format!("http://{host}:{port}/{file}")
}

/// Download URL of a release asset.
pub fn release_url(repo: &str, tag: &str, file: &str) -> String {
    format!("https://github.com/{repo}/releases/download/{tag}/{file}")
}

fn format_date(date: DateTime<Local>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// LAN address of the interface that routes to the internet, or
/// `localhost` when there is none. No packet is sent.
pub fn local_ip() -> String {
    let outbound = || -> io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    outbound().unwrap_or_else(|_| "localhost".to_string())
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

    fn artifact(dir: &Path, len: usize) -> Artifact {
        let path = dir.join("zobo_esp32.bin");
        fs::write(&path, vec![0xA5u8; len]).unwrap();
        Artifact::inspect(&path).unwrap()
    }

    #[test]
    fn size_matches_artifact_length() {
        let tmp = TempDir::new().unwrap();
        for len in [0usize, 1, 1000, 123_457] {
            let a = artifact(tmp.path(), len);
            let meta = VersionMetadata::for_http(&a, "1.0.3", "192.168.1.20", 8080);
            assert_eq!(meta.size, fs::metadata(&a.path).unwrap().len());
            assert_eq!(meta.size, len as u64);
        }
    }

    #[test]
    fn http_metadata_points_at_local_server() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(tmp.path(), 16);
        let meta = VersionMetadata::for_http(&a, "1.0.3", "192.168.1.20", 8080);
        assert_eq!(meta.url, "http://192.168.1.20:8080/zobo_esp32.bin");
        assert_eq!(meta.version, "1.0.3");
        assert_eq!(meta.date.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn release_metadata_points_at_release_asset() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(tmp.path(), 16);
        let meta = VersionMetadata::for_release(&a, "1.0.3", "DavidPetrov2023/Zobo");
        assert_eq!(
            meta.url,
            "https://github.com/DavidPetrov2023/Zobo/releases/download/v1.0.3/zobo_esp32.bin"
        );
    }

    #[test]
    fn written_file_has_expected_fields() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(tmp.path(), 42);
        let meta = VersionMetadata::for_http(&a, "1.0.3", "localhost", 9000);
        let path = meta.write_to(tmp.path()).unwrap();
        assert_eq!(path, tmp.path().join(METADATA_FILE));

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], "1.0.3");
        assert_eq!(value["size"], 42);
        assert_eq!(value["url"], "http://localhost:9000/zobo_esp32.bin");
        assert!(value["date"].is_string());
    }
}
