//! Android device probing through `adb`.

use tokio::process::Command;

/// Why no device serial could be determined.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    /// `adb` is missing or failed to run.
    #[error("adb is not available")]
    AdbUnavailable,
    /// No authorized device is attached.
    #[error("no device connected (enable USB debugging and plug in the phone)")]
    NoDevice,
}

/// Serial of the first device in `adb devices` state `device`.
///
/// # Errors
///
/// [`DeviceError::AdbUnavailable`] if `adb` cannot run,
/// [`DeviceError::NoDevice`] if nothing usable is attached.
pub async fn first_connected() -> Result<String, DeviceError> {
    let out = Command::new("adb")
        .arg("devices")
        .output()
        .await
        .map_err(|_| DeviceError::AdbUnavailable)?;
    if !out.status.success() {
        return Err(DeviceError::AdbUnavailable);
    }
    parse_devices(&String::from_utf8_lossy(&out.stdout))
        .into_iter()
        .next()
        .ok_or(DeviceError::NoDevice)
}

/// Serials listed as `device` in `adb devices` output. Unauthorized and
/// offline entries are skipped.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attached_devices() {
        let out = "* daemon started successfully\nList of devices attached\nR58M123ABC\tdevice\nemulator-5554\tdevice\n\n";
        assert_eq!(parse_devices(out), vec!["R58M123ABC", "emulator-5554"]);
    }

    #[test]
    fn skips_unauthorized_and_offline() {
        let out = "List of devices attached\nR58M123ABC\tunauthorized\n0123\toffline\n";
        assert!(parse_devices(out).is_empty());
    }

    #[test]
    fn empty_list() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
        assert!(parse_devices("").is_empty());
    }
}
