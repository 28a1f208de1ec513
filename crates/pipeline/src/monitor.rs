//! Serial console for the robot.
//!
//! The firmware logs over UART at [`BAUD_RATE`]. [`monitor`] copies
//! everything the board prints to stdout until Ctrl-C; the read loop runs on
//! a blocking thread and polls a stop flag between short read timeouts.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPortType;

/// UART speed the firmware logs at.
pub const BAUD_RATE: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A serial port found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path (`/dev/ttyUSB0`, `COM9`).
    pub name: String,
    /// Human-readable description of the adapter.
    pub description: String,
    /// Whether the port sits behind a USB adapter, as dev boards do.
    pub usb: bool,
}

/// Why a monitor session could not start or ended early.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Port enumeration failed.
    #[error("failed to list serial ports: {0}")]
    List(#[source] serialport::Error),
    /// The port is missing or held by another program.
    #[error("cannot open {port}: {source}")]
    Open {
        /// Port as given.
        port: String,
        /// Reason reported by the OS.
        #[source]
        source: serialport::Error,
    },
    /// The connection dropped while monitoring.
    #[error("lost connection to {port}: {source}")]
    Read {
        /// Port being monitored.
        port: String,
        /// Failed read or write.
        #[source]
        source: io::Error,
    },
}

/// Serial ports currently present, sorted by name.
///
/// # Errors
///
/// [`MonitorError::List`] if the platform enumeration fails.
pub fn list_ports() -> Result<Vec<PortInfo>, MonitorError> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(MonitorError::List)?
        .into_iter()
        .map(|info| PortInfo {
            usb: matches!(info.port_type, SerialPortType::UsbPort(_)),
            description: describe(&info.port_type),
            name: info.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// First USB port, which is where a dev board shows up.
pub fn default_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    ports.iter().find(|port| port.usb)
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => usb_description(
            usb.manufacturer.as_deref(),
            usb.product.as_deref(),
            usb.vid,
            usb.pid,
        ),
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => "serial port".to_string(),
    }
}

fn usb_description(manufacturer: Option<&str>, product: Option<&str>, vid: u16, pid: u16) -> String {
    let ids = format!("{vid:04x}:{pid:04x}");
    match (product, manufacturer) {
        (Some(product), Some(manufacturer)) => format!("{product} ({manufacturer}, {ids})"),
        (Some(name), None) | (None, Some(name)) => format!("{name} ({ids})"),
        (None, None) => format!("USB serial ({ids})"),
    }
}

/// Stream `port` to stdout until Ctrl-C.
///
/// # Errors
///
/// [`MonitorError::Open`] if the port cannot be opened,
/// [`MonitorError::Read`] if the device goes away mid-session.
pub async fn monitor(port: &str, baud: u32) -> Result<(), MonitorError> {
    let serial = serialport::new(port, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| MonitorError::Open {
            port: port.to_string(),
            source,
        })?;
    tracing::debug!(port, baud, "serial port opened");

    let stop = Arc::new(AtomicBool::new(false));
    let mut pump = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || copy_until(serial, io::stdout().lock(), &stop))
    };

    let joined = tokio::select! {
        joined = &mut pump => joined,
        _ = tokio::signal::ctrl_c() => {
            stop.store(true, Ordering::Relaxed);
            tracing::debug!(port, "monitor stopped");
            pump.await
        }
    };
    joined
        .map_err(io::Error::other)
        .and_then(|copied| copied)
        .map_err(|source| MonitorError::Read {
            port: port.to_string(),
            source,
        })
}

/// Copy `reader` into `writer` until `stop` is raised. Read timeouts just
/// re-check the flag; end of stream means the device went away.
fn copy_until<R: Read, W: Write>(mut reader: R, mut writer: W, stop: &AtomicBool) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                ))
            }
            Ok(n) => {
                writer.write_all(buf.get(..n).unwrap_or_default())?;
                writer.flush()?;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
