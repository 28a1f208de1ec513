use anyhow::{bail, Result};
use colored::Colorize;
use pipeline::monitor::{self, MonitorError, PortInfo};

use crate::{config, console};

#[derive(Debug)]
pub struct Options {
    pub port: Option<String>,
    pub list: bool,
    pub baud: u32,
}

/// One line per port, or a single notice when there are none.
pub fn port_lines(ports: &[PortInfo]) -> Vec<String> {
    if ports.is_empty() {
        return vec!["No serial ports found.".to_string()];
    }
    let mut lines = vec!["Available serial ports:".to_string()];
    lines.extend(
        ports
            .iter()
            .map(|port| format!("  {}: {}", port.name, port.description)),
    );
    lines
}

fn print_ports(ports: &[PortInfo]) {
    for line in port_lines(ports) {
        println!("{line}");
    }
}

pub async fn run(options: Options) -> Result<()> {
    if options.list {
        print_ports(&monitor::list_ports()?);
        return Ok(());
    }

    let port = match options.port {
        Some(port) => port,
        None => {
            let ports = monitor::list_ports()?;
            match monitor::default_port(&ports) {
                Some(port) => port.name.clone(),
                None => {
                    eprintln!("{}", "✗ No USB serial port found".red().bold());
                    print_ports(&ports);
                    bail!("no serial port to monitor; pass --port");
                }
            }
        }
    };

    console::banner(&format!("{} Serial Monitor", config::FIRMWARE_NAME));
    console::field("Port", &port);
    console::field("Baud", options.baud);
    println!("   {}", "Press Ctrl+C to stop".dimmed());
    println!("{}", "-".repeat(50).dimmed());

    match monitor::monitor(&port, options.baud).await {
        Ok(()) => {
            println!();
            println!("{}", "Monitor stopped.".yellow());
            Ok(())
        }
        Err(err @ MonitorError::Open { .. }) => {
            eprintln!("{}", format!("✗ {err}").red().bold());
            eprintln!(
                "   {}",
                "Make sure the port is not used by another program (idf.py monitor, a terminal)"
                    .dimmed()
            );
            if let Ok(ports) = monitor::list_ports() {
                eprintln!();
                print_ports(&ports);
            }
            Err(err.into())
        }
        Err(err) => {
            eprintln!();
            eprintln!("{}", format!("✗ {err}").red().bold());
            Err(err.into())
        }
    }
}
