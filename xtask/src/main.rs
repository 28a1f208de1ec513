// Tooling crate: public items are internal to this binary.
#![allow(missing_docs)]

mod app;
mod config;
mod console;
mod firmware;
mod monitor;
mod ota;
mod projects;
mod release;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask")]
#[command(about = "Zobo build, flash and publish tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository root containing zobo_esp32/ and zobo_flutter/
    #[arg(long, global = true, env = "ZOBO_ROOT", default_value = ".")]
    root: PathBuf,
    /// Capture tool output instead of streaming it
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the ESP32 firmware and flash it over serial
    Firmware {
        /// Remove the build directory first
        #[arg(short, long)]
        clean: bool,
        /// Build only
        #[arg(short, long)]
        no_flash: bool,
        /// Serial port (idf.py picks one when omitted)
        #[arg(short, long, env = "ZOBO_SERIAL_PORT")]
        port: Option<String>,
    },
    /// Build the firmware and serve it to the robot over HTTP (OTA)
    Ota {
        /// Serve the existing build
        #[arg(short, long)]
        skip_build: bool,
        /// Remove the build directory first
        #[arg(short, long)]
        clean: bool,
        /// Also flash over serial before serving
        #[arg(long)]
        flash: bool,
        /// Serial port for --flash
        #[arg(short, long, env = "ZOBO_SERIAL_PORT")]
        port: Option<String>,
        /// HTTP port to serve on
        #[arg(long, env = "ZOBO_OTA_PORT", default_value_t = config::DEFAULT_OTA_PORT)]
        http_port: u16,
    },
    /// Build the firmware and publish it as a GitHub release
    Release {
        /// Create the release as a draft
        #[arg(long)]
        draft: bool,
        /// Mark the release as a pre-release
        #[arg(long)]
        prerelease: bool,
        /// Publish the existing build
        #[arg(short, long)]
        skip_build: bool,
        /// Also flash over serial before publishing
        #[arg(long)]
        flash: bool,
        /// Serial port for --flash
        #[arg(short, long, env = "ZOBO_SERIAL_PORT")]
        port: Option<String>,
        /// GitHub repository (owner/name)
        #[arg(long, env = "ZOBO_RELEASE_REPO", default_value = config::RELEASE_REPO)]
        repo: String,
    },
    /// Build the Flutter app and install it on a connected phone
    App {
        /// Build only
        #[arg(short, long)]
        no_install: bool,
        /// Run `flutter clean` first
        #[arg(short, long)]
        clean: bool,
        /// Run `flutter pub get` even if pubspec.yaml is unchanged
        #[arg(short, long)]
        force_deps: bool,
        /// Enable the in-app debug log
        #[arg(short, long)]
        debug: bool,
        /// adb device serial (first connected device when omitted)
        #[arg(long, env = "ANDROID_SERIAL")]
        device: Option<String>,
    },
    /// Show the robot's serial log until Ctrl+C
    Monitor {
        /// Serial port (first USB serial port when omitted)
        #[arg(short, long, env = "ZOBO_SERIAL_PORT")]
        port: Option<String>,
        /// List available serial ports and exit
        #[arg(short, long)]
        list: bool,
        /// Baud rate
        #[arg(short, long, default_value_t = pipeline::monitor::BAUD_RATE)]
        baud: u32,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    tracing::debug!(root = %cli.root.display(), "xtask started");

    let echo = !cli.quiet;
    match cli.command {
        Commands::Firmware {
            clean,
            no_flash,
            port,
        } => {
            let options = firmware::Options {
                clean,
                no_flash,
                port,
            };
            firmware::run(&cli.root, echo, options).await
        }
        Commands::Ota {
            skip_build,
            clean,
            flash,
            port,
            http_port,
        } => {
            let options = ota::Options {
                skip_build,
                clean,
                flash,
                port,
                http_port,
            };
            ota::run(&cli.root, echo, options).await
        }
        Commands::Release {
            draft,
            prerelease,
            skip_build,
            flash,
            port,
            repo,
        } => {
            let options = release::Options {
                draft,
                prerelease,
                skip_build,
                flash,
                port,
                repo,
            };
            release::run(&cli.root, echo, options).await
        }
        Commands::App {
            no_install,
            clean,
            force_deps,
            debug,
            device,
        } => {
            let options = app::Options {
                no_install,
                clean,
                force_deps,
                debug,
                device,
            };
            app::run(&cli.root, echo, options).await
        }
        Commands::Monitor { port, list, baud } => {
            monitor::run(monitor::Options { port, list, baud }).await
        }
    }
}
