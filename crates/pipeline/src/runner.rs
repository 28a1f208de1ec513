//! Run commands inside an activated toolchain environment.
//!
//! ESP-IDF only works after `export.sh` has been sourced into the shell, so a
//! command cannot be spawned directly. Instead a small wrapper script is
//! written to the temp directory:
//!
//! ```sh
//! . '/home/me/esp/esp-idf/export.sh' >/dev/null 2>&1
//! cd '/work/zobo_esp32' || exit 1
//! idf.py build
//! ```
//!
//! The wrapper is an [`ActivationScript`]; it is deleted when dropped, which
//! covers success, failure and Ctrl-C (the child is killed and the runner
//! returns [`RunError::Interrupted`] instead of letting the signal take the
//! process down).

use std::io::{self, Write};
use std::path::Path;
use std::process::Stdio;

use colored::Colorize;
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::toolchain::{Activation, Toolchain};

/// Exit status and interleaved stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status 0.
    pub success: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Stdout and stderr lines in arrival order.
    pub output: String,
}

impl CommandOutput {
    /// Last `lines` lines of output, for failure diagnostics.
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.lines().collect();
        let skip = all.len().saturating_sub(lines);
        all.into_iter().skip(skip).collect::<Vec<_>>().join("\n")
    }
}

/// Why a command produced no exit status.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The activation wrapper could not be written.
    #[error("failed to prepare activation wrapper: {0}")]
    Wrapper(#[source] io::Error),
    /// The shell could not be started or waited on.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Command being started.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Ctrl-C arrived while the command was running. The child was killed.
    #[error("interrupted while running `{command}`")]
    Interrupted {
        /// Command that was running.
        command: String,
    },
}

/// Executes a command with a toolchain's environment activated.
///
/// A non-zero exit is reported through [`CommandOutput::success`], never as
/// an error.
#[allow(async_fn_in_trait)]
pub trait Runner {
    /// Run `command` from `cwd` with `toolchain` activated.
    async fn run(
        &self,
        toolchain: &Toolchain,
        command: &str,
        cwd: &Path,
    ) -> Result<CommandOutput, RunError>;
}

/// Runs commands through the platform shell (`sh`, or `cmd` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner {
    /// Echo output lines to the console as they arrive.
    pub echo: bool,
}

impl ShellRunner {
    /// A runner that echoes output when `echo` is set.
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }
}

impl Runner for ShellRunner {
    async fn run(
        &self,
        toolchain: &Toolchain,
        command: &str,
        cwd: &Path,
    ) -> Result<CommandOutput, RunError> {
        let script = ActivationScript::prepare(toolchain, command, cwd).map_err(RunError::Wrapper)?;
        tracing::debug!(
            toolchain = toolchain.name(),
            command,
            cwd = %cwd.display(),
            wrapper = %script.path().display(),
            "running command"
        );

        let mut child = shell_command(script.path())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let echo = self.echo;

        let finished = async {
            let output = collect_output(stdout, stderr, echo).await;
            let status = child.wait().await;
            (output, status)
        };

        tokio::select! {
            (output, status) = finished => {
                let status = status.map_err(|source| RunError::Spawn {
                    command: command.to_string(),
                    source,
                })?;
                Ok(CommandOutput {
                    success: status.success(),
                    code: status.code(),
                    output,
                })
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(command, "interrupted, stopping child process");
                Err(RunError::Interrupted {
                    command: command.to_string(),
                })
            }
        }
        // `child` (kill_on_drop) and `script` (TempPath) are released here on
        // every path out of this function.
    }
}

/// A transient wrapper script that activates a toolchain and runs one
/// command. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct ActivationScript {
    path: TempPath,
}

#[cfg(windows)]
const SCRIPT_SUFFIX: &str = ".bat";
#[cfg(not(windows))]
const SCRIPT_SUFFIX: &str = ".sh";

impl ActivationScript {
    /// Write the wrapper for `command` to the temp directory.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating or writing the file.
    pub fn prepare(toolchain: &Toolchain, command: &str, cwd: &Path) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("zobo-activate-")
            .suffix(SCRIPT_SUFFIX)
            .tempfile()?;
        file.write_all(render_script(toolchain, command, cwd).as_bytes())?;
        file.flush()?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    /// Location of the wrapper script.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Wrapper script contents for the host shell.
#[cfg(not(windows))]
pub fn render_script(toolchain: &Toolchain, command: &str, cwd: &Path) -> String {
    let root = toolchain.root();
    let activate = match toolchain.activation() {
        Activation::SourceScript(script) => {
            format!(". {} >/dev/null 2>&1", sh_quote(&root.join(script)))
        }
        Activation::PathPrefix(bin) => {
            format!("export PATH={}:\"$PATH\"", sh_quote(&root.join(bin)))
        }
    };
    format!(
        "{activate}\ncd {} || exit 1\n{command}\n",
        sh_quote(cwd)
    )
}

/// Wrapper script contents for the host shell.
#[cfg(windows)]
pub fn render_script(toolchain: &Toolchain, command: &str, cwd: &Path) -> String {
    let root = toolchain.root();
    let activate = match toolchain.activation() {
        Activation::SourceScript(script) => {
            format!("call \"{}\" >nul 2>&1", root.join(script).display())
        }
        Activation::PathPrefix(bin) => {
            format!("set \"PATH={};%PATH%\"", root.join(bin).display())
        }
    };
    format!(
        "@echo off\r\n{activate}\r\ncd /d \"{}\" || exit /b 1\r\n{command}\r\n",
        cwd.display()
    )
}

#[cfg(not(windows))]
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(not(windows))]
fn shell_command(script: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg(script);
    cmd
}

#[cfg(windows)]
fn shell_command(script: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}

/// Read stdout and stderr line by line until both close, interleaving them
/// in arrival order.
async fn collect_output<O, E>(stdout: Option<O>, stderr: Option<E>, echo: bool) -> String
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut combined = String::new();
    let mut out = stdout.map(BufReader::new);
    let mut err = stderr.map(BufReader::new);
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    loop {
        tokio::select! {
            read = read_line(&mut out, &mut out_buf), if out.is_some() => {
                if read {
                    push_line(&mut combined, &out_buf, echo);
                    out_buf.clear();
                } else {
                    out = None;
                }
            }
            read = read_line(&mut err, &mut err_buf), if err.is_some() => {
                if read {
                    push_line(&mut combined, &err_buf, echo);
                    err_buf.clear();
                } else {
                    err = None;
                }
            }
            else => break,
        }
    }
    combined
}

/// `true` if a (possibly partial, final) line was read into `buf`.
async fn read_line<R: AsyncRead + Unpin>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> bool {
    match reader {
        Some(reader) => matches!(reader.read_until(b'\n', buf).await, Ok(n) if n > 0),
        None => false,
    }
}

fn push_line(combined: &mut String, raw: &[u8], echo: bool) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if echo {
        println!("   {}", line.dimmed());
    }
    combined.push_str(line);
    combined.push('\n');
}
