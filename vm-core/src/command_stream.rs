// Standard library
use std::ffi::OsStr;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

// External crates
use crate::error::{Result, VmError};
use duct::cmd;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr, interleaved in the order the child wrote them.
    pub output: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of the captured output.
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs an executable with an explicit argument vector.
///
/// A non-zero exit is not an error at this level: it comes back as a
/// [`CommandOutput`] and the caller decides what it means. Errors are reserved
/// for processes that could not be started or that exceeded their deadline.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `duct`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuctRunner;

impl CommandRunner for DuctRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        run_command(program, args, timeout)
    }
}

/// Render a command line for logs and error messages. Never executed.
pub fn render_command_line<A: AsRef<OsStr>>(program: &Path, args: &[A]) -> String {
    let mut parts = vec![quote_for_display(&program.to_string_lossy())];
    parts.extend(
        args.iter()
            .map(|a| quote_for_display(&a.as_ref().to_string_lossy())),
    );
    parts.join(" ")
}

fn quote_for_display(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '\\'))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Run `program` with `args`, capturing stdout and stderr as one stream.
///
/// Both pipes are drained by duct's reader threads while we wait, so a chatty
/// child cannot stall on a full pipe. With a timeout the child is killed once
/// the deadline passes.
pub fn run_command<A: AsRef<OsStr>>(
    program: &Path,
    args: &[A],
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let full_command = render_command_line(program, args);
    debug!("Executing command: {}", full_command);

    let handle = cmd(program, args)
        .stdin_null()
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .start()
        .map_err(|source| VmError::Spawn {
            command: full_command.clone(),
            source,
        })?;

    let output = match timeout {
        None => handle.wait()?,
        Some(limit) => {
            let start = Instant::now();
            loop {
                if let Some(output) = handle.try_wait()? {
                    break output;
                }
                if start.elapsed() >= limit {
                    if let Err(e) = handle.kill() {
                        debug!("Failed to kill timed out command '{}': {}", full_command, e);
                    }
                    return Err(VmError::Timeout {
                        command: full_command,
                        timeout: limit,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    for line in text.lines() {
        debug!("{}", line);
    }

    Ok(CommandOutput {
        output: text,
        exit_code: output.status.code(),
    })
}
