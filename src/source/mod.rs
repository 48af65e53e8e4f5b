//! Abstraction over the external stats command.
//!
//! The `StatsSource` trait lets the refresher run against the real
//! `dspam_stats` binary in production and against [`mock::MockSource`] in tests.

pub mod mock;

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

/// Default flags asking the stats command for per-entity totals.
pub const DEFAULT_ARGS: &[&str] = &["-H", "-t"];

/// Error type for stats source failures.
#[derive(Debug)]
pub enum SourceError {
    /// The command could not be started (not found, not executable).
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    /// The command ran but exited unsuccessfully.
    ExitStatus {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
    /// The command produced output that is not valid UTF-8.
    Output(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Spawn { program, source } => {
                write!(f, "failed to run {}: {}", program.display(), source)
            }
            SourceError::ExitStatus {
                program,
                status,
                stderr,
            } => {
                write!(f, "{} exited with {}", program.display(), status)?;
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
            SourceError::Output(msg) => write!(f, "invalid stats output: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Producer of raw stats output.
pub trait StatsSource: Send + Sync {
    /// Runs the source once and returns its complete standard output.
    fn fetch(&self) -> Result<String, SourceError>;
}

/// Runs an external command and captures its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSource {
    /// Creates a source for `program` invoked with [`DEFAULT_ARGS`].
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replaces the argument list.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl StatsSource for CommandSource {
    fn fetch(&self) -> Result<String, SourceError> {
        debug!(program = %self.program.display(), args = ?self.args, "running stats command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::ExitStatus {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| SourceError::Output(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let source = CommandSource::new("/nonexistent/dspam_stats_12345");
        let err = source.fetch().unwrap_err();
        assert!(matches!(err, SourceError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/dspam_stats_12345"));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let source = CommandSource::new("/bin/sh").with_args(["-c", "printf 'alice\\n'"]);
        assert_eq!(source.fetch().unwrap(), "alice\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_error() {
        let source = CommandSource::new("/bin/sh").with_args(["-c", "echo boom >&2; exit 3"]);
        match source.fetch().unwrap_err() {
            SourceError::ExitStatus { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_default_args() {
        let source = CommandSource::new("dspam_stats");
        assert_eq!(source.args, vec!["-H".to_string(), "-t".to_string()]);
    }
}
