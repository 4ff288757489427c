use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("executable not found: {0}")]
    MissingExecutable(PathBuf),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with code {code}: {diagnostic}")]
    Failed {
        program: String,
        code: i32,
        diagnostic: String,
    },
}

/// Locations of the external media engine binaries.
///
/// Built once per run from an optional install directory and passed into
/// every entry point; never read from ambient state.
#[derive(Debug, Clone)]
pub struct Engine {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Engine {
    /// Resolve ffmpeg/ffprobe from `install_dir`, or fall back to `$PATH`.
    ///
    /// An install directory containing a `bin/` subdirectory (the common
    /// Windows archive layout) is descended into automatically.
    pub fn locate(install_dir: Option<&Path>) -> Result<Self, EngineError> {
        let Some(dir) = install_dir else {
            return Ok(Self {
                ffmpeg: PathBuf::from("ffmpeg"),
                ffprobe: PathBuf::from("ffprobe"),
            });
        };

        if !dir.exists() {
            return Err(EngineError::MissingDirectory(dir.to_path_buf()));
        }

        let bin_dir = dir.join("bin");
        let dir = if bin_dir.exists() { bin_dir } else { dir.to_path_buf() };

        let suffix = if cfg!(windows) { ".exe" } else { "" };
        let ffmpeg = dir.join(format!("ffmpeg{suffix}"));
        let ffprobe = dir.join(format!("ffprobe{suffix}"));

        if !ffmpeg.exists() {
            return Err(EngineError::MissingExecutable(ffmpeg));
        }
        if !ffprobe.exists() {
            return Err(EngineError::MissingExecutable(ffprobe));
        }

        Ok(Self { ffmpeg, ffprobe })
    }

    /// Verify both binaries respond to `-version`.
    pub fn check(&self) -> Result<(), EngineError> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(program)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|source| EngineError::Spawn {
                    program: program.display().to_string(),
                    source,
                })?;
            if !status.success() {
                return Err(EngineError::Failed {
                    program: program.display().to_string(),
                    code: status.code().unwrap_or(-1),
                    diagnostic: "version probe failed".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Immutable description of one engine invocation: program, ordered
/// arguments, and an optional working directory. Built up front, validated
/// by tests, executed exactly as assembled — no shell, no re-quoting.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_os_string());
        }
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(OsString::as_os_str)
    }

    /// True when any argument equals `needle` exactly.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|arg| arg == needle)
    }

    /// Run to completion, returning captured stdout. A non-zero exit maps
    /// to `EngineError::Failed` carrying the engine's stderr verbatim.
    pub fn run(&self) -> Result<Vec<u8>, EngineError> {
        debug!(command = %self, "Invoking engine");

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                program: self.program.display().to_string(),
                code: output.status.code().unwrap_or(-1),
                diagnostic: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(output.stdout)
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_falls_back_to_path() {
        let engine = Engine::locate(None).unwrap();
        assert_eq!(engine.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(engine.ffprobe, PathBuf::from("ffprobe"));
    }

    #[test]
    fn locate_rejects_missing_directory() {
        let result = Engine::locate(Some(Path::new("/nonexistent/ffmpeg-dir")));
        assert!(matches!(result, Err(EngineError::MissingDirectory(_))));
    }

    #[test]
    fn command_renders_for_logging() {
        let cmd = EngineCommand::new("ffmpeg").args(["-y", "-i", "in.mp4", "out.mp4"]);
        assert_eq!(cmd.to_string(), "ffmpeg -y -i in.mp4 out.mp4");
        assert!(cmd.has_arg("-i"));
        assert!(!cmd.has_arg("-c"));
    }
}
