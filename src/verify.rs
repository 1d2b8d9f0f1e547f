//! Integrity check through an external decoder
//!
//! The default command decodes the whole file with ffmpeg and throws the
//! frames away; anything the decoder writes to stderr is kept verbatim as the
//! diagnostic.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::VerifyError;

/// Placeholder substituted with the file path in verifier arguments
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Result of one verifier run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verdict: Verdict,
    pub diagnostic: String,
    pub duration: Duration,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Judges whether a file decodes cleanly. Implementations must not retry.
pub trait Verifier {
    fn verify(&self, path: &Path) -> Result<Verification, VerifyError>;
}

/// Runs an external program once per file
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    probe_args: Vec<String>,
    strict: bool,
}

impl CommandVerifier {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        probe_args: Vec<String>,
        strict: bool,
    ) -> Result<Self, VerifyError> {
        if !args.iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
            return Err(VerifyError::MissingPathPlaceholder);
        }
        Ok(Self {
            program: program.into(),
            args,
            probe_args,
            strict,
        })
    }

    /// `ffmpeg -v error -i {path} -f null -`
    pub fn ffmpeg() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: default_ffmpeg_args(),
            probe_args: vec!["-version".to_string()],
            strict: false,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the program can be launched at all
    pub fn probe(&self) -> Result<(), VerifyError> {
        Command::new(&self.program)
            .args(&self.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| VerifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(())
    }

    fn expand_args(&self, path: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == PATH_PLACEHOLDER {
                    path.as_os_str().to_os_string()
                } else {
                    OsString::from(arg.replace(PATH_PLACEHOLDER, &path.to_string_lossy()))
                }
            })
            .collect()
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, path: &Path) -> Result<Verification, VerifyError> {
        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(self.expand_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| VerifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let duration = started.elapsed();

        let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let verdict = if !output.status.success() || (self.strict && !diagnostic.is_empty()) {
            Verdict::Fail
        } else {
            Verdict::Pass
        };

        debug!(
            path = %path.display(),
            ?verdict,
            exit = ?output.status.code(),
            elapsed_ms = duration.as_millis() as u64,
            "Verifier finished"
        );

        Ok(Verification {
            verdict,
            diagnostic,
            duration,
        })
    }
}

pub fn default_ffmpeg_args() -> Vec<String> {
    ["-v", "error", "-i", PATH_PLACEHOLDER, "-f", "null", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_template_requires_path_placeholder() {
        let err = CommandVerifier::new("ffmpeg", args(&["-i", "-"]), vec![], false).unwrap_err();
        assert!(matches!(err, VerifyError::MissingPathPlaceholder));
    }

    #[test]
    fn test_expand_args_substitutes_path() {
        let verifier = CommandVerifier::ffmpeg();
        let expanded = verifier.expand_args(Path::new("/videos/a b.mkv"));
        assert_eq!(expanded[3], OsString::from("/videos/a b.mkv"));
        assert_eq!(expanded.len(), 7);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let verifier = CommandVerifier::new(
            "definitely-not-a-real-decoder",
            args(&["{path}"]),
            vec![],
            false,
        )
        .unwrap();
        assert!(matches!(verifier.probe(), Err(VerifyError::Spawn { .. })));
        assert!(matches!(
            verifier.verify(Path::new("x.mp4")),
            Err(VerifyError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_passes() {
        let verifier =
            CommandVerifier::new("sh", args(&["-c", "exit 0", "sh", "{path}"]), vec![], false)
                .unwrap();
        let outcome = verifier.verify(Path::new("movie.mp4")).unwrap();
        assert!(outcome.passed());
        assert!(outcome.diagnostic.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_fails_with_stderr_diagnostic() {
        let verifier = CommandVerifier::new(
            "sh",
            args(&["-c", "echo \"$1: Invalid data found\" >&2; exit 1", "sh", "{path}"]),
            vec![],
            false,
        )
        .unwrap();
        let outcome = verifier.verify(Path::new("movie.mp4")).unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.diagnostic, "movie.mp4: Invalid data found");
    }

    #[cfg(unix)]
    #[test]
    fn test_strict_mode_fails_on_stderr_output() {
        let script = args(&["-c", "echo 'corrupt macroblock' >&2; exit 0", "sh", "{path}"]);
        let lenient = CommandVerifier::new("sh", script.clone(), vec![], false).unwrap();
        let strict = CommandVerifier::new("sh", script, vec![], true).unwrap();

        assert!(lenient.verify(Path::new("a.mkv")).unwrap().passed());
        assert!(!strict.verify(Path::new("a.mkv")).unwrap().passed());
    }
}
