use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Maximum number of stderr bytes kept from a failed encoder run.
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Error, Debug, Clone)]
pub enum TranscodeError {
    #[error("failed to launch {binary}: {reason}")]
    Launch { binary: String, reason: String },

    #[error("{binary} exited with {status}: {stderr}")]
    Failed {
        binary: String,
        status: String,
        stderr: String,
    },

    #[error("encoder reported success but {0} is missing")]
    MissingOutput(String),

    #[error("transcoding disabled")]
    Disabled,
}

/// Result of the best-effort re-encode step. Never a hard failure: on any
/// problem the intermediate artifact becomes the final output.
#[derive(Debug, Clone)]
pub enum TranscodeOutcome {
    Transcoded(PathBuf),
    FallbackUsed {
        path: PathBuf,
        reason: TranscodeError,
    },
}

impl TranscodeOutcome {
    pub fn path(&self) -> &Path {
        match self {
            TranscodeOutcome::Transcoded(path) => path,
            TranscodeOutcome::FallbackUsed { path, .. } => path,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, TranscodeOutcome::FallbackUsed { .. })
    }
}

pub trait Transcoder: Send + Sync {
    /// Re-encode `input` into `output` for progressive web playback.
    fn transcode(&self, input: &Path, output: &Path) -> TranscodeOutcome;
}

/// Re-encodes with an external ffmpeg process: H.264 video, AAC audio and the
/// moov atom moved to the front of the file.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-c:a",
                "aac",
                "-movflags",
                "+faststart",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    fn fallback(input: &Path, output: &Path, reason: TranscodeError) -> TranscodeOutcome {
        tracing::warn!(
            "Transcoding {:?} failed, keeping intermediate output: {}",
            input,
            reason
        );
        if output.exists() {
            if let Err(e) = fs::remove_file(output) {
                tracing::warn!("Failed to remove partial output {:?}: {}", output, e);
            }
        }
        TranscodeOutcome::FallbackUsed {
            path: input.to_path_buf(),
            reason,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> TranscodeOutcome {
        let binary = self.binary.display().to_string();
        tracing::info!("Transcoding {:?} -> {:?}", input, output);

        let result = Command::new(&self.binary)
            .args(Self::args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output_status = match result {
            Ok(out) => out,
            Err(e) => {
                return Self::fallback(
                    input,
                    output,
                    TranscodeError::Launch {
                        binary,
                        reason: e.to_string(),
                    },
                )
            }
        };

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
            let tail = stderr
                .get(start..)
                .unwrap_or(stderr.as_ref())
                .trim()
                .to_string();
            return Self::fallback(
                input,
                output,
                TranscodeError::Failed {
                    binary,
                    status: output_status.status.to_string(),
                    stderr: tail,
                },
            );
        }

        if !output.exists() {
            return Self::fallback(
                input,
                output,
                TranscodeError::MissingOutput(output.display().to_string()),
            );
        }

        // The web-playable copy supersedes the intermediate one.
        if let Err(e) = fs::remove_file(input) {
            tracing::warn!("Failed to remove intermediate {:?}: {}", input, e);
        }
        TranscodeOutcome::Transcoded(output.to_path_buf())
    }
}

/// Used when no encoder is available; the intermediate is always kept.
pub struct DisabledTranscoder;

impl Transcoder for DisabledTranscoder {
    fn transcode(&self, input: &Path, _output: &Path) -> TranscodeOutcome {
        TranscodeOutcome::FallbackUsed {
            path: input.to_path_buf(),
            reason: TranscodeError::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args() {
        let args = FfmpegTranscoder::args(Path::new("in.mp4"), Path::new("out.mp4"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "-y", "-i", "in.mp4", "-c:v", "libx264", "-preset", "fast", "-c:a", "aac",
                "-movflags", "+faststart", "out.mp4"
            ]
        );
    }

    #[test]
    fn test_missing_binary_falls_back_to_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("output_x.mp4");
        let output = dir.path().join("web_output_x.mp4");
        fs::write(&input, b"intermediate").unwrap();

        let transcoder = FfmpegTranscoder::new(dir.path().join("no-such-ffmpeg"));
        let outcome = transcoder.transcode(&input, &output);

        assert!(outcome.is_fallback());
        assert_eq!(outcome.path(), input.as_path());
        assert!(matches!(
            outcome,
            TranscodeOutcome::FallbackUsed {
                reason: TranscodeError::Launch { .. },
                ..
            }
        ));
        // Intermediate is left in place
        assert!(input.exists());
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("output_y.mp4");
        let output = dir.path().join("web_output_y.mp4");
        fs::write(&input, b"intermediate").unwrap();

        // `false` ignores its arguments and exits with status 1
        let outcome = FfmpegTranscoder::new("false").transcode(&input, &output);
        assert!(matches!(
            outcome,
            TranscodeOutcome::FallbackUsed {
                reason: TranscodeError::Failed { .. },
                ..
            }
        ));
        assert!(input.exists());
    }

    #[test]
    fn test_disabled_transcoder() {
        let outcome = DisabledTranscoder.transcode(Path::new("a.mp4"), Path::new("b.mp4"));
        assert_eq!(outcome.path(), Path::new("a.mp4"));
        assert!(matches!(
            outcome,
            TranscodeOutcome::FallbackUsed {
                reason: TranscodeError::Disabled,
                ..
            }
        ));
    }
}
