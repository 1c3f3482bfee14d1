//! Upload validation through an external audio inspector.
//!
//! The input is spooled to a temporary file and handed to an [`Inspector`]
//! (ffprobe by default). Its report is cross-checked against the claimed
//! format and the content signature before any tag is trusted.

mod ffprobe;

pub use ffprobe::FfprobeInspector;

use crate::format::{self, AudioFormat};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors an inspector run can end with.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("inspector could not be started: {0}")]
    Spawn(std::io::Error),

    #[error("inspector exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("malformed inspector report: {0}")]
    MalformedReport(String),
}

impl InspectError {
    /// Only a failed spawn is worth another attempt; a bad exit or report
    /// is a verdict on the file.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InspectError::Spawn(_))
    }
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("could not spool input for inspection: {0}")]
    Spool(#[from] std::io::Error),
}

/// What the inspector found.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionReport {
    /// Container name(s) as reported, e.g. `mov,mp4,m4a,3gp,3g2,mj2`.
    pub format_name: String,
    pub codec_name: Option<String>,
    pub duration: Option<Duration>,
    pub has_audio: bool,
}

impl InspectionReport {
    /// Map the reported container onto an engine format, if it is one.
    pub fn detected_format(&self) -> Option<AudioFormat> {
        let names: Vec<String> = self
            .format_name
            .split(',')
            .map(|n| n.trim().to_ascii_lowercase())
            .collect();
        let has = |name: &str| names.iter().any(|n| n == name);

        if has("mov") || has("mp4") || has("m4a") {
            Some(AudioFormat::Mp4)
        } else if has("ogg") {
            match self.codec_name.as_deref() {
                Some("opus") => Some(AudioFormat::Opus),
                Some("vorbis") | None => Some(AudioFormat::Ogg),
                Some(_) => None,
            }
        } else if has("flac") {
            Some(AudioFormat::Flac)
        } else if has("mp3") {
            Some(AudioFormat::Mp3)
        } else {
            None
        }
    }
}

#[async_trait]
pub trait Inspector: Send + Sync {
    fn name(&self) -> &str;

    async fn inspect(&self, path: &Path) -> Result<InspectionReport, InspectError>;
}

/// The format an upload declares itself to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// No declared type.
    Unspecified,
    Format(AudioFormat),
    /// A declared type the engine doesn't handle (e.g. `audio/wav`).
    Unsupported(String),
}

impl Claim {
    /// Interpret a MIME type, extension or filename hint.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            None => Claim::Unspecified,
            Some(hint) => match AudioFormat::from_hint(hint) {
                Some(format) => Claim::Format(format),
                None => Claim::Unsupported(hint.to_string()),
            },
        }
    }
}

impl From<AudioFormat> for Claim {
    fn from(format: AudioFormat) -> Self {
        Claim::Format(format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid,
    Corrupt,
    FormatMismatch,
    Unsupported,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Corrupt => "corrupt",
            ValidationStatus::FormatMismatch => "format_mismatch",
            ValidationStatus::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    /// Human-readable diagnostic (inspector stderr for failed runs).
    pub message: String,
    pub duration: Option<Duration>,
    pub format: Option<AudioFormat>,
}

impl ValidationResult {
    fn corrupt(message: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Corrupt,
            message: message.into(),
            duration: None,
            format: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

pub struct Validator {
    inspector: Box<dyn Inspector>,
    timeout: Duration,
    spawn_retries: u32,
}

impl Validator {
    pub fn new(inspector: Box<dyn Inspector>, timeout: Duration, spawn_retries: u32) -> Self {
        Self {
            inspector,
            timeout,
            spawn_retries,
        }
    }

    /// Classify `data` against what it `claim`s to be.
    pub async fn validate(
        &self,
        data: &[u8],
        claim: &Claim,
    ) -> Result<ValidationResult, ValidatorError> {
        if data.is_empty() {
            return Ok(ValidationResult::corrupt("empty input"));
        }
        let prefix = &data[..data.len().min(format::PREFIX_LEN)];
        let sniffed = format::detect_bytes(prefix);

        let mut spool = tempfile::Builder::new().prefix("tagtrack-").tempfile()?;
        spool.write_all(data)?;
        spool.flush()?;

        let result = match self.run_inspector(spool.path()).await {
            Ok(report) => classify(&report, claim, sniffed),
            Err(message) => ValidationResult::corrupt(message),
        };
        info!(
            "Validation via {}: {} ({})",
            self.inspector.name(),
            result.status.as_str(),
            result.message
        );
        Ok(result)
    }

    /// Like [`validate`](Self::validate), returning `None` when `cancel`
    /// fires first. The inspector process is killed in that case.
    pub async fn validate_cancellable(
        &self,
        data: &[u8],
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<Option<ValidationResult>, ValidatorError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Validation cancelled");
                Ok(None)
            }
            result = self.validate(data, claim) => result.map(Some),
        }
    }

    async fn run_inspector(&self, path: &Path) -> Result<InspectionReport, String> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.inspector.inspect(path)).await {
                Err(_) => {
                    return Err(format!(
                        "inspector timed out after {}s",
                        self.timeout.as_secs_f64()
                    ))
                }
                Ok(Ok(report)) => return Ok(report),
                Ok(Err(e)) if e.is_retryable() && attempt < self.spawn_retries => {
                    attempt += 1;
                    warn!("Inspector spawn failed ({}), retry {}", e, attempt);
                }
                Ok(Err(e)) => return Err(e.to_string()),
            }
        }
    }
}

/// Ogg Vorbis and Ogg Opus share a container and a `.ogg` suffix, so a
/// claim of one accepts the other.
fn claim_matches(claimed: AudioFormat, detected: AudioFormat) -> bool {
    use AudioFormat::{Ogg, Opus};
    claimed == detected || matches!((claimed, detected), (Ogg, Opus) | (Opus, Ogg))
}

fn classify(
    report: &InspectionReport,
    claim: &Claim,
    sniffed: Option<AudioFormat>,
) -> ValidationResult {
    if !report.has_audio {
        return ValidationResult::corrupt(format!(
            "no audio stream in {} container",
            report.format_name
        ));
    }

    let Some(detected) = report.detected_format() else {
        let (status, claimed) = match claim {
            Claim::Format(format) => (
                ValidationStatus::FormatMismatch,
                format!(", claimed {}", format),
            ),
            Claim::Unsupported(hint) => {
                (ValidationStatus::Unsupported, format!(", claimed {}", hint))
            }
            Claim::Unspecified => (ValidationStatus::Unsupported, String::new()),
        };
        return ValidationResult {
            status,
            message: format!(
                "detected unsupported format {}{}",
                report.format_name, claimed
            ),
            duration: report.duration,
            format: None,
        };
    };

    let mismatch = |message: String| ValidationResult {
        status: ValidationStatus::FormatMismatch,
        message,
        duration: report.duration,
        format: Some(detected),
    };

    match claim {
        Claim::Format(claimed) if !claim_matches(*claimed, detected) => {
            return mismatch(format!("claimed {}, detected {}", claimed, detected));
        }
        Claim::Unsupported(hint) => {
            return mismatch(format!("claimed {}, detected {}", hint, detected));
        }
        _ => {}
    }
    if sniffed != Some(detected) {
        debug!("Inspector says {}, signature says {:?}", detected, sniffed);
        return mismatch(format!(
            "inspector detected {}, content signature {}",
            detected,
            sniffed.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
        ));
    }

    ValidationResult {
        status: ValidationStatus::Valid,
        message: format!("valid {}", detected),
        duration: report.duration,
        format: Some(detected),
    }
}
