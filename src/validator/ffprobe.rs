//! `ffprobe` as the default [`Inspector`].

use super::{InspectError, InspectionReport, Inspector};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
}

pub struct FfprobeInspector {
    binary: PathBuf,
}

impl FfprobeInspector {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeInspector {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl Inspector for FfprobeInspector {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn inspect(&self, path: &Path) -> Result<InspectionReport, InspectError> {
        debug!("Running {} on {:?}", self.binary.display(), path);
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(InspectError::Spawn)?;

        if !output.status.success() {
            return Err(InspectError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_report(&String::from_utf8_lossy(&output.stdout))
    }
}

pub(crate) fn parse_report(json: &str) -> Result<InspectionReport, InspectError> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| InspectError::MalformedReport(format!("JSON parse error: {}", e)))?;

    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

    Ok(InspectionReport {
        format_name: probe.format.format_name,
        codec_name: audio.and_then(|s| s.codec_name.clone()),
        duration,
        has_audio: audio.is_some(),
    })
}
