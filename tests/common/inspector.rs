//! In-process stand-in for ffprobe.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tagtrack::validator::{InspectError, InspectionReport, Inspector};

/// Recognizes containers from their leading bytes the way ffprobe would
/// report them, and counts how often it was asked.
#[derive(Clone, Default)]
pub struct SignatureInspector {
    calls: Arc<AtomicUsize>,
}

impl SignatureInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn report(format_name: &str, codec: &str) -> InspectionReport {
    InspectionReport {
        format_name: format_name.to_string(),
        codec_name: Some(codec.to_string()),
        duration: Some(Duration::from_millis(1500)),
        has_audio: true,
    }
}

#[async_trait]
impl Inspector for SignatureInspector {
    fn name(&self) -> &str {
        "signature"
    }

    async fn inspect(&self, path: &Path) -> Result<InspectionReport, InspectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = tokio::fs::read(path).await.map_err(InspectError::Spawn)?;

        if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Ok(report("wav", "pcm_s16le"))
        } else if data.starts_with(b"fLaC") {
            Ok(report("flac", "flac"))
        } else if data.starts_with(b"ID3") || data.starts_with(&[0xFF, 0xFB]) {
            Ok(report("mp3", "mp3"))
        } else if data.len() >= 8 && &data[4..8] == b"ftyp" {
            Ok(report("mov,mp4,m4a,3gp,3g2,mj2", "aac"))
        } else if data.starts_with(b"OggS") {
            let codec = if data.windows(8).any(|w| w == b"OpusHead") {
                "opus"
            } else {
                "vorbis"
            };
            Ok(report("ogg", codec))
        } else {
            Err(InspectError::Failed {
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            })
        }
    }
}
