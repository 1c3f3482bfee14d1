//! Engine facade: the end-to-end flows with configured settings.

use crate::config::EngineSettings;
use crate::cover::{self, CoverArt};
use crate::error::EngineError;
use crate::export::{self, ExportArchive, ExportEntry, ExportRequest, ItemSource};
use crate::format::{self, AudioFormat};
use crate::tags::{self, genres, TagSet};
use crate::validator::{
    Claim, FfprobeInspector, Inspector, ValidationResult, ValidationStatus, Validator,
};
use std::io::{Seek, Write};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct TagEngine {
    settings: EngineSettings,
    validator: Validator,
}

impl TagEngine {
    /// Engine validating through the configured ffprobe binary.
    pub fn new(settings: EngineSettings) -> Self {
        let inspector = FfprobeInspector::new(settings.validator.ffprobe_path.clone());
        Self::with_inspector(settings, Box::new(inspector))
    }

    pub fn with_inspector(settings: EngineSettings, inspector: Box<dyn Inspector>) -> Self {
        let validator = Validator::new(
            inspector,
            settings.validator.timeout,
            settings.validator.spawn_retries,
        );
        Self {
            settings,
            validator,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn detect(&self, data: &[u8]) -> Result<AudioFormat, EngineError> {
        format::detect_bytes(data)
            .ok_or_else(|| EngineError::UnsupportedFormat("unrecognized container".to_string()))
    }

    /// Detect and decode without consulting the inspector.
    pub fn read(&self, data: Vec<u8>) -> Result<TagSet, EngineError> {
        let format = self.detect(&data)?;
        Ok(tags::decode_bytes(data, format)?)
    }

    pub async fn validate(&self, data: &[u8], claim: &Claim) -> Result<ValidationResult, EngineError> {
        Ok(self.validator.validate(data, claim).await?)
    }

    /// `None` when `cancel` fires before the inspector finishes.
    pub async fn validate_cancellable(
        &self,
        data: &[u8],
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<Option<ValidationResult>, EngineError> {
        Ok(self.validator.validate_cancellable(data, claim, cancel).await?)
    }

    /// Upload path: validate against `claim`, then decode.
    ///
    /// Anything but a valid verdict becomes the matching error.
    pub async fn ingest(&self, data: Vec<u8>, claim: &Claim) -> Result<TagSet, EngineError> {
        let result = self.validator.validate(&data, claim).await?;
        let detected = match result.status {
            ValidationStatus::Valid => result.format,
            ValidationStatus::Corrupt => return Err(EngineError::CorruptFile(result.message)),
            ValidationStatus::Unsupported => {
                return Err(EngineError::UnsupportedFormat(result.message))
            }
            ValidationStatus::FormatMismatch => {
                return Err(EngineError::FormatMismatch {
                    claimed: claim_label(claim),
                    detected: result
                        .format
                        .map(|f| f.to_string())
                        .unwrap_or_else(|| "unsupported".to_string()),
                })
            }
        };
        let format = match detected {
            Some(format) => format,
            None => self.detect(&data)?,
        };
        info!("Ingesting {} bytes as {}", data.len(), format);
        Ok(tags::decode_bytes(data, format)?)
    }

    /// Encode `tags` into complete file bytes.
    pub fn write(&self, tags: &TagSet) -> Result<Vec<u8>, EngineError> {
        let out = tags::encode_to_vec(tags)?;
        debug!(
            "Encoded {} tags: {} -> {} bytes",
            tags.format(),
            tags.raw_bytes().len(),
            out.len()
        );
        Ok(out)
    }

    pub fn extract_cover(&self, tags: &TagSet) -> Option<CoverArt> {
        cover::extract(tags)
    }

    /// Embed `image` as the primary cover, scaled to the configured maximum.
    pub fn embed_cover(&self, tags: &mut TagSet, image: CoverArt) -> Result<(), EngineError> {
        Ok(cover::embed(tags, image, self.settings.cover_max_dimension)?)
    }

    pub fn remove_cover(&self, tags: &mut TagSet) {
        cover::remove(tags)
    }

    pub fn export<W: Write + Seek>(
        &self,
        request: &ExportRequest,
        source: &dyn ItemSource,
        writer: W,
    ) -> Result<ExportArchive<W>, EngineError> {
        Ok(export::package(request, source, writer, &self.settings.export)?)
    }

    pub fn export_with_progress<W, F>(
        &self,
        request: &ExportRequest,
        source: &dyn ItemSource,
        writer: W,
        on_entry: F,
    ) -> Result<ExportArchive<W>, EngineError>
    where
        W: Write + Seek,
        F: FnMut(&ExportEntry),
    {
        Ok(export::package_with_progress(
            request,
            source,
            writer,
            &self.settings.export,
            on_entry,
        )?)
    }

    /// The standard (ID3v1 + Winamp) genre names, in index order.
    pub fn genres(&self) -> &'static [&'static str] {
        &genres::STANDARD_GENRES
    }
}

fn claim_label(claim: &Claim) -> String {
    match claim {
        Claim::Unspecified => "unspecified".to_string(),
        Claim::Format(format) => format.to_string(),
        Claim::Unsupported(hint) => hint.clone(),
    }
}
