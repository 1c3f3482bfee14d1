//! Engine-wide error taxonomy.
//!
//! Each component has its own error enum; `EngineError` unifies them for
//! callers and exposes a stable code per failure kind.

use crate::cover::CoverError;
use crate::export::ExportError;
use crate::format::AudioFormat;
use crate::tags::TagError;
use crate::validator::ValidatorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Format mismatch: claimed {claimed}, detected {detected}")]
    FormatMismatch { claimed: String, detected: String },

    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    #[error("Corrupt {format} tag: {reason}")]
    CorruptTag { format: AudioFormat, reason: String },

    #[error("Cannot write {format} tag: {reason}")]
    UnwritableTag { format: AudioFormat, reason: String },

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Cover encoding failed: {0}")]
    CoverEncode(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Too many items requested: {requested} (max: {max})")]
    TooManyItems { requested: usize, max: usize },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, user-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnsupportedFormat,
    FormatMismatch,
    CorruptFile,
    CorruptTag,
    UnwritableTag,
    UnsupportedImage,
    CoverEncode,
    InvalidSettings,
    TooManyItems,
    Archive,
    Io,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::FormatMismatch => "format_mismatch",
            ErrorCode::CorruptFile => "corrupt_file",
            ErrorCode::CorruptTag => "corrupt_tag",
            ErrorCode::UnwritableTag => "unwritable_tag",
            ErrorCode::UnsupportedImage => "unsupported_image",
            ErrorCode::CoverEncode => "cover_encode",
            ErrorCode::InvalidSettings => "invalid_settings",
            ErrorCode::TooManyItems => "too_many_items",
            ErrorCode::Archive => "archive",
            ErrorCode::Io => "io",
        }
    }
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            EngineError::FormatMismatch { .. } => ErrorCode::FormatMismatch,
            EngineError::CorruptFile(_) => ErrorCode::CorruptFile,
            EngineError::CorruptTag { .. } => ErrorCode::CorruptTag,
            EngineError::UnwritableTag { .. } => ErrorCode::UnwritableTag,
            EngineError::UnsupportedImage(_) => ErrorCode::UnsupportedImage,
            EngineError::CoverEncode(_) => ErrorCode::CoverEncode,
            EngineError::InvalidSettings(_) => ErrorCode::InvalidSettings,
            EngineError::TooManyItems { .. } => ErrorCode::TooManyItems,
            EngineError::Archive(_) => ErrorCode::Archive,
            EngineError::Io(_) => ErrorCode::Io,
        }
    }
}

impl From<TagError> for EngineError {
    fn from(err: TagError) -> Self {
        match err {
            TagError::Corrupt { format, reason } => EngineError::CorruptTag { format, reason },
            TagError::Unwritable { format, reason } => {
                EngineError::UnwritableTag { format, reason }
            }
            TagError::CorruptFile { format, reason } => {
                EngineError::CorruptFile(format!("{format}: {reason}"))
            }
            TagError::Io(e) => EngineError::Io(e),
        }
    }
}

impl From<CoverError> for EngineError {
    fn from(err: CoverError) -> Self {
        match err {
            CoverError::UnsupportedEncoding(_) | CoverError::Decode(_) => {
                EngineError::UnsupportedImage(err.to_string())
            }
            CoverError::Encode(_) => EngineError::CoverEncode(err.to_string()),
            CoverError::InvalidLimit => EngineError::InvalidSettings(err.to_string()),
        }
    }
}

impl From<ExportError> for EngineError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::TooManyItems { requested, max } => {
                EngineError::TooManyItems { requested, max }
            }
            ExportError::Source { id, source } => {
                EngineError::Io(std::io::Error::new(source.kind(), format!("{id}: {source}")))
            }
            ExportError::Zip(e) => EngineError::Archive(e.to_string()),
            ExportError::Io(e) => EngineError::Io(e),
        }
    }
}

impl From<ValidatorError> for EngineError {
    fn from(err: ValidatorError) -> Self {
        match err {
            ValidatorError::Spool(e) => EngineError::Io(e),
        }
    }
}
