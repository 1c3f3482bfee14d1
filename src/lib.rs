//! Tagtrack audio tag engine
//!
//! Reads and rewrites title/artist/album/track/year/genre and cover art in
//! MP3, MP4, Ogg Vorbis, Ogg Opus and FLAC files through one tag model,
//! validates uploads with an external inspector and packages edited files
//! into zip archives.

pub mod config;
pub mod cover;
pub mod engine;
pub mod error;
pub mod export;
pub mod format;
pub mod tags;
pub mod validator;

// Re-export commonly used types for convenience
pub use config::{AppConfig, EngineSettings};
pub use cover::CoverArt;
pub use engine::TagEngine;
pub use error::{EngineError, ErrorCode};
pub use export::{ExportArchive, ExportEntry, ExportRequest, ExportSettings, ItemSource};
pub use format::AudioFormat;
pub use tags::{ParsedTags, TagCodec, TagFields, TagSet, TrackNumber};
pub use validator::{Claim, Inspector, ValidationResult, ValidationStatus, Validator};
