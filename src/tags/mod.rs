//! Unified tag model and the per-format codecs.
//!
//! Public API:
//! - [`decode`] reads a stream of a known [`AudioFormat`] into a [`TagSet`].
//! - [`encode`] writes the (possibly edited) [`TagSet`] back out as a full file.
//! - [`codec_for`] selects the [`TagCodec`] for a format.
//!
//! Codecs only touch native fields whose unified value changed since decode.
//! Everything else in the container is carried over as-is.

mod flac;
pub mod genres;
mod mp3;
mod mp4;
mod ogg;
mod util;
mod vorbis;

use crate::cover::CoverArt;
use crate::format::AudioFormat;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use flac::FlacCodec;
pub use mp3::Mp3Codec;
pub use mp4::Mp4Codec;
pub use ogg::{OggCodec, OggFlavour};

/// Errors that can occur while decoding or encoding tags.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Corrupt {format} container: {reason}")]
    CorruptFile { format: AudioFormat, reason: String },

    #[error("Corrupt {format} tag: {reason}")]
    Corrupt { format: AudioFormat, reason: String },

    #[error("Cannot write {format} tag: {reason}")]
    Unwritable { format: AudioFormat, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TagError {
    pub(crate) fn container(format: AudioFormat, reason: impl Into<String>) -> Self {
        TagError::CorruptFile {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(format: AudioFormat, reason: impl Into<String>) -> Self {
        TagError::Corrupt {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn unwritable(format: AudioFormat, reason: impl Into<String>) -> Self {
        TagError::Unwritable {
            format,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackNumber {
    pub number: u32,
    pub total: Option<u32>,
}

impl TrackNumber {
    pub fn new(number: u32, total: Option<u32>) -> Self {
        Self { number, total }
    }
}

/// The editable, format-independent fields.
///
/// Absent values are `None` (or an empty artist list), never empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFields {
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track: Option<TrackNumber>,
    pub year: Option<i32>,
    pub genre: Option<String>,
}

impl TagFields {
    /// Artists joined for display ("A, B"), ignoring blank entries.
    pub fn display_artist(&self) -> Option<String> {
        let artists = self.normalized().artists;
        if artists.is_empty() {
            None
        } else {
            Some(artists.join(", "))
        }
    }

    /// Copy with blank strings turned into unset values.
    pub fn normalized(&self) -> TagFields {
        let clean = |v: &Option<String>| v.as_deref().and_then(util::clean_text);
        TagFields {
            title: clean(&self.title),
            artists: self
                .artists
                .iter()
                .filter_map(|a| util::clean_text(a))
                .collect(),
            album: clean(&self.album),
            album_artist: clean(&self.album_artist),
            track: self.track.filter(|t| t.number > 0),
            year: self.year,
            genre: clean(&self.genre),
        }
    }
}

/// Parsed native tag state, one variant per container family.
#[derive(Debug, Clone)]
pub(crate) enum NativeTag {
    Id3(mp3::Id3State),
    Mp4(mp4::Mp4State),
    Ogg(ogg::OggState),
    Flac(flac::FlacState),
}

/// What a codec reads from a borrowed file, before the bytes are attached.
#[derive(Debug)]
pub struct ParsedTags {
    pub fields: TagFields,
    pub cover: Option<CoverArt>,
    pub duration: Option<Duration>,
    pub(crate) native: NativeTag,
}

/// A decoded file: unified fields plus the container they came from.
///
/// The set owns the raw bytes for the duration of an edit; it is built fresh
/// by every decode and consumed by encode.
#[derive(Debug, Clone)]
pub struct TagSet {
    pub fields: TagFields,
    cover: Option<CoverArt>,
    format: AudioFormat,
    duration: Option<Duration>,
    raw: Vec<u8>,
    native: NativeTag,
    original_fields: TagFields,
    original_cover: Option<CoverArt>,
}

impl TagSet {
    pub(crate) fn from_parts(
        format: AudioFormat,
        fields: TagFields,
        cover: Option<CoverArt>,
        duration: Option<Duration>,
        raw: Vec<u8>,
        native: NativeTag,
    ) -> Self {
        let fields = fields.normalized();
        Self {
            original_fields: fields.clone(),
            original_cover: cover.clone(),
            fields,
            cover,
            format,
            duration,
            raw,
            native,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Playback duration derived from the container, when it can be determined.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// The primary embedded image.
    pub fn cover(&self) -> Option<&CoverArt> {
        self.cover.as_ref()
    }

    pub(crate) fn set_cover(&mut self, cover: Option<CoverArt>) {
        self.cover = cover;
    }

    /// The original container bytes this set was decoded from.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Give up the set and keep the file bytes it was decoded from.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// Artists joined for display ("A, B").
    pub fn display_artist(&self) -> Option<String> {
        self.fields.display_artist()
    }

    /// The album artist, else the first track artist.
    pub fn display_album_artist(&self) -> Option<String> {
        let fields = self.fields.normalized();
        fields.album_artist.or_else(|| fields.artists.into_iter().next())
    }

    pub fn is_modified(&self) -> bool {
        self.fields.normalized() != self.original_fields || self.cover_changed()
    }

    pub(crate) fn native(&self) -> &NativeTag {
        &self.native
    }

    pub(crate) fn original_fields(&self) -> &TagFields {
        &self.original_fields
    }

    pub(crate) fn cover_changed(&self) -> bool {
        self.cover != self.original_cover
    }
}

/// Decode/encode contract shared by every container adapter.
pub trait TagCodec: Sync {
    fn format(&self) -> AudioFormat;

    /// Parse a complete file. Fails with `Corrupt` when the tag itself is
    /// unreadable and `CorruptFile` when the container structure is.
    fn parse(&self, bytes: &[u8]) -> Result<ParsedTags, TagError>;

    /// [`parse`](TagCodec::parse), keeping `bytes` as the set's raw file.
    fn decode(&self, bytes: Vec<u8>) -> Result<TagSet, TagError> {
        let parsed = self.parse(&bytes)?;
        Ok(TagSet::from_parts(
            self.format(),
            parsed.fields,
            parsed.cover,
            parsed.duration,
            bytes,
            parsed.native,
        ))
    }

    /// Produce the complete updated file.
    fn encode(&self, tags: &TagSet) -> Result<Vec<u8>, TagError>;
}

static MP3_CODEC: Mp3Codec = Mp3Codec;
static MP4_CODEC: Mp4Codec = Mp4Codec;
static OGG_VORBIS_CODEC: OggCodec = OggCodec::vorbis();
static OGG_OPUS_CODEC: OggCodec = OggCodec::opus();
static FLAC_CODEC: FlacCodec = FlacCodec;

pub fn codec_for(format: AudioFormat) -> &'static dyn TagCodec {
    match format {
        AudioFormat::Mp3 => &MP3_CODEC,
        AudioFormat::Mp4 => &MP4_CODEC,
        AudioFormat::Ogg => &OGG_VORBIS_CODEC,
        AudioFormat::Opus => &OGG_OPUS_CODEC,
        AudioFormat::Flac => &FLAC_CODEC,
    }
}

/// Read a whole stream of a known format into a [`TagSet`].
pub fn decode<R: Read>(mut reader: R, format: AudioFormat) -> Result<TagSet, TagError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_bytes(bytes, format)
}

pub fn decode_bytes(bytes: Vec<u8>, format: AudioFormat) -> Result<TagSet, TagError> {
    let len = bytes.len();
    let tags = codec_for(format).decode(bytes)?;
    debug!(
        "Decoded {} tags from {} bytes (title: {:?})",
        format, len, tags.fields.title
    );
    Ok(tags)
}

/// Write the updated file for `tags` to `writer`.
pub fn encode<W: Write>(tags: &TagSet, mut writer: W) -> Result<(), TagError> {
    let bytes = encode_to_vec(tags)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub fn encode_to_vec(tags: &TagSet) -> Result<Vec<u8>, TagError> {
    let bytes = codec_for(tags.format).encode(tags)?;
    debug!(
        "Encoded {} tags: {} -> {} bytes",
        tags.format,
        tags.raw.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Fields that differ between decode and now, normalized.
pub(crate) struct FieldChanges {
    pub current: TagFields,
    pub title: bool,
    pub artists: bool,
    pub album: bool,
    pub album_artist: bool,
    pub track: bool,
    pub year: bool,
    pub genre: bool,
}

impl FieldChanges {
    pub(crate) fn of(tags: &TagSet) -> Self {
        let current = tags.fields.normalized();
        let original = tags.original_fields();
        Self {
            title: current.title != original.title,
            artists: current.artists != original.artists,
            album: current.album != original.album,
            album_artist: current.album_artist != original.album_artist,
            track: current.track != original.track,
            year: current.year != original.year,
            genre: current.genre != original.genre,
            current,
        }
    }

    pub(crate) fn any(&self) -> bool {
        self.title
            || self.artists
            || self.album
            || self.album_artist
            || self.track
            || self.year
            || self.genre
    }
}

/// Index of the primary image among `(is_front_cover, ..)` candidates:
/// the first front cover, else the first image.
pub(crate) fn primary_index<I: IntoIterator<Item = bool>>(front_flags: I) -> Option<usize> {
    let flags: Vec<bool> = front_flags.into_iter().collect();
    flags
        .iter()
        .position(|front| *front)
        .or(if flags.is_empty() { None } else { Some(0) })
}
