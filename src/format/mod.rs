//! Content-based container detection.
//!
//! Only a bounded prefix of the stream is examined. The filename never
//! participates: a FLAC file called `song.mp3` is still FLAC.

pub mod mpeg;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// Number of leading bytes inspected for a signature.
pub const PREFIX_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Mp4,
    Ogg,
    Opus,
    Flac,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Mp3,
        AudioFormat::Mp4,
        AudioFormat::Ogg,
        AudioFormat::Opus,
        AudioFormat::Flac,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp4 => "mp4",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
        }
    }

    /// Extension used when naming files of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp4 => "m4a",
            other => other.as_str(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Opus => "audio/opus",
            AudioFormat::Flac => "audio/flac",
        }
    }

    /// Interpret a declared format hint: a MIME type, an extension or a filename.
    ///
    /// Returns `None` for hints naming formats the engine doesn't handle.
    pub fn from_hint(hint: &str) -> Option<Self> {
        let hint = hint.trim().to_ascii_lowercase();
        let token = match hint.rsplit_once('.') {
            Some((_, ext)) if !hint.contains('/') => ext.to_string(),
            _ => hint.clone(),
        };
        match token.as_str() {
            "mp3" | "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg-3" => {
                Some(AudioFormat::Mp3)
            }
            "mp4" | "m4a" | "m4b" | "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac" => {
                Some(AudioFormat::Mp4)
            }
            "ogg" | "oga" | "vorbis" | "audio/ogg" | "audio/vorbis" | "audio/x-vorbis+ogg" => {
                Some(AudioFormat::Ogg)
            }
            "opus" | "audio/opus" | "audio/x-opus+ogg" => Some(AudioFormat::Opus),
            "flac" | "audio/flac" | "audio/x-flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the container of a seekable stream.
///
/// The stream position is restored before returning. I/O failures and
/// truncated input yield `None`, never an error.
pub fn detect<R: Read + Seek>(reader: &mut R) -> Option<AudioFormat> {
    let start = reader.stream_position().ok()?;
    let detected = detect_at(reader, start);
    let _ = reader.seek(SeekFrom::Start(start));
    debug!("Detected container: {:?}", detected);
    detected
}

fn detect_at<R: Read + Seek>(reader: &mut R, start: u64) -> Option<AudioFormat> {
    let prefix = read_prefix(reader, PREFIX_LEN)?;

    if let Some(tag_len) = id3v2_tag_len(&prefix) {
        // FLAC files occasionally carry a leading ID3v2 tag.
        reader.seek(SeekFrom::Start(start + tag_len as u64)).ok()?;
        let after = read_prefix(reader, 4)?;
        if after == b"fLaC" {
            return Some(AudioFormat::Flac);
        }
        return Some(AudioFormat::Mp3);
    }

    detect_bytes(&prefix)
}

/// Detect the container from an in-memory prefix (or the whole file).
pub fn detect_bytes(data: &[u8]) -> Option<AudioFormat> {
    match id3v2_tag_len(data) {
        Some(tag_len) if data.len() >= tag_len + 4 && &data[tag_len..tag_len + 4] == b"fLaC" => {
            return Some(AudioFormat::Flac)
        }
        Some(_) => return Some(AudioFormat::Mp3),
        None => {}
    }

    if data.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return Some(AudioFormat::Mp4);
    }
    if data.starts_with(b"OggS") {
        return detect_ogg_codec(data);
    }
    // Raw MPEG streams must start with a frame; scanning arbitrary offsets
    // would misclassify random binaries.
    match mpeg::find_frame(data, 0) {
        Some((0, _)) => Some(AudioFormat::Mp3),
        _ => None,
    }
}

fn detect_ogg_codec(data: &[u8]) -> Option<AudioFormat> {
    if data.len() < 27 {
        return None;
    }
    let segments = data[26] as usize;
    let body = 27 + segments;
    let packet = data.get(body..)?;
    if packet.starts_with(b"\x01vorbis") {
        Some(AudioFormat::Ogg)
    } else if packet.starts_with(b"OpusHead") {
        Some(AudioFormat::Opus)
    } else {
        None
    }
}

/// Total length (header, body, optional footer) of an ID3v2 tag at the start of `data`.
pub(crate) fn id3v2_tag_len(data: &[u8]) -> Option<usize> {
    if data.len() < 10 || &data[..3] != b"ID3" || data[3] == 0xFF || data[4] == 0xFF {
        return None;
    }
    let size = syncsafe_u32(&data[6..10])? as usize;
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

fn syncsafe_u32(bytes: &[u8]) -> Option<u32> {
    if bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 7) | *b as u32))
}

fn read_prefix<R: Read>(reader: &mut R, limit: usize) -> Option<Vec<u8>> {
    let mut prefix = Vec::with_capacity(limit.min(PREFIX_LEN));
    reader.take(limit as u64).read_to_end(&mut prefix).ok()?;
    Some(prefix)
}
