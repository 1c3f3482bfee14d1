//! MP3: ID3v2 frames via the `id3` crate.
//!
//! ID3v2 is authoritative. A trailing ID3v1 tag (and the enhanced `TAG+`
//! block in front of it) is dropped whenever the file is written.

use super::genres::resolve_genre;
use super::util::{clean_text, duration_from_units, parse_year, track_from_parts};
use super::{
    primary_index, FieldChanges, NativeTag, ParsedTags, TagCodec, TagError, TagFields, TagSet,
};
use crate::cover::CoverArt;
use crate::format::mpeg::{self, FrameHeader};
use crate::format::{id3v2_tag_len, AudioFormat};
use byteorder::{BigEndian, ByteOrder};
use id3::frame::{Content, Picture, PictureType};
use id3::{Frame, Tag, TagLike, Version};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

const ID3V1_LEN: usize = 128;
const ID3V1_ENHANCED_LEN: usize = 227;

#[derive(Debug, Clone)]
pub(crate) struct Id3State {
    tag: Tag,
    /// Byte range of the MPEG audio, without any ID3v2 or ID3v1 tags.
    audio_start: usize,
    audio_end: usize,
}

pub struct Mp3Codec;

impl TagCodec for Mp3Codec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTags, TagError> {
        let audio_start = id3v2_tag_len(bytes).unwrap_or(0).min(bytes.len());
        let audio_end = audio_end(bytes, audio_start);

        let tag = if audio_start > 0 {
            match Tag::read_from2(Cursor::new(bytes)) {
                Ok(tag) => tag,
                Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Tag::new(),
                Err(e) => return Err(TagError::corrupt(AudioFormat::Mp3, e.to_string())),
            }
        } else {
            Tag::new()
        };

        let fields = read_fields(&tag);
        let cover = primary_picture(&tag)
            .map(|(_, pic)| CoverArt::new(pic.data.clone(), pic.mime_type.clone()));
        let duration = mpeg_duration(&bytes[audio_start..audio_end]);

        let state = Id3State {
            tag,
            audio_start,
            audio_end,
        };
        Ok(ParsedTags {
            fields,
            cover,
            duration,
            native: NativeTag::Id3(state),
        })
    }

    fn encode(&self, tags: &TagSet) -> Result<Vec<u8>, TagError> {
        let NativeTag::Id3(state) = tags.native() else {
            return Err(TagError::unwritable(
                AudioFormat::Mp3,
                "tag set was not decoded from an MP3 file",
            ));
        };

        let mut tag = state.tag.clone();
        let changes = FieldChanges::of(tags);
        apply_changes(&mut tag, &changes);

        if tags.cover_changed() {
            tag = replace_primary_picture(&tag, tags.cover());
        }

        let audio = &tags.raw_bytes()[state.audio_start..state.audio_end];
        let mut out = Vec::with_capacity(audio.len() + 4096);
        if tag.frames().next().is_some() {
            tag.write_to(&mut out, Version::Id3v24)
                .map_err(|e| TagError::unwritable(AudioFormat::Mp3, e.to_string()))?;
        }
        out.extend_from_slice(audio);
        Ok(out)
    }
}

fn read_fields(tag: &Tag) -> TagFields {
    let text = |id: &str| {
        tag.get(id)
            .and_then(|f| f.content().text())
            .and_then(first_value)
    };

    let artists = tag
        .get("TPE1")
        .and_then(|f| f.content().text())
        .map(|s| s.split('\0').filter_map(clean_text).collect())
        .unwrap_or_default();

    let year = text("TDRC")
        .or_else(|| text("TYER"))
        .and_then(|s| parse_year(&s));

    TagFields {
        title: text("TIT2"),
        artists,
        album: text("TALB"),
        album_artist: text("TPE2"),
        track: track_from_parts(text("TRCK").as_deref(), None),
        year,
        genre: text("TCON").map(|g| resolve_genre(&g)),
    }
}

/// First of possibly NUL-separated values.
fn first_value(s: &str) -> Option<String> {
    s.split('\0').find_map(clean_text)
}

fn apply_changes(tag: &mut Tag, changes: &FieldChanges) {
    let fields = &changes.current;

    if changes.title {
        set_or_remove(tag, "TIT2", fields.title.clone());
    }
    if changes.artists {
        let joined = if fields.artists.is_empty() {
            None
        } else {
            Some(fields.artists.join("\0"))
        };
        set_or_remove(tag, "TPE1", joined);
    }
    if changes.album {
        set_or_remove(tag, "TALB", fields.album.clone());
    }
    if changes.album_artist {
        set_or_remove(tag, "TPE2", fields.album_artist.clone());
    }
    if changes.track {
        let value = fields.track.map(|t| match t.total {
            Some(total) => format!("{}/{}", t.number, total),
            None => t.number.to_string(),
        });
        set_or_remove(tag, "TRCK", value);
    }
    if changes.year {
        tag.remove("TYER");
        set_or_remove(tag, "TDRC", fields.year.map(|y| y.to_string()));
    }
    if changes.genre {
        set_or_remove(tag, "TCON", fields.genre.clone());
    }
}

fn set_or_remove(tag: &mut Tag, id: &str, value: Option<String>) {
    match value {
        Some(v) => tag.set_text(id, v),
        None => {
            tag.remove(id);
        }
    }
}

fn primary_picture(tag: &Tag) -> Option<(usize, &Picture)> {
    let pictures: Vec<&Picture> = tag.pictures().collect();
    let index = primary_index(
        pictures
            .iter()
            .map(|p| p.picture_type == PictureType::CoverFront),
    )?;
    Some((index, pictures[index]))
}

/// Rebuild the tag with the primary APIC frame swapped (or dropped).
/// Secondary pictures and every other frame keep their order.
fn replace_primary_picture(tag: &Tag, cover: Option<&CoverArt>) -> Tag {
    let primary = primary_picture(tag).map(|(index, _)| index);
    let mut rebuilt = Tag::with_version(tag.version());
    let mut picture_index = 0;

    for frame in tag.frames() {
        if let Content::Picture(_) = frame.content() {
            let is_primary = Some(picture_index) == primary;
            picture_index += 1;
            if is_primary {
                continue;
            }
        }
        rebuilt.add_frame(frame.clone());
    }

    if let Some(cover) = cover {
        let picture = Picture {
            mime_type: cover.mime_type().to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: cover.data().to_vec(),
        };
        rebuilt.add_frame(Frame::with_content("APIC", Content::Picture(picture)));
    }
    rebuilt
}

/// End of the audio region once trailing ID3v1 / enhanced blocks are excluded.
fn audio_end(bytes: &[u8], audio_start: usize) -> usize {
    let mut end = bytes.len();
    if end >= audio_start + ID3V1_LEN && &bytes[end - ID3V1_LEN..end - ID3V1_LEN + 3] == b"TAG" {
        end -= ID3V1_LEN;
        if end >= audio_start + ID3V1_ENHANCED_LEN
            && &bytes[end - ID3V1_ENHANCED_LEN..end - ID3V1_ENHANCED_LEN + 4] == b"TAG+"
        {
            end -= ID3V1_ENHANCED_LEN;
        }
    }
    end
}

/// Duration from a Xing/Info or VBRI frame count, else a CBR estimate.
fn mpeg_duration(audio: &[u8]) -> Option<Duration> {
    let (pos, header) = mpeg::find_frame(audio, 0)?;
    let frame = &audio[pos..];

    if let Some(frames) = xing_frames(frame, &header).or_else(|| vbri_frames(frame)) {
        debug!("MP3 duration from VBR header: {} frames", frames);
        let samples = frames as u64 * header.samples_per_frame() as u64;
        return duration_from_units(samples as f64, header.sample_rate as f64);
    }

    if header.bitrate_kbps == 0 {
        return None;
    }
    let stream_len = (audio.len() - pos) as f64;
    duration_from_units(stream_len * 8.0, header.bitrate_kbps as f64 * 1000.0)
}

fn xing_frames(frame: &[u8], header: &FrameHeader) -> Option<u32> {
    let at = header.xing_offset();
    let marker = frame.get(at..at + 4)?;
    if marker != b"Xing" && marker != b"Info" {
        return None;
    }
    let flags = BigEndian::read_u32(frame.get(at + 4..at + 8)?);
    if flags & 0x01 == 0 {
        return None;
    }
    Some(BigEndian::read_u32(frame.get(at + 8..at + 12)?))
}

fn vbri_frames(frame: &[u8]) -> Option<u32> {
    // VBRI always sits 32 bytes after the 4-byte frame header.
    let at = 36;
    if frame.get(at..at + 4)? != b"VBRI" {
        return None;
    }
    Some(BigEndian::read_u32(frame.get(at + 14..at + 18)?))
}
