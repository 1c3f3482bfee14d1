//! FLAC metadata blocks: VORBIS_COMMENT and PICTURE.
//!
//! STREAMINFO, APPLICATION, SEEKTABLE, CUESHEET and unknown blocks are
//! copied byte for byte. PADDING shrinks or grows to keep the audio
//! offset fixed whenever the new metadata fits.

use super::util::duration_from_units;
use super::vorbis::{PictureBlock, VorbisComments};
use super::{primary_index, FieldChanges, NativeTag, ParsedTags, TagCodec, TagError, TagSet};
use crate::format::{id3v2_tag_len, AudioFormat};
use byteorder::{BigEndian, ByteOrder};
use std::time::Duration;
use tracing::debug;

const MARKER: &[u8; 4] = b"fLaC";
const BLOCK_HEADER_LEN: usize = 4;
const MAX_BLOCK_LEN: usize = 0xFF_FFFF;
const LAST_BLOCK: u8 = 0x80;

const STREAMINFO: u8 = 0;
const PADDING: u8 = 1;
const VORBIS_COMMENT: u8 = 4;
const PICTURE: u8 = 6;

#[derive(Debug, Clone)]
struct BlockInfo {
    block_type: u8,
    /// Offset of the block body inside the raw file.
    start: usize,
    len: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct FlacState {
    /// Offset of the `fLaC` marker; non-zero when an ID3v2 tag precedes it.
    marker_at: usize,
    blocks: Vec<BlockInfo>,
    audio_start: usize,
    comments: Option<VorbisComments>,
    /// Parsed PICTURE blocks as `(block index, picture)`.
    pictures: Vec<(usize, PictureBlock)>,
}

pub struct FlacCodec;

impl TagCodec for FlacCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Flac
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTags, TagError> {
        let fmt = AudioFormat::Flac;
        let marker_at = id3v2_tag_len(bytes).unwrap_or(0);
        if bytes.get(marker_at..marker_at + 4) != Some(MARKER.as_slice()) {
            return Err(TagError::container(fmt, "missing fLaC marker"));
        }

        let (blocks, audio_start) =
            parse_blocks(bytes, marker_at + 4).map_err(|e| TagError::container(fmt, e))?;
        let streaminfo = match blocks.first() {
            Some(b) if b.block_type == STREAMINFO && b.len >= 18 => b,
            _ => return Err(TagError::container(fmt, "first block is not STREAMINFO")),
        };
        let duration = streaminfo_duration(&bytes[streaminfo.start..streaminfo.start + 18]);

        let mut comments = None;
        let mut pictures = Vec::new();
        for (index, block) in blocks.iter().enumerate() {
            let body = &bytes[block.start..block.start + block.len];
            match block.block_type {
                VORBIS_COMMENT if comments.is_none() => {
                    let (list, _) =
                        VorbisComments::parse(body).map_err(|e| TagError::corrupt(fmt, e))?;
                    comments = Some(list);
                }
                PICTURE => {
                    let picture = PictureBlock::parse(body)
                        .map_err(|e| TagError::corrupt(fmt, format!("PICTURE block: {}", e)))?;
                    pictures.push((index, picture));
                }
                _ => {}
            }
        }

        let fields = comments
            .as_ref()
            .map(|c| c.read_fields())
            .unwrap_or_default();
        let cover = primary_index(pictures.iter().map(|(_, p)| p.is_front_cover()))
            .map(|i| pictures[i].1.to_cover());

        let state = FlacState {
            marker_at,
            blocks,
            audio_start,
            comments,
            pictures,
        };
        Ok(ParsedTags {
            fields,
            cover,
            duration,
            native: NativeTag::Flac(state),
        })
    }

    fn encode(&self, tags: &TagSet) -> Result<Vec<u8>, TagError> {
        let fmt = AudioFormat::Flac;
        let NativeTag::Flac(state) = tags.native() else {
            return Err(TagError::unwritable(fmt, "tag set was not decoded from a FLAC file"));
        };
        if !tags.is_modified() {
            return Ok(tags.raw_bytes().to_vec());
        }
        let raw = tags.raw_bytes();

        let changes = FieldChanges::of(tags);
        let comment_body = if changes.any() || state.comments.is_some() {
            let mut list = state.comments.clone().unwrap_or_else(|| VorbisComments {
                vendor: "tagtrack".to_string(),
                entries: Vec::new(),
            });
            list.apply_changes(&changes);
            Some(list.to_bytes())
        } else {
            None
        };

        let primary_picture = primary_index(state.pictures.iter().map(|(_, p)| p.is_front_cover()))
            .map(|i| state.pictures[i].0);
        let new_picture = tags
            .cover()
            .filter(|_| tags.cover_changed())
            .map(|c| PictureBlock::from_cover(c).to_bytes());

        // (type, body) in output order, padding collected separately
        let mut blocks: Vec<(u8, Vec<u8>)> = Vec::with_capacity(state.blocks.len() + 2);
        let mut comment_written = false;
        let mut picture_written = false;
        let mut padding_len = None::<usize>;

        for (index, block) in state.blocks.iter().enumerate() {
            let body = &raw[block.start..block.start + block.len];
            match block.block_type {
                PADDING => {
                    *padding_len.get_or_insert(0) += BLOCK_HEADER_LEN + block.len;
                }
                VORBIS_COMMENT if !comment_written => {
                    if let Some(body) = &comment_body {
                        blocks.push((VORBIS_COMMENT, body.clone()));
                    }
                    comment_written = true;
                }
                PICTURE if tags.cover_changed() && Some(index) == primary_picture => {
                    if let Some(picture) = &new_picture {
                        blocks.push((PICTURE, picture.clone()));
                    }
                    picture_written = true;
                }
                other => blocks.push((other, body.to_vec())),
            }
            if index == 0 && !state.blocks.iter().any(|b| b.block_type == VORBIS_COMMENT) {
                if let Some(body) = &comment_body {
                    blocks.push((VORBIS_COMMENT, body.clone()));
                }
                comment_written = true;
            }
        }
        if !picture_written {
            if let Some(picture) = new_picture {
                blocks.push((PICTURE, picture));
            }
        }

        if let Some(available) = padding_len {
            let used: usize = blocks.iter().map(|(_, b)| BLOCK_HEADER_LEN + b.len()).sum();
            let old_used: usize = state
                .blocks
                .iter()
                .filter(|b| b.block_type != PADDING)
                .map(|b| BLOCK_HEADER_LEN + b.len)
                .sum();
            let budget = old_used + available;
            if used + BLOCK_HEADER_LEN <= budget {
                let len = budget - used - BLOCK_HEADER_LEN;
                debug!("FLAC padding {} -> {} bytes", available - BLOCK_HEADER_LEN, len);
                blocks.push((PADDING, vec![0u8; len]));
            } else if used != budget {
                debug!("FLAC metadata outgrew padding; audio offset moves");
                blocks.push((PADDING, vec![0u8; available - BLOCK_HEADER_LEN]));
            }
        }

        let mut out = Vec::with_capacity(raw.len() + 4096);
        out.extend_from_slice(&raw[..state.marker_at]);
        out.extend_from_slice(MARKER);
        let count = blocks.len();
        for (i, (block_type, body)) in blocks.iter().enumerate() {
            if body.len() > MAX_BLOCK_LEN {
                return Err(TagError::unwritable(
                    fmt,
                    format!("metadata block of {} bytes exceeds 16 MiB", body.len()),
                ));
            }
            let flag = if i + 1 == count { LAST_BLOCK } else { 0 };
            out.push(flag | block_type);
            let mut len = [0u8; 3];
            BigEndian::write_u24(&mut len, body.len() as u32);
            out.extend_from_slice(&len);
            out.extend_from_slice(body);
        }
        out.extend_from_slice(&raw[state.audio_start..]);
        Ok(out)
    }
}

fn parse_blocks(data: &[u8], mut pos: usize) -> Result<(Vec<BlockInfo>, usize), String> {
    let mut blocks = Vec::new();
    loop {
        let header = data
            .get(pos..pos + BLOCK_HEADER_LEN)
            .ok_or_else(|| format!("truncated block header at offset {}", pos))?;
        let last = header[0] & LAST_BLOCK != 0;
        let block_type = header[0] & 0x7F;
        if block_type == 0x7F {
            return Err(format!("invalid block type at offset {}", pos));
        }
        let len = BigEndian::read_u24(&header[1..4]) as usize;
        let start = pos + BLOCK_HEADER_LEN;
        if start + len > data.len() {
            return Err(format!("block at offset {} runs past end of file", pos));
        }
        blocks.push(BlockInfo {
            block_type,
            start,
            len,
        });
        pos = start + len;
        if last {
            return Ok((blocks, pos));
        }
    }
}

fn streaminfo_duration(info: &[u8]) -> Option<Duration> {
    let packed = BigEndian::read_u64(&info[10..18]);
    let sample_rate = packed >> 44;
    let total_samples = packed & 0xF_FFFF_FFFF;
    if sample_rate == 0 || total_samples == 0 {
        return None;
    }
    duration_from_units(total_samples as f64, sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaminfo(sample_rate: u32, total_samples: u64) -> Vec<u8> {
        let mut info = vec![0u8; 34];
        let packed = (sample_rate as u64) << 44 | (1u64 << 41) | (15u64 << 36) | total_samples;
        info[10..18].copy_from_slice(&packed.to_be_bytes());
        info
    }

    fn block(block_type: u8, last: bool, body: &[u8]) -> Vec<u8> {
        let mut out = vec![if last { LAST_BLOCK | block_type } else { block_type }];
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    fn flac_file(title: &str, padding: usize) -> Vec<u8> {
        let comments = VorbisComments {
            vendor: "reference libFLAC".to_string(),
            entries: vec![
                ("TITLE".to_string(), title.to_string()),
                ("CUSTOM".to_string(), "kept".to_string()),
            ],
        };
        let mut out = MARKER.to_vec();
        out.extend(block(STREAMINFO, false, &streaminfo(44_100, 441_000)));
        out.extend(block(2, false, b"appl-data"));
        out.extend(block(VORBIS_COMMENT, false, &comments.to_bytes()));
        out.extend(block(PADDING, true, &vec![0u8; padding]));
        out.extend_from_slice(&[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x00]);
        out
    }

    #[test]
    fn test_decode_fields_and_duration() {
        let tags = FlacCodec.decode(flac_file("Vienna", 64)).unwrap();
        assert_eq!(tags.fields.title.as_deref(), Some("Vienna"));
        assert_eq!(tags.duration(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_borrows_and_decode_keeps_the_buffer() {
        let file = flac_file("Vienna", 64);
        let parsed = FlacCodec.parse(&file).unwrap();
        assert_eq!(parsed.fields.title.as_deref(), Some("Vienna"));
        assert_eq!(parsed.duration, Some(Duration::from_secs(10)));

        let tags = FlacCodec.decode(file.clone()).unwrap();
        assert_eq!(tags.fields, parsed.fields.normalized());
        assert_eq!(tags.into_raw(), file);
    }

    #[test]
    fn test_padding_absorbs_growth() {
        let original = flac_file("Vienna", 256);
        let audio_offset = original.len() - 6;
        let mut tags = FlacCodec.decode(original).unwrap();
        tags.fields.title = Some("Vienna (Live at the Great American Music Hall)".to_string());

        let out = FlacCodec.encode(&tags).unwrap();
        assert_eq!(out.len() - 6, audio_offset);
        assert_eq!(&out[audio_offset..], &[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x00]);

        let reread = FlacCodec.decode(out).unwrap();
        let NativeTag::Flac(state) = reread.native() else {
            panic!("expected flac state");
        };
        let comments = state.comments.as_ref().unwrap();
        assert_eq!(comments.first("CUSTOM").as_deref(), Some("kept"));
        assert_eq!(state.blocks[1].block_type, 2);
    }

    #[test]
    fn test_growth_past_padding_moves_audio() {
        let mut tags = FlacCodec.decode(flac_file("x", 4)).unwrap();
        tags.fields.album = Some("A".repeat(200));
        let out = FlacCodec.encode(&tags).unwrap();
        let reread = FlacCodec.decode(out).unwrap();
        assert_eq!(reread.fields.album, tags.fields.album);
    }

    #[test]
    fn test_missing_streaminfo_is_corrupt() {
        let mut data = MARKER.to_vec();
        data.extend(block(PADDING, true, &[0u8; 8]));
        assert!(matches!(
            FlacCodec.decode(data),
            Err(TagError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_truncated_block_is_corrupt() {
        let mut data = flac_file("x", 8);
        data.truncate(20);
        assert!(FlacCodec.decode(data).is_err());
    }
}
