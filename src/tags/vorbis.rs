//! Vorbis comment lists and FLAC-style picture structures.
//!
//! Both the Ogg codec (comment header packet) and the FLAC codec
//! (VORBIS_COMMENT / PICTURE blocks) are built on these.

use super::genres::resolve_genre;
use super::util::{clean_text, parse_year, track_from_parts};
use super::{primary_index, FieldChanges, TagFields};
use crate::cover::CoverArt;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub(crate) const PICTURE_KEY: &str = "METADATA_BLOCK_PICTURE";
pub(crate) const FRONT_COVER: u32 = 3;

/// A parsed comment list. Entry order and key spelling are kept so an
/// untouched list serializes back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VorbisComments {
    pub vendor: String,
    pub entries: Vec<(String, String)>,
}

impl VorbisComments {
    /// Parse `vendor_len vendor count (len key=value)*` (all little-endian).
    /// Returns the list and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), String> {
        let mut cursor = Cursor::new(data);
        let vendor = read_string(&mut cursor, data.len(), "vendor string")?;
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| "truncated comment count".to_string())?;

        let mut entries = Vec::new();
        for i in 0..count {
            let entry = read_string(&mut cursor, data.len(), "comment")?;
            match entry.split_once('=') {
                Some((key, value)) => entries.push((key.to_string(), value.to_string())),
                None => return Err(format!("comment {} has no '=' separator", i)),
            }
        }
        Ok((Self { vendor, entries }, cursor.position() as usize))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string(&mut out, &self.vendor);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, value) in &self.entries {
            write_string(&mut out, &format!("{}={}", key, value));
        }
        out
    }

    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn first(&self, key: &str) -> Option<String> {
        self.values(key).find_map(clean_text)
    }

    /// Replace every entry of `key` with `values`, keeping the position of
    /// the first existing entry. New keys are appended.
    pub fn set(&mut self, key: &str, values: &[String]) {
        let position = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key));
        self.remove(key);
        let at = position.unwrap_or(self.entries.len()).min(self.entries.len());
        for (offset, value) in values.iter().enumerate() {
            self.entries
                .insert(at + offset, (key.to_string(), value.clone()));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    pub fn read_fields(&self) -> TagFields {
        let total = self.first("TRACKTOTAL").or_else(|| self.first("TOTALTRACKS"));
        TagFields {
            title: self.first("TITLE"),
            artists: self.values("ARTIST").filter_map(clean_text).collect(),
            album: self.first("ALBUM"),
            album_artist: self
                .first("ALBUMARTIST")
                .or_else(|| self.first("ALBUM ARTIST")),
            track: track_from_parts(self.first("TRACKNUMBER").as_deref(), total.as_deref()),
            year: self
                .first("DATE")
                .or_else(|| self.first("YEAR"))
                .and_then(|d| parse_year(&d)),
            genre: self.first("GENRE").map(|g| resolve_genre(&g)),
        }
    }

    pub fn apply_changes(&mut self, changes: &FieldChanges) {
        let fields = &changes.current;
        let one = |v: &Option<String>| v.iter().cloned().collect::<Vec<_>>();

        if changes.title {
            self.set("TITLE", &one(&fields.title));
        }
        if changes.artists {
            self.set("ARTIST", &fields.artists);
        }
        if changes.album {
            self.set("ALBUM", &one(&fields.album));
        }
        if changes.album_artist {
            self.remove("ALBUM ARTIST");
            self.set("ALBUMARTIST", &one(&fields.album_artist));
        }
        if changes.track {
            let number = fields.track.map(|t| t.number.to_string());
            let total = fields.track.and_then(|t| t.total).map(|t| t.to_string());
            self.set("TRACKNUMBER", &one(&number));
            self.remove("TOTALTRACKS");
            self.set("TRACKTOTAL", &one(&total));
        }
        if changes.year {
            self.remove("YEAR");
            self.set("DATE", &one(&fields.year.map(|y| y.to_string())));
        }
        if changes.genre {
            self.set("GENRE", &one(&fields.genre));
        }
    }

    /// Decodable picture entries as `(entry index, picture)`.
    fn pictures(&self) -> Vec<(usize, PictureBlock)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (k, _))| k.eq_ignore_ascii_case(PICTURE_KEY))
            .filter_map(|(i, (_, v))| {
                let raw = BASE64.decode(v.trim()).ok()?;
                PictureBlock::parse(&raw).ok().map(|p| (i, p))
            })
            .collect()
    }

    pub fn primary_picture(&self) -> Option<PictureBlock> {
        let mut pictures = self.pictures();
        let index = primary_index(pictures.iter().map(|(_, p)| p.is_front_cover()))?;
        Some(pictures.swap_remove(index).1)
    }

    /// Swap the primary METADATA_BLOCK_PICTURE entry in place, drop it when
    /// `cover` is `None`, or append one when none existed.
    pub fn replace_primary_picture(&mut self, cover: Option<&CoverArt>) {
        let pictures = self.pictures();
        let primary = primary_index(pictures.iter().map(|(_, p)| p.is_front_cover()))
            .map(|i| pictures[i].0);

        let encoded = cover.map(|c| BASE64.encode(PictureBlock::from_cover(c).to_bytes()));
        match (primary, encoded) {
            (Some(i), Some(value)) => self.entries[i].1 = value,
            (Some(i), None) => {
                self.entries.remove(i);
            }
            (None, Some(value)) => self.entries.push((PICTURE_KEY.to_string(), value)),
            (None, None) => {}
        }
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>, total: usize, what: &str) -> Result<String, String> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| format!("truncated {} length", what))? as usize;
    let remaining = total.saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(format!("{} length {} exceeds data ({} left)", what, len, remaining));
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| format!("truncated {}", what))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// The FLAC PICTURE structure (big-endian), also carried base64-encoded in
/// Vorbis comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PictureBlock {
    pub picture_type: u32,
    pub mime_type: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub colors: u32,
    pub data: Vec<u8>,
}

impl PictureBlock {
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        let mut pos = 0usize;
        let u32_at = |pos: &mut usize| -> Result<u32, String> {
            let bytes = data
                .get(*pos..*pos + 4)
                .ok_or_else(|| "truncated picture block".to_string())?;
            *pos += 4;
            Ok(BigEndian::read_u32(bytes))
        };

        let picture_type = u32_at(&mut pos)?;
        let mime_len = u32_at(&mut pos)? as usize;
        let mime_type = slice(data, &mut pos, mime_len)?;
        let desc_len = u32_at(&mut pos)? as usize;
        let description = slice(data, &mut pos, desc_len)?;
        let width = u32_at(&mut pos)?;
        let height = u32_at(&mut pos)?;
        let depth = u32_at(&mut pos)?;
        let colors = u32_at(&mut pos)?;
        let data_len = u32_at(&mut pos)? as usize;
        let image = slice(data, &mut pos, data_len)?;

        Ok(Self {
            picture_type,
            mime_type: String::from_utf8_lossy(mime_type).into_owned(),
            description: String::from_utf8_lossy(description).into_owned(),
            width,
            height,
            depth,
            colors,
            data: image.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.mime_type.len() + self.data.len());
        out.extend_from_slice(&self.picture_type.to_be_bytes());
        out.extend_from_slice(&(self.mime_type.len() as u32).to_be_bytes());
        out.extend_from_slice(self.mime_type.as_bytes());
        out.extend_from_slice(&(self.description.len() as u32).to_be_bytes());
        out.extend_from_slice(self.description.as_bytes());
        for value in [self.width, self.height, self.depth, self.colors] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn is_front_cover(&self) -> bool {
        self.picture_type == FRONT_COVER
    }

    pub fn from_cover(cover: &CoverArt) -> Self {
        let (width, height) = cover.dimensions().unwrap_or((0, 0));
        let depth = if cover.mime_type() == "image/png" { 32 } else { 24 };
        Self {
            picture_type: FRONT_COVER,
            mime_type: cover.mime_type().to_string(),
            description: String::new(),
            width,
            height,
            depth,
            colors: 0,
            data: cover.data().to_vec(),
        }
    }

    pub fn to_cover(&self) -> CoverArt {
        let cover = CoverArt::new(self.data.clone(), self.mime_type.clone());
        if self.width > 0 && self.height > 0 {
            cover.with_dimensions(self.width, self.height)
        } else {
            cover
        }
    }
}

fn slice<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], String> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| "picture block field exceeds block".to_string())?;
    let out = &data[*pos..end];
    *pos = end;
    Ok(out)
}
