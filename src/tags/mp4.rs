//! MP4 / M4A: iTunes-style items under `moov/udta/meta/ilst`.
//!
//! Writing rebuilds `moov`. Sibling atoms and unrecognized ilst items are
//! copied byte for byte, and `stco`/`co64` entries that point past the old
//! `moov` are shifted by the size difference.

use super::genres::{genre_name, resolve_genre};
use super::util::{clean_text, duration_from_units, parse_year};
use super::{
    FieldChanges, NativeTag, ParsedTags, TagCodec, TagError, TagFields, TagSet, TrackNumber,
};
use crate::cover::CoverArt;
use crate::format::AudioFormat;
use byteorder::{BigEndian, ByteOrder};
use std::ops::Range;
use std::time::Duration;
use tracing::debug;

const TITLE: [u8; 4] = *b"\xa9nam";
const ARTIST: [u8; 4] = *b"\xa9ART";
const ALBUM: [u8; 4] = *b"\xa9alb";
const ALBUM_ARTIST: [u8; 4] = *b"aART";
const TRACK: [u8; 4] = *b"trkn";
const DAY: [u8; 4] = *b"\xa9day";
const GENRE: [u8; 4] = *b"\xa9gen";
const GENRE_ID: [u8; 4] = *b"gnre";
const COVER: [u8; 4] = *b"covr";

const TYPE_IMPLICIT: u32 = 0;
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;
const TYPE_JPEG: u32 = 13;
const TYPE_PNG: u32 = 14;
const TYPE_BMP: u32 = 27;

/// Boxes on the path to the sample tables.
const SAMPLE_TABLE_PATH: [&[u8; 4]; 4] = [b"trak", b"mdia", b"minf", b"stbl"];

#[derive(Debug, Clone, Copy)]
struct Atom {
    kind: [u8; 4],
    start: usize,
    header_len: usize,
    end: usize,
}

impl Atom {
    fn body(&self) -> Range<usize> {
        self.start + self.header_len..self.end
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
struct DataAtom {
    type_code: u32,
    payload: Vec<u8>,
}

/// One ilst entry with its original bytes.
#[derive(Debug, Clone)]
struct IlstItem {
    kind: [u8; 4],
    values: Vec<DataAtom>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct Mp4State {
    moov: Range<usize>,
    items: Vec<IlstItem>,
}

pub struct Mp4Codec;

impl TagCodec for Mp4Codec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp4
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTags, TagError> {
        let fmt = AudioFormat::Mp4;
        let top = parse_atoms(bytes, 0, bytes.len()).map_err(|e| TagError::container(fmt, e))?;
        let moov = find(&top, b"moov").ok_or_else(|| TagError::container(fmt, "no moov atom"))?;
        let moov_children = children(bytes, &moov).map_err(|e| TagError::container(fmt, e))?;

        let duration =
            find(&moov_children, b"mvhd").and_then(|a| mvhd_duration(&bytes[a.body()]));

        let ilst = ilst_atom(bytes, &moov_children).map_err(|e| TagError::corrupt(fmt, e))?;
        let items = match ilst {
            Some(ilst) => parse_items(bytes, &ilst).map_err(|e| TagError::corrupt(fmt, e))?,
            None => Vec::new(),
        };

        let fields = read_fields(&items);
        let cover = first_value(&items, COVER).and_then(cover_from_data);
        debug!("MP4 ilst with {} items", items.len());

        let state = Mp4State {
            moov: moov.start..moov.end,
            items,
        };
        Ok(ParsedTags {
            fields,
            cover,
            duration,
            native: NativeTag::Mp4(state),
        })
    }

    fn encode(&self, tags: &TagSet) -> Result<Vec<u8>, TagError> {
        let fmt = AudioFormat::Mp4;
        let NativeTag::Mp4(state) = tags.native() else {
            return Err(TagError::unwritable(fmt, "tag set was not decoded from an MP4 file"));
        };
        if !tags.is_modified() {
            return Ok(tags.raw_bytes().to_vec());
        }
        let raw = tags.raw_bytes();

        let mut items = state.items.clone();
        apply_changes(&mut items, &FieldChanges::of(tags))?;
        if tags.cover_changed() {
            replace_cover(&mut items, tags.cover());
        }
        let ilst_body: Vec<u8> = items.iter().flat_map(|i| i.raw.iter().copied()).collect();

        let moov = Atom::at(raw, state.moov.start).map_err(|e| TagError::container(fmt, e))?;
        let mut new_moov =
            rebuild_moov(raw, &moov, &ilst_body).map_err(|e| TagError::container(fmt, e))?;

        let delta = new_moov.len() as i64 - moov.len() as i64;
        if delta != 0 && moov.end < raw.len() {
            let patched = shift_chunk_offsets(&mut new_moov, moov.end as u64, delta)?;
            debug!("MP4 moov size delta {}: shifted {} chunk offsets", delta, patched);
        }

        let mut out = Vec::with_capacity(raw.len() + new_moov.len());
        out.extend_from_slice(&raw[..moov.start]);
        out.extend_from_slice(&new_moov);
        out.extend_from_slice(&raw[moov.end..]);
        Ok(out)
    }
}

impl Atom {
    fn at(data: &[u8], pos: usize) -> Result<Atom, String> {
        let header = data
            .get(pos..pos + 8)
            .ok_or_else(|| format!("truncated atom header at offset {}", pos))?;
        let size32 = BigEndian::read_u32(&header[..4]);
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&header[4..8]);
        let (size, header_len) = match size32 {
            0 => (data.len() - pos, 8),
            1 => {
                let large = data
                    .get(pos + 8..pos + 16)
                    .ok_or_else(|| format!("truncated 64-bit atom size at offset {}", pos))?;
                (BigEndian::read_u64(large) as usize, 16)
            }
            n => (n as usize, 8),
        };
        Ok(Atom {
            kind,
            start: pos,
            header_len,
            end: pos.saturating_add(size),
        })
    }
}

fn parse_atoms(data: &[u8], start: usize, end: usize) -> Result<Vec<Atom>, String> {
    let mut atoms = Vec::new();
    let mut pos = start;
    while pos < end {
        // QuickTime pads some containers with a zero terminator.
        if end - pos < 8 && data[pos..end].iter().all(|b| *b == 0) {
            break;
        }
        let atom = Atom::at(&data[..end], pos)?;
        if atom.end < pos + atom.header_len || atom.end > end {
            return Err(format!(
                "atom '{}' at offset {} overruns its parent",
                String::from_utf8_lossy(&atom.kind),
                pos
            ));
        }
        atoms.push(atom);
        pos = atom.end;
    }
    Ok(atoms)
}

fn children(data: &[u8], atom: &Atom) -> Result<Vec<Atom>, String> {
    let body = atom.body();
    parse_atoms(data, body.start, body.end)
}

fn find(atoms: &[Atom], kind: &[u8; 4]) -> Option<Atom> {
    atoms.iter().find(|a| &a.kind == kind).copied()
}

/// Start of `meta`'s children: it is a full box in MP4 files but a plain
/// container in some QuickTime files.
fn meta_children_start(data: &[u8], meta: &Atom) -> usize {
    let body = meta.body();
    match data.get(body.start + 4..body.start + 8) {
        Some(kind) if kind == b"hdlr" => body.start,
        _ => (body.start + 4).min(body.end),
    }
}

fn ilst_atom(data: &[u8], moov_children: &[Atom]) -> Result<Option<Atom>, String> {
    let Some(udta) = find(moov_children, b"udta") else {
        return Ok(None);
    };
    let Some(meta) = find(&children(data, &udta)?, b"meta") else {
        return Ok(None);
    };
    let start = meta_children_start(data, &meta);
    Ok(find(&parse_atoms(data, start, meta.end)?, b"ilst"))
}

fn parse_items(data: &[u8], ilst: &Atom) -> Result<Vec<IlstItem>, String> {
    let mut items = Vec::new();
    for atom in children(data, ilst)? {
        let mut values = Vec::new();
        for child in children(data, &atom)? {
            if &child.kind != b"data" {
                continue;
            }
            let body = &data[child.body()];
            if body.len() < 8 {
                return Err("truncated data atom".to_string());
            }
            values.push(DataAtom {
                type_code: BigEndian::read_u32(&body[..4]) & 0x00FF_FFFF,
                payload: body[8..].to_vec(),
            });
        }
        items.push(IlstItem {
            kind: atom.kind,
            values,
            raw: data[atom.start..atom.end].to_vec(),
        });
    }
    Ok(items)
}

fn mvhd_duration(body: &[u8]) -> Option<Duration> {
    // All-ones duration means unknown.
    let (timescale, duration) = match body.first()? {
        0 => {
            let duration = BigEndian::read_u32(body.get(16..20)?);
            if duration == u32::MAX {
                return None;
            }
            (BigEndian::read_u32(body.get(12..16)?), duration as u64)
        }
        1 => {
            let duration = BigEndian::read_u64(body.get(24..32)?);
            if duration == u64::MAX {
                return None;
            }
            (BigEndian::read_u32(body.get(20..24)?), duration)
        }
        _ => return None,
    };
    duration_from_units(duration as f64, timescale as f64)
}

fn first_value(items: &[IlstItem], kind: [u8; 4]) -> Option<&DataAtom> {
    items
        .iter()
        .filter(|i| i.kind == kind)
        .flat_map(|i| i.values.iter())
        .next()
}

fn data_text(value: &DataAtom) -> Option<String> {
    match value.type_code {
        TYPE_UTF16 => {
            let units: Vec<u16> = value
                .payload
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            clean_text(&String::from_utf16_lossy(&units))
        }
        _ => clean_text(&String::from_utf8_lossy(&value.payload)),
    }
}

fn text_of(items: &[IlstItem], kind: [u8; 4]) -> Option<String> {
    first_value(items, kind).and_then(data_text)
}

fn read_fields(items: &[IlstItem]) -> TagFields {
    let artists = items
        .iter()
        .filter(|i| i.kind == ARTIST)
        .flat_map(|i| i.values.iter())
        .filter_map(data_text)
        .collect();

    let track = first_value(items, TRACK).and_then(|v| {
        let p = &v.payload;
        if p.len() < 6 {
            return None;
        }
        let number = BigEndian::read_u16(&p[2..4]) as u32;
        let total = BigEndian::read_u16(&p[4..6]) as u32;
        (number > 0).then(|| TrackNumber::new(number, (total > 0).then_some(total)))
    });

    let genre = text_of(items, GENRE).map(|g| resolve_genre(&g)).or_else(|| {
        let value = first_value(items, GENRE_ID)?;
        let id = BigEndian::read_u16(value.payload.get(..2)?) as usize;
        // gnre stores the ID3v1 index plus one
        genre_name(id.checked_sub(1)?).map(str::to_string)
    });

    TagFields {
        title: text_of(items, TITLE),
        artists,
        album: text_of(items, ALBUM),
        album_artist: text_of(items, ALBUM_ARTIST),
        track,
        year: text_of(items, DAY).and_then(|d| parse_year(&d)),
        genre,
    }
}

fn cover_from_data(value: &DataAtom) -> Option<CoverArt> {
    if value.payload.is_empty() {
        return None;
    }
    let mime = match value.type_code {
        TYPE_JPEG => "image/jpeg",
        TYPE_PNG => "image/png",
        TYPE_BMP => "image/bmp",
        _ => "application/octet-stream",
    };
    Some(CoverArt::new(value.payload.clone(), mime))
}

fn make_atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    match u32::try_from(body.len() + 8) {
        Ok(size) => {
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(kind);
        }
        Err(_) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(kind);
            out.extend_from_slice(&((body.len() + 16) as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(body);
    out
}

fn data_atom(type_code: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 8);
    body.extend_from_slice(&type_code.to_be_bytes());
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(payload);
    make_atom(b"data", &body)
}

fn make_item(kind: [u8; 4], values: Vec<DataAtom>) -> IlstItem {
    let body: Vec<u8> = values
        .iter()
        .flat_map(|v| data_atom(v.type_code, &v.payload))
        .collect();
    IlstItem {
        kind,
        raw: make_atom(&kind, &body),
        values,
    }
}

fn text_item(kind: [u8; 4], values: &[String]) -> Option<IlstItem> {
    if values.is_empty() {
        return None;
    }
    let values = values
        .iter()
        .map(|v| DataAtom {
            type_code: TYPE_UTF8,
            payload: v.as_bytes().to_vec(),
        })
        .collect();
    Some(make_item(kind, values))
}

/// Replace every item of `kind` with `item`, at the position of the first
/// existing one (appending when there was none).
fn set_item(items: &mut Vec<IlstItem>, kind: [u8; 4], item: Option<IlstItem>) {
    let position = items.iter().position(|i| i.kind == kind);
    items.retain(|i| i.kind != kind);
    if let Some(item) = item {
        let at = position.unwrap_or(items.len()).min(items.len());
        items.insert(at, item);
    }
}

fn apply_changes(items: &mut Vec<IlstItem>, changes: &FieldChanges) -> Result<(), TagError> {
    let fields = &changes.current;
    let one = |v: &Option<String>| v.iter().cloned().collect::<Vec<_>>();

    if changes.title {
        set_item(items, TITLE, text_item(TITLE, &one(&fields.title)));
    }
    if changes.artists {
        set_item(items, ARTIST, text_item(ARTIST, &fields.artists));
    }
    if changes.album {
        set_item(items, ALBUM, text_item(ALBUM, &one(&fields.album)));
    }
    if changes.album_artist {
        set_item(
            items,
            ALBUM_ARTIST,
            text_item(ALBUM_ARTIST, &one(&fields.album_artist)),
        );
    }
    if changes.track {
        let item = fields.track.map(trkn_item).transpose()?;
        set_item(items, TRACK, item);
    }
    if changes.year {
        let year = fields.year.map(|y| y.to_string());
        set_item(items, DAY, text_item(DAY, &one(&year)));
    }
    if changes.genre {
        set_item(items, GENRE_ID, None);
        set_item(items, GENRE, text_item(GENRE, &one(&fields.genre)));
    }
    Ok(())
}

/// `trkn` holds 16-bit number and total.
fn trkn_item(track: TrackNumber) -> Result<IlstItem, TagError> {
    let narrow = |value: u32, what: &str| {
        u16::try_from(value).map_err(|_| {
            TagError::unwritable(
                AudioFormat::Mp4,
                format!("track {} {} does not fit trkn", what, value),
            )
        })
    };
    let number = narrow(track.number, "number")?;
    let total = narrow(track.total.unwrap_or(0), "total")?;
    let mut payload = vec![0u8; 8];
    BigEndian::write_u16(&mut payload[2..4], number);
    BigEndian::write_u16(&mut payload[4..6], total);
    Ok(make_item(
        TRACK,
        vec![DataAtom {
            type_code: TYPE_IMPLICIT,
            payload,
        }],
    ))
}

/// Swap the first `covr` image; additional images in the item stay.
fn replace_cover(items: &mut Vec<IlstItem>, cover: Option<&CoverArt>) {
    let mut values: Vec<DataAtom> = items
        .iter()
        .filter(|i| i.kind == COVER)
        .flat_map(|i| i.values.iter().cloned())
        .collect();
    if !values.is_empty() {
        values.remove(0);
    }
    if let Some(cover) = cover {
        let type_code = match cover.mime_type() {
            "image/png" => TYPE_PNG,
            "image/bmp" => TYPE_BMP,
            _ => TYPE_JPEG,
        };
        values.insert(
            0,
            DataAtom {
                type_code,
                payload: cover.data().to_vec(),
            },
        );
    }
    let item = (!values.is_empty()).then(|| make_item(COVER, values));
    set_item(items, COVER, item);
}

fn rebuild_moov(data: &[u8], moov: &Atom, ilst_body: &[u8]) -> Result<Vec<u8>, String> {
    let mut body = Vec::with_capacity(moov.len() + ilst_body.len());
    let mut udta_done = false;
    for child in children(data, moov)? {
        if &child.kind == b"udta" && !udta_done {
            body.extend_from_slice(&rebuild_udta(data, Some(&child), ilst_body)?);
            udta_done = true;
        } else {
            body.extend_from_slice(&data[child.start..child.end]);
        }
    }
    if !udta_done {
        body.extend_from_slice(&rebuild_udta(data, None, ilst_body)?);
    }
    Ok(make_atom(b"moov", &body))
}

fn rebuild_udta(data: &[u8], udta: Option<&Atom>, ilst_body: &[u8]) -> Result<Vec<u8>, String> {
    let mut body = Vec::new();
    let mut meta_done = false;
    if let Some(udta) = udta {
        for child in children(data, udta)? {
            if &child.kind == b"meta" && !meta_done {
                body.extend_from_slice(&rebuild_meta(data, Some(&child), ilst_body)?);
                meta_done = true;
            } else {
                body.extend_from_slice(&data[child.start..child.end]);
            }
        }
    }
    if !meta_done {
        body.extend_from_slice(&rebuild_meta(data, None, ilst_body)?);
    }
    Ok(make_atom(b"udta", &body))
}

fn rebuild_meta(data: &[u8], meta: Option<&Atom>, ilst_body: &[u8]) -> Result<Vec<u8>, String> {
    let mut body = Vec::new();
    let Some(meta) = meta else {
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&mdir_handler());
        body.extend_from_slice(&make_atom(b"ilst", ilst_body));
        return Ok(make_atom(b"meta", &body));
    };

    let children_start = meta_children_start(data, meta);
    body.extend_from_slice(&data[meta.body().start..children_start]);
    let kids = parse_atoms(data, children_start, meta.end)?;
    if find(&kids, b"hdlr").is_none() {
        body.extend_from_slice(&mdir_handler());
    }
    let mut ilst_done = false;
    for child in kids {
        if &child.kind == b"ilst" && !ilst_done {
            body.extend_from_slice(&make_atom(b"ilst", ilst_body));
            ilst_done = true;
        } else {
            body.extend_from_slice(&data[child.start..child.end]);
        }
    }
    if !ilst_done {
        body.extend_from_slice(&make_atom(b"ilst", ilst_body));
    }
    Ok(make_atom(b"meta", &body))
}

fn mdir_handler() -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(b"mdir");
    body.extend_from_slice(b"appl");
    body.extend_from_slice(&[0u8; 9]);
    make_atom(b"hdlr", &body)
}

/// Shift every chunk offset at or past `old_moov_end`. Returns how many
/// entries changed.
fn shift_chunk_offsets(moov: &mut [u8], old_moov_end: u64, delta: i64) -> Result<usize, TagError> {
    let fmt = AudioFormat::Mp4;
    let root = Atom::at(moov, 0).map_err(|e| TagError::container(fmt, e))?;
    let mut tables = Vec::new();
    collect_chunk_tables(moov, &root, 0, &mut tables).map_err(|e| TagError::container(fmt, e))?;

    let mut patched = 0;
    for table in tables {
        let body = table.body();
        let wide = &table.kind == b"co64";
        let entry_len = if wide { 8 } else { 4 };
        let count = BigEndian::read_u32(
            moov.get(body.start + 4..body.start + 8)
                .ok_or_else(|| TagError::container(fmt, "truncated chunk offset table"))?,
        ) as usize;
        let entries_start = body.start + 8;
        if entries_start + count * entry_len > body.end {
            return Err(TagError::container(fmt, "chunk offset table overruns its atom"));
        }

        for i in 0..count {
            let at = entries_start + i * entry_len;
            let entry = &mut moov[at..at + entry_len];
            let offset = if wide {
                BigEndian::read_u64(entry)
            } else {
                BigEndian::read_u32(entry) as u64
            };
            if offset < old_moov_end {
                continue;
            }
            let shifted = (offset as i64 + delta) as u64;
            if wide {
                BigEndian::write_u64(entry, shifted);
            } else {
                let narrow = u32::try_from(shifted).map_err(|_| {
                    TagError::unwritable(fmt, "32-bit chunk offset would overflow")
                })?;
                BigEndian::write_u32(entry, narrow);
            }
            patched += 1;
        }
    }
    Ok(patched)
}

fn collect_chunk_tables(
    data: &[u8],
    parent: &Atom,
    depth: usize,
    out: &mut Vec<Atom>,
) -> Result<(), String> {
    for child in children(data, parent)? {
        if &child.kind == b"stco" || &child.kind == b"co64" {
            out.push(child);
        } else if depth < SAMPLE_TABLE_PATH.len() && &child.kind == SAMPLE_TABLE_PATH[depth] {
            collect_chunk_tables(data, &child, depth + 1, out)?;
        }
    }
    Ok(())
}
