//! Ogg Vorbis / Ogg Opus: the comment header packet of the first logical stream.
//!
//! On write the header packets after the identification page are
//! re-paginated, later pages of the same stream are renumbered and every
//! rewritten page gets a fresh CRC. Audio payloads are never touched.

use super::util::duration_from_units;
use super::vorbis::VorbisComments;
use super::{FieldChanges, NativeTag, ParsedTags, TagCodec, TagError, TagSet};
use crate::format::AudioFormat;
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;
use tracing::debug;

const PAGE_HEADER_LEN: usize = 27;
const MAX_SEGMENTS: usize = 255;
const FLAG_CONTINUED: u8 = 0x01;
const OPUS_RATE: u64 = 48_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OggFlavour {
    Vorbis,
    Opus,
}

impl OggFlavour {
    fn ident_magic(&self) -> &'static [u8] {
        match self {
            OggFlavour::Vorbis => b"\x01vorbis",
            OggFlavour::Opus => b"OpusHead",
        }
    }

    fn comment_magic(&self) -> &'static [u8] {
        match self {
            OggFlavour::Vorbis => b"\x03vorbis",
            OggFlavour::Opus => b"OpusTags",
        }
    }

    /// Identification + comment (+ setup for Vorbis).
    fn header_packets(&self) -> usize {
        match self {
            OggFlavour::Vorbis => 3,
            OggFlavour::Opus => 2,
        }
    }

    fn format(&self) -> AudioFormat {
        match self {
            OggFlavour::Vorbis => AudioFormat::Ogg,
            OggFlavour::Opus => AudioFormat::Opus,
        }
    }
}

pub struct OggCodec {
    flavour: OggFlavour,
}

impl OggCodec {
    pub const fn vorbis() -> Self {
        Self {
            flavour: OggFlavour::Vorbis,
        }
    }

    pub const fn opus() -> Self {
        Self {
            flavour: OggFlavour::Opus,
        }
    }

    pub fn flavour(&self) -> OggFlavour {
        self.flavour
    }
}

/// Location and header fields of one page inside the raw file.
#[derive(Debug, Clone)]
pub(crate) struct PageInfo {
    offset: usize,
    header_type: u8,
    granule: i64,
    serial: u32,
    sequence: u32,
    lacing: Vec<u8>,
    body_start: usize,
    body_len: usize,
}

impl PageInfo {
    fn end(&self) -> usize {
        self.body_start + self.body_len
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OggState {
    serial: u32,
    pages: Vec<PageInfo>,
    /// Pages after the first one that carry header packets of the stream.
    header_pages: Vec<usize>,
    /// Header packets after the identification packet (comment first).
    trailing_headers: Vec<Vec<u8>>,
    comments: VorbisComments,
    /// Bytes after the comment list: the Vorbis framing bit or Opus padding.
    comment_tail: Vec<u8>,
    /// Set when the header layout can't be re-paginated safely.
    layout_problem: Option<String>,
}

impl TagCodec for OggCodec {
    fn format(&self) -> AudioFormat {
        self.flavour.format()
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTags, TagError> {
        let format = self.format();
        let pages = parse_pages(bytes).map_err(|e| TagError::container(format, e))?;
        let first = pages
            .first()
            .ok_or_else(|| TagError::container(format, "no Ogg pages"))?;
        let serial = first.serial;

        let headers = collect_header_packets(bytes, &pages, serial, self.flavour.header_packets())
            .map_err(|e| TagError::container(format, e))?;

        let ident = &headers.packets[0];
        if !ident.starts_with(self.flavour.ident_magic()) {
            return Err(TagError::container(
                format,
                "first packet is not the expected identification header",
            ));
        }

        let comment_packet = &headers.packets[1];
        let magic = self.flavour.comment_magic();
        let body = comment_packet
            .strip_prefix(magic)
            .ok_or_else(|| TagError::corrupt(format, "second packet is not a comment header"))?;
        let (comments, consumed) =
            VorbisComments::parse(body).map_err(|e| TagError::corrupt(format, e))?;
        let comment_tail = body[consumed..].to_vec();

        let fields = comments.read_fields();
        let cover = comments.primary_picture().map(|p| p.to_cover());
        let duration = stream_duration(self.flavour, ident, &pages, serial);

        let state = OggState {
            serial,
            header_pages: headers.page_indices,
            trailing_headers: headers.packets[1..].to_vec(),
            comments,
            comment_tail,
            layout_problem: headers.layout_problem,
            pages,
        };
        Ok(ParsedTags {
            fields,
            cover,
            duration,
            native: NativeTag::Ogg(state),
        })
    }

    fn encode(&self, tags: &TagSet) -> Result<Vec<u8>, TagError> {
        let format = self.format();
        let NativeTag::Ogg(state) = tags.native() else {
            return Err(TagError::unwritable(
                format,
                "tag set was not decoded from an Ogg file",
            ));
        };
        if !tags.is_modified() {
            return Ok(tags.raw_bytes().to_vec());
        }
        if let Some(problem) = &state.layout_problem {
            return Err(TagError::unwritable(format, problem.clone()));
        }

        let mut comments = state.comments.clone();
        comments.apply_changes(&FieldChanges::of(tags));
        if tags.cover_changed() {
            comments.replace_primary_picture(tags.cover());
        }

        let mut comment_packet = self.flavour.comment_magic().to_vec();
        comment_packet.extend_from_slice(&comments.to_bytes());
        if state.comment_tail.is_empty() && self.flavour == OggFlavour::Vorbis {
            comment_packet.push(0x01);
        } else {
            comment_packet.extend_from_slice(&state.comment_tail);
        }

        let mut packets = vec![comment_packet];
        packets.extend(state.trailing_headers[1..].iter().cloned());

        let raw = tags.raw_bytes();
        let first_sequence = state.pages[0].sequence.wrapping_add(1);
        let header_pages = paginate(&packets, state.serial, first_sequence);
        let delta = header_pages.len() as i64 - state.header_pages.len() as i64;
        debug!(
            "Ogg header pages: {} -> {} (serial {:08x})",
            state.header_pages.len(),
            header_pages.len(),
            state.serial
        );

        let mut out = Vec::with_capacity(raw.len() + 1024);
        let mut headers_written = false;
        let last_header_page = state.header_pages.last().copied().unwrap_or(0);

        for (index, page) in state.pages.iter().enumerate() {
            if index > 0 && state.header_pages.contains(&index) {
                if !headers_written {
                    for header_page in &header_pages {
                        out.extend_from_slice(header_page);
                    }
                    headers_written = true;
                }
                continue;
            }
            if page.serial == state.serial && index > last_header_page && delta != 0 {
                let sequence = (page.sequence as i64 + delta) as u32;
                out.extend_from_slice(&renumber_page(raw, page, sequence));
            } else {
                out.extend_from_slice(&raw[page.offset..page.end()]);
            }
        }
        Ok(out)
    }
}

fn parse_pages(data: &[u8]) -> Result<Vec<PageInfo>, String> {
    let mut pages = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let header = data
            .get(pos..pos + PAGE_HEADER_LEN)
            .ok_or_else(|| format!("truncated page header at offset {}", pos))?;
        if &header[..4] != b"OggS" {
            return Err(format!("missing capture pattern at offset {}", pos));
        }
        if header[4] != 0 {
            return Err(format!("unsupported page version {}", header[4]));
        }
        let segment_count = header[26] as usize;
        let lacing = data
            .get(pos + PAGE_HEADER_LEN..pos + PAGE_HEADER_LEN + segment_count)
            .ok_or_else(|| format!("truncated lacing table at offset {}", pos))?
            .to_vec();
        let body_start = pos + PAGE_HEADER_LEN + segment_count;
        let body_len: usize = lacing.iter().map(|v| *v as usize).sum();
        if body_start + body_len > data.len() {
            return Err(format!("truncated page body at offset {}", pos));
        }
        pages.push(PageInfo {
            offset: pos,
            header_type: header[5],
            granule: LittleEndian::read_i64(&header[6..14]),
            serial: LittleEndian::read_u32(&header[14..18]),
            sequence: LittleEndian::read_u32(&header[18..22]),
            lacing,
            body_start,
            body_len,
        });
        pos = body_start + body_len;
    }
    Ok(pages)
}

struct HeaderPackets {
    packets: Vec<Vec<u8>>,
    page_indices: Vec<usize>,
    layout_problem: Option<String>,
}

fn collect_header_packets(
    data: &[u8],
    pages: &[PageInfo],
    serial: u32,
    count: usize,
) -> Result<HeaderPackets, String> {
    let mut packets = Vec::with_capacity(count);
    let mut page_indices = Vec::new();
    let mut current = Vec::new();
    let mut layout_problem = None;

    'pages: for (index, page) in pages.iter().enumerate() {
        if page.serial != serial {
            continue;
        }
        if index > 0 {
            page_indices.push(index);
        }
        let mut body_pos = page.body_start;
        for (segment, lace) in page.lacing.iter().enumerate() {
            let lace = *lace as usize;
            current.extend_from_slice(&data[body_pos..body_pos + lace]);
            body_pos += lace;
            if lace < 255 {
                packets.push(std::mem::take(&mut current));
                let more_on_page = segment + 1 < page.lacing.len();
                if packets.len() == 1 && (index != 0 || more_on_page) {
                    layout_problem =
                        Some("identification packet does not fill the first page".to_string());
                }
                if packets.len() == count {
                    if more_on_page {
                        layout_problem =
                            Some("audio data shares a page with header packets".to_string());
                    }
                    break 'pages;
                }
            }
        }
    }

    if packets.len() < count {
        return Err(format!(
            "stream ends after {} of {} header packets",
            packets.len(),
            count
        ));
    }
    Ok(HeaderPackets {
        packets,
        page_indices,
        layout_problem,
    })
}

/// Lay packets out into pages of at most 255 segments, starting at `sequence`.
fn paginate(packets: &[Vec<u8>], serial: u32, sequence: u32) -> Vec<Vec<u8>> {
    // (lacing value, body bytes) per segment, across all packets
    let mut segments: Vec<(u8, &[u8])> = Vec::new();
    for packet in packets {
        let mut rest = packet.as_slice();
        loop {
            let take = rest.len().min(255);
            let (chunk, tail) = rest.split_at(take);
            segments.push((take as u8, chunk));
            rest = tail;
            if take < 255 {
                break;
            }
        }
    }

    let mut pages = Vec::new();
    let mut continued = false;
    for (i, chunk) in segments.chunks(MAX_SEGMENTS).enumerate() {
        let lacing: Vec<u8> = chunk.iter().map(|(v, _)| *v).collect();
        let body: Vec<u8> = chunk.iter().flat_map(|(_, b)| b.iter().copied()).collect();
        let finishes_packet = lacing.last().map_or(false, |v| *v < 255);
        let granule = if finishes_packet { 0 } else { -1 };
        let header_type = if continued { FLAG_CONTINUED } else { 0 };
        pages.push(build_page(
            header_type,
            granule,
            serial,
            sequence.wrapping_add(i as u32),
            &lacing,
            &body,
        ));
        continued = !finishes_packet;
    }
    pages
}

fn renumber_page(raw: &[u8], page: &PageInfo, sequence: u32) -> Vec<u8> {
    build_page(
        page.header_type,
        page.granule,
        page.serial,
        sequence,
        &page.lacing,
        &raw[page.body_start..page.end()],
    )
}

fn build_page(
    header_type: u8,
    granule: i64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    body: &[u8],
) -> Vec<u8> {
    let mut page = Vec::with_capacity(PAGE_HEADER_LEN + lacing.len() + body.len());
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(lacing);
    page.extend_from_slice(body);

    let crc = crc32(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Ogg page checksum: CRC-32, polynomial 0x04c11db7, zero init, unreflected.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for byte in data {
        crc ^= (*byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04c1_1db7
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn stream_duration(
    flavour: OggFlavour,
    ident: &[u8],
    pages: &[PageInfo],
    serial: u32,
) -> Option<Duration> {
    let granule = pages
        .iter()
        .rev()
        .filter(|p| p.serial == serial)
        .map(|p| p.granule)
        .find(|g| *g >= 0)?;

    match flavour {
        OggFlavour::Vorbis => {
            let rate = LittleEndian::read_u32(ident.get(12..16)?);
            if rate == 0 {
                return None;
            }
            duration_from_units(granule as f64, rate as f64)
        }
        OggFlavour::Opus => {
            let pre_skip = LittleEndian::read_u16(ident.get(10..12)?) as u64;
            let samples = (granule as u64).saturating_sub(pre_skip);
            duration_from_units(samples as f64, OPUS_RATE as f64)
        }
    }
}
