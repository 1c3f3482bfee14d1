//! In-memory builders for minimal, well-formed audio files.

use id3::{Tag, TagLike, Version};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use super::constants::*;

// ─── MP3 ─────────────────────────────────────────────────────────────────────

/// Silent MPEG-1 layer III frames, 128 kbps at 44.1 kHz.
pub fn mpeg_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(count * MPEG_FRAME_LEN);
    for _ in 0..count {
        let mut frame = vec![0u8; MPEG_FRAME_LEN];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
        data.extend_from_slice(&frame);
    }
    data
}

pub fn mp3_with_tag(tag: &Tag) -> Vec<u8> {
    let mut out = Vec::new();
    tag.write_to(&mut out, Version::Id3v24)
        .expect("write id3 tag");
    out.extend_from_slice(&mpeg_frames(8));
    out
}

/// Fully tagged MP3 with one frame the tag model doesn't know (TPUB).
pub fn sample_mp3() -> Vec<u8> {
    let mut tag = Tag::new();
    tag.set_text("TIT2", TITLE);
    tag.set_text("TPE1", ARTIST);
    tag.set_text("TALB", ALBUM);
    tag.set_text("TPE2", ALBUM_ARTIST);
    tag.set_text("TRCK", "2/10");
    tag.set_text("TDRC", "1973-11-02");
    tag.set_text("TCON", "(17)");
    tag.set_text("TPUB", VENDOR_VALUE);
    mp3_with_tag(&tag)
}

// ─── FLAC ────────────────────────────────────────────────────────────────────

pub fn vorbis_comment_list(vendor: &str, entries: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    out.extend_from_slice(vendor.as_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (key, value) in entries {
        let entry = format!("{}={}", key, value);
        out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        out.extend_from_slice(entry.as_bytes());
    }
    out
}

fn flac_block(block_type: u8, last: bool, body: &[u8]) -> Vec<u8> {
    let flag = if last { 0x80 } else { 0 };
    let mut out = vec![flag | block_type];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

fn streaminfo(sample_rate: u32, total_samples: u64) -> Vec<u8> {
    let mut info = vec![0u8; 34];
    let packed = (sample_rate as u64) << 44 | (1u64 << 41) | (15u64 << 36) | total_samples;
    info[10..18].copy_from_slice(&packed.to_be_bytes());
    info
}

/// Bytes that follow the metadata blocks of every FLAC fixture.
pub const FLAC_AUDIO: &[u8] = &[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x00, 0xAB, 0xCD];

/// STREAMINFO, APPLICATION, VORBIS_COMMENT and PADDING, then audio frames.
/// Ten seconds at 44.1 kHz.
pub fn sample_flac() -> Vec<u8> {
    let comments = vorbis_comment_list(
        "reference libFLAC 1.4.3",
        &[
            ("TITLE", TITLE),
            ("ARTIST", ARTIST),
            ("ALBUM", ALBUM),
            ("ALBUMARTIST", ALBUM_ARTIST),
            ("TRACKNUMBER", "2"),
            ("TRACKTOTAL", "10"),
            ("DATE", "1973-11-02"),
            ("GENRE", "Rock"),
            (VENDOR_KEY, VENDOR_VALUE),
        ],
    );
    let mut out = b"fLaC".to_vec();
    out.extend(flac_block(0, false, &streaminfo(44_100, 441_000)));
    out.extend(flac_block(2, false, FLAC_APPLICATION));
    out.extend(flac_block(4, false, &comments));
    out.extend(flac_block(1, true, &[0u8; 1024]));
    out.extend_from_slice(FLAC_AUDIO);
    out
}

pub const FLAC_APPLICATION: &[u8] = b"TEST\x01\x02\x03\x04application-payload";

// ─── Ogg ─────────────────────────────────────────────────────────────────────

/// Ogg page CRC (polynomial 0x04c11db7, no reflection, zero init), table driven.
pub fn ogg_crc(data: &[u8]) -> u32 {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut r = (i as u32) << 24;
        for _ in 0..8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
        }
        *slot = r;
    }
    data.iter().fold(0u32, |crc, byte| {
        (crc << 8) ^ table[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// One Ogg page holding complete packets only.
pub fn ogg_page(header_type: u8, granule: i64, serial: u32, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut remaining = packet.len();
        while remaining >= 255 {
            lacing.push(255u8);
            remaining -= 255;
        }
        lacing.push(remaining as u8);
        body.extend_from_slice(packet);
    }
    assert!(lacing.len() <= 255, "fixture packets must fit one page");

    let mut page = b"OggS".to_vec();
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(&body);
    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Header fields of one page, read back for assertions.
#[derive(Debug, Clone)]
pub struct OggPageView {
    pub header_type: u8,
    pub granule: i64,
    pub serial: u32,
    pub sequence: u32,
    pub crc_ok: bool,
    pub body: Vec<u8>,
}

pub fn ogg_pages(data: &[u8]) -> Vec<OggPageView> {
    let mut pages = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        assert_eq!(&data[pos..pos + 4], b"OggS", "capture pattern at {}", pos);
        let segments = data[pos + 26] as usize;
        let lacing = &data[pos + 27..pos + 27 + segments];
        let body_len: usize = lacing.iter().map(|v| *v as usize).sum();
        let end = pos + 27 + segments + body_len;

        let mut page = data[pos..end].to_vec();
        let stored = u32::from_le_bytes([page[22], page[23], page[24], page[25]]);
        page[22..26].copy_from_slice(&[0u8; 4]);

        pages.push(OggPageView {
            header_type: data[pos + 5],
            granule: i64::from_le_bytes(data[pos + 6..pos + 14].try_into().unwrap()),
            serial: u32::from_le_bytes(data[pos + 14..pos + 18].try_into().unwrap()),
            sequence: u32::from_le_bytes(data[pos + 18..pos + 22].try_into().unwrap()),
            crc_ok: ogg_crc(&page) == stored,
            body: data[pos + 27 + segments..end].to_vec(),
        });
        pos = end;
    }
    pages
}

fn vorbis_ident() -> Vec<u8> {
    let mut ident = b"\x01vorbis".to_vec();
    ident.extend_from_slice(&0u32.to_le_bytes());
    ident.push(2);
    ident.extend_from_slice(&44_100u32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.extend_from_slice(&128_000i32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.push(0xB8);
    ident.push(0x01);
    ident
}

pub const OGG_SERIAL: u32 = 0x1234_5678;
pub const OGG_AUDIO_PACKET: &[u8] = &[0x3F, 0x80, 0x11, 0x22, 0x33];

/// Ogg Vorbis: ident page, comment + setup page, two audio pages.
/// 88200 samples at 44.1 kHz, two seconds.
pub fn sample_ogg(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut comment = b"\x03vorbis".to_vec();
    comment.extend_from_slice(&vorbis_comment_list("Xiph.Org libVorbis I 20200704", entries));
    comment.push(0x01);
    let setup = b"\x05vorbis-setup-codebooks".to_vec();

    let mut out = ogg_page(0x02, 0, OGG_SERIAL, 0, &[&vorbis_ident()]);
    out.extend(ogg_page(0, 0, OGG_SERIAL, 1, &[&comment, &setup]));
    out.extend(ogg_page(0, 44_100, OGG_SERIAL, 2, &[OGG_AUDIO_PACKET]));
    out.extend(ogg_page(0x04, 88_200, OGG_SERIAL, 3, &[OGG_AUDIO_PACKET]));
    out
}

pub fn default_ogg_entries() -> Vec<(&'static str, &'static str)> {
    vec![
        ("TITLE", TITLE),
        ("ARTIST", ARTIST),
        ("ALBUM", ALBUM),
        ("ALBUMARTIST", ALBUM_ARTIST),
        ("TRACKNUMBER", "2/10"),
        ("DATE", "1973"),
        ("GENRE", "Rock"),
        (VENDOR_KEY, VENDOR_VALUE),
    ]
}

/// Ogg Opus with 312 samples of pre-skip; one second of audio at 48 kHz.
pub fn sample_opus(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut head = b"OpusHead".to_vec();
    head.push(1);
    head.push(2);
    head.extend_from_slice(&312u16.to_le_bytes());
    head.extend_from_slice(&48_000u32.to_le_bytes());
    head.extend_from_slice(&[0, 0, 0]);

    let mut tags = b"OpusTags".to_vec();
    tags.extend_from_slice(&vorbis_comment_list("libopus 1.4", entries));

    let mut out = ogg_page(0x02, 0, OGG_SERIAL, 0, &[&head]);
    out.extend(ogg_page(0, 0, OGG_SERIAL, 1, &[&tags]));
    out.extend(ogg_page(0x04, 48_312, OGG_SERIAL, 2, &[OGG_AUDIO_PACKET]));
    out
}

// ─── MP4 ─────────────────────────────────────────────────────────────────────

pub fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn data_atom(type_code: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = type_code.to_be_bytes().to_vec();
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(payload);
    atom(b"data", &body)
}

fn text_item(kind: &[u8; 4], value: &str) -> Vec<u8> {
    atom(kind, &data_atom(1, value.as_bytes()))
}

/// Sample bytes in `mdat`, pointed at by the single `stco` entry.
pub const MP4_PAYLOAD: &[u8] = b"aac-sample-bytes-0123456789";

/// ftyp, moov (mvhd, trak with stco, udta/meta/ilst), then mdat.
/// The ilst carries a freeform `----` item the tag model doesn't know.
pub fn sample_m4a() -> Vec<u8> {
    let mut trkn = vec![0u8; 8];
    trkn[2..4].copy_from_slice(&2u16.to_be_bytes());
    trkn[4..6].copy_from_slice(&10u16.to_be_bytes());

    let mut ilst = Vec::new();
    ilst.extend(text_item(b"\xa9nam", TITLE));
    ilst.extend(text_item(b"\xa9ART", ARTIST));
    ilst.extend(text_item(b"\xa9alb", ALBUM));
    ilst.extend(text_item(b"aART", ALBUM_ARTIST));
    ilst.extend(atom(b"trkn", &data_atom(0, &trkn)));
    ilst.extend(text_item(b"\xa9day", "1973-11-02"));
    ilst.extend(text_item(b"\xa9gen", "Rock"));
    ilst.extend(mp4_freeform_item());

    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"mdir");
    hdlr.extend_from_slice(b"appl");
    hdlr.extend_from_slice(&[0u8; 9]);
    let mut meta = vec![0u8; 4];
    meta.extend(atom(b"hdlr", &hdlr));
    meta.extend(atom(b"ilst", &ilst));
    let udta = atom(b"udta", &atom(b"meta", &meta));

    let ftyp = atom(b"ftyp", b"M4A \x00\x00\x02\x00isomM4A ");
    let build_moov = |offset: u32| {
        let mut mvhd = vec![0u8; 100];
        mvhd[12..16].copy_from_slice(&1000u32.to_be_bytes());
        mvhd[16..20].copy_from_slice(&3000u32.to_be_bytes());
        let mut stco = vec![0u8; 4];
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&offset.to_be_bytes());
        let stbl = atom(b"stbl", &atom(b"stco", &stco));
        let trak = atom(b"trak", &atom(b"mdia", &atom(b"minf", &stbl)));

        let mut body = atom(b"mvhd", &mvhd);
        body.extend(trak);
        body.extend_from_slice(&udta);
        atom(b"moov", &body)
    };
    let moov_len = build_moov(0).len();
    let offset = (ftyp.len() + moov_len + 8) as u32;

    let mut file = ftyp;
    file.extend(build_moov(offset));
    file.extend(atom(b"mdat", MP4_PAYLOAD));
    file
}

pub fn mp4_freeform_item() -> Vec<u8> {
    let mut body = atom(b"mean", b"\x00\x00\x00\x00com.apple.iTunes");
    body.extend(atom(b"name", b"\x00\x00\x00\x00LABEL"));
    body.extend(data_atom(1, VENDOR_VALUE.as_bytes()));
    atom(b"----", &body)
}

/// Walks moov/trak/mdia/minf/stbl/stco and returns the first chunk offset.
pub fn mp4_first_chunk_offset(file: &[u8]) -> usize {
    fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> &'a [u8] {
        let mut pos = 0;
        while pos + 8 <= data.len() {
            let size = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            if &data[pos + 4..pos + 8] == kind {
                return &data[pos + 8..pos + size];
            }
            pos += size;
        }
        panic!("no {} atom", String::from_utf8_lossy(kind));
    }
    let moov = child(file, b"moov");
    let stco = child(child(child(child(child(moov, b"trak"), b"mdia"), b"minf"), b"stbl"), b"stco");
    u32::from_be_bytes(stco[8..12].try_into().unwrap()) as usize
}

// ─── WAV ─────────────────────────────────────────────────────────────────────

/// 16-bit mono PCM, 100 ms of silence at 8 kHz.
pub fn sample_wav() -> Vec<u8> {
    let samples = vec![0u8; 1600];
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&((36 + samples.len()) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8000u32.to_le_bytes());
    out.extend_from_slice(&16_000u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    out.extend_from_slice(&samples);
    out
}

// ─── Images ──────────────────────────────────────────────────────────────────

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([180, 40, 90]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .expect("encode jpeg");
    out
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([20, 200, 120]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode png");
    out
}

pub fn image_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).expect("decode image");
    (img.width(), img.height())
}
