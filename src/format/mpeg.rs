//! MPEG audio frame headers (layer III only).

const BITRATES_V1_L3: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const BITRATES_V2_L3: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];
const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mono: bool,
}

impl FrameHeader {
    /// Parse a 4-byte frame header. Free-format and reserved values are rejected.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };
        // Layer bits 01 = layer III.
        if (bytes[1] >> 1) & 0x03 != 0b01 {
            return None;
        }

        let bitrate_index = (bytes[2] >> 4) as usize;
        let bitrate_kbps = match version {
            MpegVersion::V1 => BITRATES_V1_L3[bitrate_index],
            _ => BITRATES_V2_L3[bitrate_index],
        };
        if bitrate_kbps == 0 {
            return None;
        }

        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::V1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::V2 => SAMPLE_RATES_V1[rate_index] / 2,
            MpegVersion::V25 => SAMPLE_RATES_V1[rate_index] / 4,
        };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding: bytes[2] & 0x02 != 0,
            mono: bytes[3] >> 6 == 0b11,
        })
    }

    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::V1 => 1152,
            _ => 576,
        }
    }

    /// Frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let coefficient = self.samples_per_frame() / 8;
        let padding = if self.padding { 1 } else { 0 };
        (coefficient * self.bitrate_kbps * 1000 / self.sample_rate + padding) as usize
    }

    /// Offset of the Xing/Info header inside the frame (after the side information).
    pub fn xing_offset(&self) -> usize {
        match (self.version, self.mono) {
            (MpegVersion::V1, false) => 36,
            (MpegVersion::V1, true) => 21,
            (_, false) => 21,
            (_, true) => 13,
        }
    }
}

/// Find the first frame header at or after `from` that is followed by another
/// valid header (when the following frame still fits in `data`).
pub fn find_frame(data: &[u8], from: usize) -> Option<(usize, FrameHeader)> {
    let mut pos = from;
    while pos + 4 <= data.len() {
        if let Some(header) = FrameHeader::parse(&data[pos..]) {
            let next = pos + header.frame_len();
            if next + 4 > data.len() || FrameHeader::parse(&data[next..]).is_some() {
                return Some((pos, header));
            }
        }
        pos += 1;
    }
    None
}
