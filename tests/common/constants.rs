//! Tag values shared by the fixtures and the assertions.

pub const TITLE: &str = "Piano Man";
pub const ARTIST: &str = "Billy Joel";
pub const ALBUM: &str = "Piano Man";
pub const ALBUM_ARTIST: &str = "Various Artists";
pub const YEAR: i32 = 1973;
pub const GENRE: &str = "Rock";
pub const TRACK: u32 = 2;
pub const TRACK_TOTAL: u32 = 10;

/// A field outside the tag model, used to check it survives rewrites.
pub const VENDOR_KEY: &str = "LABEL";
pub const VENDOR_VALUE: &str = "Columbia";

/// 144 * 128 kbps / 44.1 kHz, no padding.
pub const MPEG_FRAME_LEN: usize = 417;
