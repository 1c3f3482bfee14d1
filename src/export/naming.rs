//! Archive entry names.

use crate::format::AudioFormat;
use crate::tags::TagFields;
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNTITLED: &str = "Untitled";

/// Longest stem kept, counted in grapheme clusters.
pub const MAX_STEM_GRAPHEMES: usize = 120;

const FALLBACK_EXTENSION: &str = "bin";

/// Replace characters that are unsafe in file names across platforms.
///
/// Control characters become spaces, path separators and reserved
/// punctuation become `_`. Leading dots are dropped so no entry ends up
/// hidden, and runs of whitespace collapse to one space.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches('.').trim();
    truncate_graphemes(trimmed, MAX_STEM_GRAPHEMES)
        .trim_end_matches(['.', ' '])
        .to_string()
}

fn truncate_graphemes(s: &str, max: usize) -> &str {
    match s.grapheme_indices(true).nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `Artist - Title` for a file's fields, with fallbacks for unset fields.
pub fn stem_for(fields: &TagFields) -> String {
    let fields = fields.normalized();
    let artist = fields
        .display_artist()
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let title = fields.title.as_deref().unwrap_or(UNTITLED);
    let stem = sanitize(&format!("{} - {}", artist, title));
    if stem.is_empty() {
        format!("{} - {}", UNKNOWN_ARTIST, UNTITLED)
    } else {
        stem
    }
}

/// Stem used when the item's tags could not be decoded. `position` is 1-based.
pub fn fallback_stem(position: usize) -> String {
    format!("track-{}", position)
}

pub fn extension_for(format: Option<AudioFormat>) -> &'static str {
    format.map(|f| f.extension()).unwrap_or(FALLBACK_EXTENSION)
}

/// Hands out names unique within one archive, compared case-insensitively.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stem.ext`, or `stem (N).ext` with the smallest free `N >= 2`.
    pub fn allocate(&mut self, stem: &str, extension: &str) -> String {
        let mut candidate = format!("{}.{}", stem, extension);
        let mut n = 2;
        while !self.taken.insert(candidate.to_lowercase()) {
            candidate = format!("{} ({}).{}", stem, n, extension);
            n += 1;
        }
        candidate
    }
}
