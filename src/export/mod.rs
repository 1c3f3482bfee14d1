//! Bulk export of tagged files into one zip archive.
//!
//! Items are opened through an [`ItemSource`], read fully, named from their
//! tags and written to the archive one at a time, in request order.

mod naming;

pub use naming::{sanitize, NameAllocator, MAX_STEM_GRAPHEMES, UNKNOWN_ARTIST, UNTITLED};

use crate::format::{self, AudioFormat};
use crate::tags::{self, TagCodec};
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_MAX_ITEMS: usize = 20;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Too many items requested: {requested} (max: {max})")]
    TooManyItems { requested: usize, max: usize },

    #[error("Failed to read item {id}: {source}")]
    Source {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where the packager reads item bytes from. Identifiers are resolved by
/// the caller before the request reaches the packager.
pub trait ItemSource {
    fn open(&self, id: &str) -> io::Result<Box<dyn Read + '_>>;
}

/// Treats every identifier as a path, optionally relative to a base directory.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    base: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(id),
            None => Path::new(id).to_path_buf(),
        }
    }
}

impl ItemSource for FileSource {
    fn open(&self, id: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.resolve(id))?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Compression {
    #[default]
    Stored,
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSettings {
    pub max_items: usize,
    pub compression: Compression,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            compression: Compression::Stored,
        }
    }
}

/// Ordered item identifiers to package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    ids: Vec<String>,
}

impl ExportRequest {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub id: String,
    pub filename: String,
    pub format: Option<AudioFormat>,
    pub size: u64,
    /// False when the item's tags could not be decoded and a positional
    /// name was used instead.
    pub tagged: bool,
}

/// A finished archive: its entries in request order and the writer it was
/// written to.
#[derive(Debug)]
pub struct ExportArchive<W> {
    pub entries: Vec<ExportEntry>,
    pub writer: W,
}

/// Package every item of `request` into a zip written to `writer`.
pub fn package<W: Write + Seek>(
    request: &ExportRequest,
    source: &dyn ItemSource,
    writer: W,
    settings: &ExportSettings,
) -> Result<ExportArchive<W>, ExportError> {
    package_with_progress(request, source, writer, settings, |_| {})
}

/// Like [`package`], calling `on_entry` after each item is written.
pub fn package_with_progress<W, F>(
    request: &ExportRequest,
    source: &dyn ItemSource,
    writer: W,
    settings: &ExportSettings,
    mut on_entry: F,
) -> Result<ExportArchive<W>, ExportError>
where
    W: Write + Seek,
    F: FnMut(&ExportEntry),
{
    if request.len() > settings.max_items {
        warn!(
            "Rejecting export of {} items (max {})",
            request.len(),
            settings.max_items
        );
        return Err(ExportError::TooManyItems {
            requested: request.len(),
            max: settings.max_items,
        });
    }

    info!("Packaging {} items", request.len());
    let options = SimpleFileOptions::default().compression_method(settings.compression.method());
    let mut zip = ZipWriter::new(writer);
    let mut names = NameAllocator::new();
    let mut entries = Vec::with_capacity(request.len());

    for (index, id) in request.ids().iter().enumerate() {
        let data = read_item(source, id)?;
        let (entry_format, stem, tagged) = name_item(&data, index + 1, id);
        let filename = names.allocate(&stem, naming::extension_for(entry_format));

        zip.start_file(filename.as_str(), options)?;
        zip.write_all(&data)?;

        let entry = ExportEntry {
            id: id.clone(),
            filename,
            format: entry_format,
            size: data.len() as u64,
            tagged,
        };
        debug!(
            "[{}/{}] {} -> {} ({} bytes)",
            index + 1,
            request.len(),
            entry.id,
            entry.filename,
            entry.size
        );
        on_entry(&entry);
        entries.push(entry);
    }

    let writer = zip.finish()?;
    info!("Export archive complete: {} entries", entries.len());
    Ok(ExportArchive { entries, writer })
}

fn read_item(source: &dyn ItemSource, id: &str) -> Result<Vec<u8>, ExportError> {
    let source_err = |err: io::Error| ExportError::Source {
        id: id.to_string(),
        source: err,
    };
    let mut reader = source.open(id).map_err(source_err)?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data).map_err(source_err)?;
    Ok(data)
}

fn name_item(data: &[u8], position: usize, id: &str) -> (Option<AudioFormat>, String, bool) {
    let Some(detected) = format::detect_bytes(data) else {
        warn!("Item {} has no recognizable audio format", id);
        return (None, naming::fallback_stem(position), false);
    };
    match tags::codec_for(detected).parse(data) {
        Ok(parsed) => (Some(detected), naming::stem_for(&parsed.fields), true),
        Err(e) => {
            warn!("Could not read tags of item {}: {}", id, e);
            (Some(detected), naming::fallback_stem(position), false)
        }
    }
}
