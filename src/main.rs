use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tagtrack::config::{AppConfig, CliConfig, FileConfig};
use tagtrack::export::{Compression, FileSource};
use tagtrack::tags::{TagFields, TrackNumber};
use tagtrack::{format, Claim, CoverArt, ExportRequest, TagEngine, TagSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;
use cli_style::{get_styles, TableBuilder};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version, about = "Read and edit audio tags")]
struct CliArgs {
    /// TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Maximum number of files in one export archive.
    #[clap(long, default_value_t = tagtrack::export::DEFAULT_MAX_ITEMS)]
    pub max_items: usize,

    /// Longest side, in pixels, of an embedded cover.
    #[clap(long, default_value_t = tagtrack::config::DEFAULT_COVER_MAX_DIMENSION)]
    pub max_cover_dim: u32,

    /// Timeout in seconds for one inspector run.
    #[clap(long, default_value_t = tagtrack::config::DEFAULT_PROBE_TIMEOUT_SEC)]
    pub probe_timeout_sec: u64,

    /// Path to the ffprobe binary.
    #[clap(long)]
    pub ffprobe: Option<PathBuf>,

    /// Compression for export archive entries.
    #[clap(long, default_value = "stored")]
    pub compression: Compression,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the container format detected from the file contents.
    Detect {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },

    /// Prints the tags of a file.
    Read {
        #[clap(value_parser = parse_path)]
        file: PathBuf,

        /// Print as JSON.
        #[clap(long)]
        json: bool,
    },

    /// Edits the tags of a file, in place unless --output is given.
    Write {
        #[clap(value_parser = parse_path)]
        file: PathBuf,

        #[clap(long)]
        title: Option<String>,

        /// Replaces the artist list; repeat for several artists.
        #[clap(long = "artist")]
        artists: Vec<String>,

        #[clap(long)]
        album: Option<String>,

        #[clap(long)]
        album_artist: Option<String>,

        #[clap(long)]
        track: Option<u32>,

        #[clap(long)]
        total: Option<u32>,

        #[clap(long)]
        year: Option<i32>,

        #[clap(long)]
        genre: Option<String>,

        /// Unsets a field; repeatable.
        #[clap(long, value_enum)]
        clear: Vec<Field>,

        /// JPEG or PNG image to embed as the cover.
        #[clap(long, value_parser = parse_path)]
        cover: Option<PathBuf>,

        #[clap(long, conflicts_with = "cover")]
        remove_cover: bool,

        #[clap(long, value_parser = parse_path)]
        output: Option<PathBuf>,
    },

    /// Writes the embedded cover image to OUT.
    Cover {
        #[clap(value_parser = parse_path)]
        file: PathBuf,

        #[clap(value_parser = parse_path)]
        out: PathBuf,
    },

    /// Runs the inspector on a file. Ctrl-C cancels.
    Validate {
        #[clap(value_parser = parse_path)]
        file: PathBuf,

        /// Declared MIME type or extension; defaults to the file name.
        #[clap(long)]
        claimed: Option<String>,
    },

    /// Packages files into one zip archive, named from their tags.
    Export {
        #[clap(value_parser = parse_path)]
        out: PathBuf,

        #[clap(required = true)]
        files: Vec<String>,
    },

    /// Lists the standard genre names.
    Genres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Field {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Track,
    Year,
    Genre,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        max_items: cli_args.max_items,
        max_cover_dim: cli_args.max_cover_dim,
        probe_timeout_sec: cli_args.probe_timeout_sec,
        ffprobe_path: cli_args.ffprobe.clone(),
        compression: cli_args.compression,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    let engine = TagEngine::new(config.engine);

    match cli_args.command {
        Command::Detect { file } => detect(&file),
        Command::Read { file, json } => read(&engine, &file, json),
        Command::Write {
            file,
            title,
            artists,
            album,
            album_artist,
            track,
            total,
            year,
            genre,
            clear,
            cover,
            remove_cover,
            output,
        } => {
            let edits = FieldEdits {
                title,
                artists,
                album,
                album_artist,
                track,
                total,
                year,
                genre,
                clear,
            };
            let cover = match (cover, remove_cover) {
                (Some(path), _) => CoverEdit::Embed(path),
                (None, true) => CoverEdit::Remove,
                (None, false) => CoverEdit::Keep,
            };
            write(&engine, &file, edits, cover, output.as_deref())
        }
        Command::Cover { file, out } => extract_cover(&engine, &file, &out),
        Command::Validate { file, claimed } => validate(&engine, &file, claimed).await,
        Command::Export { out, files } => export(&engine, &out, files),
        Command::Genres => {
            let mut table = TableBuilder::new(vec!["#", "Genre"]);
            for (index, name) in engine.genres().iter().enumerate() {
                table.add_row(vec![index.to_string(), name.to_string()]);
            }
            table.print();
            Ok(())
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn detect(path: &Path) -> Result<()> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    match format::detect(&mut file) {
        Some(detected) => {
            println!("{}", detected);
            Ok(())
        }
        None => bail!("{:?} is not a supported audio file", path),
    }
}

#[derive(Serialize)]
struct TagReport<'a> {
    format: &'a str,
    duration_secs: Option<f64>,
    #[serde(flatten)]
    fields: &'a TagFields,
    cover: Option<CoverReport<'a>>,
}

#[derive(Serialize)]
struct CoverReport<'a> {
    mime_type: &'a str,
    size: usize,
    width: Option<u32>,
    height: Option<u32>,
}

fn read(engine: &TagEngine, path: &Path, json: bool) -> Result<()> {
    let tags = engine.read(read_file(path)?)?;
    let cover = engine.extract_cover(&tags);
    let report = TagReport {
        format: tags.format().as_str(),
        duration_secs: tags.duration().map(|d| d.as_secs_f64()),
        fields: &tags.fields,
        cover: cover.as_ref().map(|c| {
            let dims = c.dimensions();
            CoverReport {
                mime_type: c.mime_type(),
                size: c.data().len(),
                width: dims.map(|(w, _)| w),
                height: dims.map(|(_, h)| h),
            }
        }),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let unset = || "-".to_string();
    cli_style::print_section_header(&path.display().to_string());
    cli_style::print_key_value("Format", report.format);
    cli_style::print_key_value(
        "Duration",
        &report
            .duration_secs
            .map(|s| format!("{:.2}s", s))
            .unwrap_or_else(unset),
    );
    let fields = &tags.fields;
    cli_style::print_key_value("Title", fields.title.as_deref().unwrap_or("-"));
    cli_style::print_key_value(
        "Artist",
        &tags.display_artist().unwrap_or_else(unset),
    );
    cli_style::print_key_value("Album", fields.album.as_deref().unwrap_or("-"));
    cli_style::print_key_value(
        "Album artist",
        &tags.display_album_artist().unwrap_or_else(unset),
    );
    cli_style::print_key_value(
        "Track",
        &fields
            .track
            .map(|t| match t.total {
                Some(total) => format!("{}/{}", t.number, total),
                None => t.number.to_string(),
            })
            .unwrap_or_else(unset),
    );
    cli_style::print_key_value(
        "Year",
        &fields.year.map(|y| y.to_string()).unwrap_or_else(unset),
    );
    cli_style::print_key_value("Genre", fields.genre.as_deref().unwrap_or("-"));
    cli_style::print_key_value(
        "Cover",
        &report
            .cover
            .as_ref()
            .map(|c| match (c.width, c.height) {
                (Some(w), Some(h)) => format!("{} {}x{} ({} bytes)", c.mime_type, w, h, c.size),
                _ => format!("{} ({} bytes)", c.mime_type, c.size),
            })
            .unwrap_or_else(unset),
    );
    Ok(())
}

struct FieldEdits {
    title: Option<String>,
    artists: Vec<String>,
    album: Option<String>,
    album_artist: Option<String>,
    track: Option<u32>,
    total: Option<u32>,
    year: Option<i32>,
    genre: Option<String>,
    clear: Vec<Field>,
}

impl FieldEdits {
    fn apply(self, fields: &mut TagFields) {
        for field in &self.clear {
            match field {
                Field::Title => fields.title = None,
                Field::Artist => fields.artists.clear(),
                Field::Album => fields.album = None,
                Field::AlbumArtist => fields.album_artist = None,
                Field::Track => fields.track = None,
                Field::Year => fields.year = None,
                Field::Genre => fields.genre = None,
            }
        }
        if let Some(title) = self.title {
            fields.title = Some(title);
        }
        if !self.artists.is_empty() {
            fields.artists = self.artists;
        }
        if let Some(album) = self.album {
            fields.album = Some(album);
        }
        if let Some(album_artist) = self.album_artist {
            fields.album_artist = Some(album_artist);
        }
        match (self.track, self.total) {
            (Some(number), total) => fields.track = Some(TrackNumber::new(number, total)),
            (None, Some(total)) => {
                if let Some(track) = fields.track.as_mut() {
                    track.total = Some(total);
                }
            }
            (None, None) => {}
        }
        if let Some(year) = self.year {
            fields.year = Some(year);
        }
        if let Some(genre) = self.genre {
            fields.genre = Some(genre);
        }
    }
}

enum CoverEdit {
    Keep,
    Embed(PathBuf),
    Remove,
}

fn write(
    engine: &TagEngine,
    path: &Path,
    edits: FieldEdits,
    cover: CoverEdit,
    output: Option<&Path>,
) -> Result<()> {
    let mut tags: TagSet = engine.read(read_file(path)?)?;
    edits.apply(&mut tags.fields);
    match cover {
        CoverEdit::Keep => {}
        CoverEdit::Embed(image) => {
            let image = CoverArt::from_bytes(read_file(&image)?);
            engine.embed_cover(&mut tags, image)?;
        }
        CoverEdit::Remove => engine.remove_cover(&mut tags),
    }

    if !tags.is_modified() {
        cli_style::print_warning("No changes to write");
        if output.is_none() {
            return Ok(());
        }
    }

    let bytes = engine.write(&tags)?;
    let target = output.unwrap_or(path);
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;
    std::io::Write::write_all(&mut staged, &bytes)?;
    staged
        .persist(target)
        .with_context(|| format!("Failed to write {:?}", target))?;
    cli_style::print_success(&format!("Wrote {} bytes to {}", bytes.len(), target.display()));
    Ok(())
}

fn extract_cover(engine: &TagEngine, path: &Path, out: &Path) -> Result<()> {
    let tags = engine.read(read_file(path)?)?;
    let Some(cover) = engine.extract_cover(&tags) else {
        bail!("{:?} has no embedded cover", path);
    };
    std::fs::write(out, cover.data()).with_context(|| format!("Failed to write {:?}", out))?;
    cli_style::print_success(&format!(
        "Saved {} cover to {}",
        cover.mime_type(),
        out.display()
    ));
    Ok(())
}

async fn validate(engine: &TagEngine, path: &Path, claimed: Option<String>) -> Result<()> {
    let data = read_file(path)?;
    let hint = claimed.or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()));
    let claim = Claim::from_hint(hint.as_deref());

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let Some(result) = engine.validate_cancellable(&data, &claim, &cancel).await? else {
        bail!("Validation cancelled");
    };

    if result.is_valid() {
        cli_style::print_success(&result.message);
    } else {
        cli_style::print_error(&format!("{}: {}", result.status.as_str(), result.message));
    }
    if let Some(duration) = result.duration {
        cli_style::print_key_value("Duration", &format!("{:.2}s", duration.as_secs_f64()));
    }
    if !result.is_valid() {
        std::process::exit(1);
    }
    Ok(())
}

fn export(engine: &TagEngine, out: &Path, files: Vec<String>) -> Result<()> {
    let request = ExportRequest::new(files);
    let writer = BufWriter::new(
        File::create(out).with_context(|| format!("Failed to create {:?}", out))?,
    );

    let progress = ProgressBar::new(request.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress template")?,
    );
    let result = engine.export_with_progress(&request, &FileSource::new(), writer, |entry| {
        progress.set_message(entry.filename.clone());
        progress.inc(1);
    });
    progress.finish_and_clear();

    let archive = match result {
        Ok(archive) => archive,
        Err(e) => {
            let _ = std::fs::remove_file(out);
            return Err(e.into());
        }
    };
    archive
        .writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush {:?}", out))?;

    let mut table = TableBuilder::new(vec!["#", "Source", "Entry"]);
    for (index, entry) in archive.entries.iter().enumerate() {
        table.add_row(vec![
            (index + 1).to_string(),
            entry.id.clone(),
            entry.filename.clone(),
        ]);
    }
    table.print();
    cli_style::print_success(&format!(
        "Exported {} files to {}",
        archive.entries.len(),
        out.display()
    ));
    Ok(())
}
