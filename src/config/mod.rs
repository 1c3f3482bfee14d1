mod file_config;

pub use file_config::{CoverConfig, ExportConfig, FileConfig, ValidatorConfig};

use crate::export::{Compression, ExportSettings, DEFAULT_MAX_ITEMS};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COVER_MAX_DIMENSION: u32 = 1000;
pub const DEFAULT_PROBE_TIMEOUT_SEC: u64 = 30;
pub const DEFAULT_SPAWN_RETRIES: u32 = 1;
pub const DEFAULT_FFPROBE: &str = "ffprobe";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub max_items: usize,
    pub max_cover_dim: u32,
    pub probe_timeout_sec: u64,
    pub ffprobe_path: Option<PathBuf>,
    pub compression: Compression,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_cover_dim: DEFAULT_COVER_MAX_DIMENSION,
            probe_timeout_sec: DEFAULT_PROBE_TIMEOUT_SEC,
            ffprobe_path: None,
            compression: Compression::Stored,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineSettings,
}

/// Everything the engine needs to run one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub cover_max_dimension: u32,
    pub export: ExportSettings,
    pub validator: ValidatorSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cover_max_dimension: DEFAULT_COVER_MAX_DIMENSION,
            export: ExportSettings::default(),
            validator: ValidatorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorSettings {
    pub ffprobe_path: PathBuf,
    pub timeout: Duration,
    /// Extra attempts after the inspector fails to start.
    pub spawn_retries: u32,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            ffprobe_path: PathBuf::from(DEFAULT_FFPROBE),
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SEC),
            spawn_retries: DEFAULT_SPAWN_RETRIES,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let cover_file = file.cover.unwrap_or_default();
        let export_file = file.export.unwrap_or_default();
        let validator_file = file.validator.unwrap_or_default();

        let cover_max_dimension = cover_file.max_dimension.unwrap_or(cli.max_cover_dim);
        if cover_max_dimension == 0 {
            bail!("Cover max dimension must be at least 1 pixel");
        }

        let max_items = export_file.max_items.unwrap_or(cli.max_items);
        if max_items == 0 {
            bail!("Export max items must be at least 1");
        }

        let compression = match export_file.compression {
            Some(s) => parse_compression(&s)
                .ok_or_else(|| anyhow::anyhow!("Unknown export compression: {:?}", s))?,
            None => cli.compression,
        };

        let timeout_sec = validator_file.timeout_sec.unwrap_or(cli.probe_timeout_sec);
        if timeout_sec == 0 {
            bail!("Validator timeout must be at least 1 second");
        }

        let ffprobe_path = validator_file
            .ffprobe_path
            .map(PathBuf::from)
            .or_else(|| cli.ffprobe_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFPROBE));

        let spawn_retries = validator_file
            .spawn_retries
            .unwrap_or(DEFAULT_SPAWN_RETRIES);

        Ok(Self {
            engine: EngineSettings {
                cover_max_dimension,
                export: ExportSettings {
                    max_items,
                    compression,
                },
                validator: ValidatorSettings {
                    ffprobe_path,
                    timeout: Duration::from_secs(timeout_sec),
                    spawn_retries,
                },
            },
        })
    }
}

/// Uses clap's ValueEnum trait for parsing.
fn parse_compression(s: &str) -> Option<Compression> {
    Compression::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_compression() {
        assert_eq!(parse_compression("stored"), Some(Compression::Stored));
        assert_eq!(parse_compression("DEFLATED"), Some(Compression::Deflated));
        assert_eq!(parse_compression("bzip2"), None);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None).unwrap();
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.engine.export.max_items, 20);
        assert_eq!(config.engine.cover_max_dimension, 1000);
        assert_eq!(config.engine.validator.timeout, Duration::from_secs(30));
        assert_eq!(config.engine.validator.spawn_retries, 1);
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            max_items: 5,
            max_cover_dim: 300,
            probe_timeout_sec: 10,
            ffprobe_path: Some(PathBuf::from("/opt/ffmpeg/ffprobe")),
            compression: Compression::Deflated,
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.engine.export.max_items, 5);
        assert_eq!(config.engine.export.compression, Compression::Deflated);
        assert_eq!(config.engine.cover_max_dimension, 300);
        assert_eq!(config.engine.validator.timeout, Duration::from_secs(10));
        assert_eq!(
            config.engine.validator.ffprobe_path,
            PathBuf::from("/opt/ffmpeg/ffprobe")
        );
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            max_items: 5,
            max_cover_dim: 300,
            ..Default::default()
        };
        let file_config = FileConfig {
            export: Some(ExportConfig {
                max_items: Some(50),
                compression: Some("deflated".to_string()),
            }),
            validator: Some(ValidatorConfig {
                spawn_retries: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.engine.export.max_items, 50);
        assert_eq!(config.engine.export.compression, Compression::Deflated);
        assert_eq!(config.engine.validator.spawn_retries, 3);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.engine.cover_max_dimension, 300);
    }

    #[test]
    fn test_resolve_rejects_zero_limits() {
        let cli = CliConfig {
            max_items: 0,
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("max items"));

        let file_config = FileConfig {
            cover: Some(CoverConfig {
                max_dimension: Some(0),
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("max dimension"));

        let cli = CliConfig {
            probe_timeout_sec: 0,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_unknown_compression_error() {
        let file_config = FileConfig {
            export: Some(ExportConfig {
                compression: Some("zstd".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("zstd"));
    }

    #[test]
    fn test_load_toml_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cover]
max_dimension = 640

[export]
max_items = 12
compression = "stored"

[validator]
ffprobe_path = "/usr/local/bin/ffprobe"
timeout_sec = 5
"#
        )
        .unwrap();

        let loaded = FileConfig::load(file.path()).unwrap();
        let config = AppConfig::resolve(&CliConfig::default(), Some(loaded)).unwrap();
        assert_eq!(config.engine.cover_max_dimension, 640);
        assert_eq!(config.engine.export.max_items, 12);
        assert_eq!(config.engine.validator.timeout, Duration::from_secs(5));
        assert_eq!(
            config.engine.validator.ffprobe_path,
            PathBuf::from("/usr/local/bin/ffprobe")
        );
    }

    #[test]
    fn test_load_missing_file_error() {
        let err = FileConfig::load(std::path::Path::new("/nonexistent/tagtrack.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
