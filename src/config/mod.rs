//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::sanitize::SanitizerConfig;
use crate::application::titles::TitleConfig;

pub use cli::{
    CheckArgs, CliArgs, Command, GlobalOverrides, IngestArgs, OutputFormat, RenderArgs,
    SanitizeArgs, TallyArgs, VoteArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "blotter";
const ENV_PREFIX: &str = "BLOTTER";
const DEFAULT_STORAGE_DIR: &str = "data";
const DEFAULT_STRAY_BASE64_MIN_LEN: u64 = 200;
const MIN_STRAY_BASE64_LEN: u64 = 16;
const DEFAULT_MAX_PASSES: u64 = 4;
const DEFAULT_TITLES_TIMEOUT_SECS: u64 = 5;
const DEFAULT_TITLES_CACHE_CAPACITY: u64 = 512;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub sanitizer: SanitizerSettings,
    pub titles: TitleSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct SanitizerSettings {
    pub stray_base64_min_len: usize,
    pub max_passes: NonZeroUsize,
}

impl SanitizerSettings {
    pub fn sanitizer_config(&self) -> SanitizerConfig {
        SanitizerConfig {
            stray_base64_min_len: self.stray_base64_min_len,
            max_passes: self.max_passes.get(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TitleSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub cache_capacity: NonZeroUsize,
}

impl TitleSettings {
    pub fn title_config(&self) -> TitleConfig {
        TitleConfig {
            enabled: self.enabled,
            cache_capacity: self.cache_capacity,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    sanitizer: RawSanitizerSettings,
    titles: RawTitleSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(value) = overrides.sanitizer_stray_base64_min_len {
            self.sanitizer.stray_base64_min_len = Some(value);
        }
        if let Some(value) = overrides.sanitizer_max_passes {
            self.sanitizer.max_passes = Some(value);
        }
        if let Some(enabled) = overrides.titles_enabled {
            self.titles.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.titles_timeout_seconds {
            self.titles.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            storage,
            sanitizer,
            titles,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            sanitizer: build_sanitizer_settings(sanitizer)?,
            titles: build_title_settings(titles)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.directory", "must not be empty"));
    }
    Ok(StorageSettings { directory })
}

fn build_sanitizer_settings(
    sanitizer: RawSanitizerSettings,
) -> Result<SanitizerSettings, LoadError> {
    let min_len = sanitizer
        .stray_base64_min_len
        .unwrap_or(DEFAULT_STRAY_BASE64_MIN_LEN);
    if min_len <= MIN_STRAY_BASE64_LEN {
        return Err(LoadError::invalid(
            "sanitizer.stray_base64_min_len",
            format!("must be greater than {MIN_STRAY_BASE64_LEN}"),
        ));
    }
    let stray_base64_min_len = usize::try_from(min_len).map_err(|_| {
        LoadError::invalid(
            "sanitizer.stray_base64_min_len",
            "value exceeds supported range",
        )
    })?;

    let max_passes = non_zero_usize(
        sanitizer.max_passes.unwrap_or(DEFAULT_MAX_PASSES),
        "sanitizer.max_passes",
    )?;

    Ok(SanitizerSettings {
        stray_base64_min_len,
        max_passes,
    })
}

fn build_title_settings(titles: RawTitleSettings) -> Result<TitleSettings, LoadError> {
    let timeout_seconds = titles
        .timeout_seconds
        .unwrap_or(DEFAULT_TITLES_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "titles.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let cache_capacity = non_zero_usize(
        titles
            .cache_capacity
            .unwrap_or(DEFAULT_TITLES_CACHE_CAPACITY),
        "titles.cache_capacity",
    )?;

    Ok(TitleSettings {
        enabled: titles.enabled.unwrap_or(true),
        timeout: Duration::from_secs(timeout_seconds),
        cache_capacity,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSanitizerSettings {
    stray_base64_min_len: Option<u64>,
    max_passes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTitleSettings {
    enabled: Option<bool>,
    timeout_seconds: Option<u64>,
    cache_capacity: Option<u64>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
