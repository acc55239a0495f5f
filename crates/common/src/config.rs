//! Application configuration.
//!
//! Configuration is a YAML file named `animmuf.yaml`, read once at startup
//! from the first location that exists:
//!
//! 1. `./animmuf.yaml`
//! 2. `~/.animmuf.yaml`
//! 3. `~/.local/animmuf.yaml`
//! 4. `/etc/animmuf.yaml`
//!
//! Only `target_dir` and `converter` are required. The resulting
//! [`AppConfig`] is immutable and handed to each component by reference.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name searched for in each config location.
pub const CONFIG_NAME: &str = "animmuf.yaml";

/// NOAA SWPC listing of the CTIPe MUF animation frames.
pub const DEFAULT_SOURCE_URL: &str =
    "https://services.swpc.noaa.gov/experimental/products/animations/ctipe_muf.json";

/// Prefix joined with the `url` of each listing entry.
pub const DEFAULT_BASE_URL: &str = "https://services.swpc.noaa.gov/experimental";

/// Longest interval, staleness or retention span accepted: 100 years.
/// Keeps `now - span` inside chrono's date range.
const MAX_SPAN_DAYS: i64 = 36_525;

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Cache and output directory. Must exist.
    pub target_dir: PathBuf,

    /// External converter executable, invoked as `converter <gif> <video>`.
    pub converter: PathBuf,

    /// Where the provider listing is cached.
    pub muf_file: PathBuf,

    /// Final video path.
    pub video_file: PathBuf,

    /// TrueType/OpenType font for frame labels. No labels when unset.
    pub font: Option<PathBuf>,

    /// Label font size in pixels.
    pub font_size: f32,

    /// Listing endpoint.
    pub source_url: String,

    /// Prefix for listed frame paths.
    pub base_url: String,

    /// Listing reuse window.
    pub manifest_max_age: StdDuration,

    pub sequencing: SequencingConfig,
    pub retention: RetentionConfig,
    pub fetch: FetchConfig,
    pub animation: AnimationConfig,

    /// Upper bound on a single converter run.
    pub converter_timeout: StdDuration,

    /// Converter command line and captured output land here.
    pub converter_log: PathBuf,

    pub logging: LoggingConfig,
}

/// Ordering, gap, and staleness thresholds.
#[derive(Debug, Clone)]
pub struct SequencingConfig {
    /// Expected spacing between provider frames.
    pub frame_interval: Duration,

    /// Adjacent frames further apart than `gap_factor * frame_interval`
    /// are reported as a gap.
    pub gap_factor: f64,

    /// Keep only the most recent N frames when set.
    pub max_frames: Option<usize>,

    /// A newest frame older than this flags the run as stale.
    pub stale_after: Duration,

    /// Whether a stale run fails instead of warning.
    pub stale_is_fatal: bool,
}

/// Cache pruning policy.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Frames older than this are pruned at the start of a run.
    pub max_age: Duration,

    /// Also drop cached frames that the provider no longer lists.
    pub prune_unlisted: bool,
}

/// Download worker pool and retry bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Parallel frame downloads.
    pub workers: usize,

    /// Attempts per frame (and for the listing), including the first.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards.
    pub base_delay_ms: u64,

    /// Backoff cap.
    pub max_delay_ms: u64,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

/// Animated image parameters.
#[derive(Debug, Clone)]
pub struct AnimationConfig {
    pub width: u32,
    pub height: u32,
    pub frame_delay_ms: u32,

    /// Optional second label line, e.g. a site URL.
    pub caption: Option<String>,

    /// Intermediate animated GIF path.
    pub file: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "animmuf_pipeline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

/// Everything the assembler needs, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub target_dir: PathBuf,
    pub output_path: PathBuf,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub frame_interval: Duration,
    pub max_frames: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub frame_delay_ms: u32,
    pub caption: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// On-disk shape. Every key is optional here; [`AppConfig::from_raw`]
/// enforces what is required and fills in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    target_dir: Option<PathBuf>,
    converter: Option<PathBuf>,
    muf_file: Option<PathBuf>,
    video_file: Option<PathBuf>,
    font: Option<PathBuf>,
    font_size: Option<f32>,
    source_url: Option<String>,
    base_url: Option<String>,
    manifest_max_age_secs: Option<u64>,
    frame_interval_secs: Option<u64>,
    gap_factor: Option<f64>,
    max_frames: Option<usize>,
    stale_after_secs: Option<u64>,
    stale_is_fatal: Option<bool>,
    retention_hours: Option<u64>,
    prune_unlisted: Option<bool>,
    fetch: FetchConfig,
    animation: RawAnimation,
    converter_timeout_secs: Option<u64>,
    converter_log: Option<PathBuf>,
    logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnimation {
    width: Option<u32>,
    height: Option<u32>,
    frame_delay_ms: Option<u32>,
    caption: Option<String>,
    file: Option<PathBuf>,
}

impl AppConfig {
    /// Candidate config files, in search order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".").join(CONFIG_NAME)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!(".{CONFIG_NAME}")));
            paths.push(home.join(".local").join(CONFIG_NAME));
        }
        paths.push(PathBuf::from("/etc").join(CONFIG_NAME));
        paths
    }

    /// First existing file among `candidates`.
    pub fn find_config_file(candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
        for path in candidates {
            if path.is_file() {
                return Ok(path.clone());
            }
            tracing::debug!(path = %path.display(), "Config file not found");
        }
        Err(ConfigError::NotFound {
            searched: candidates.to_vec(),
        })
    }

    /// Load from `explicit` when given, otherwise from the search path.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::find_config_file(&Self::search_paths())?,
        };
        Self::load_from(&path)
    }

    /// Read and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "Reading config file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, path)
    }

    /// Parse YAML text. `origin` is only used in error messages.
    pub fn from_yaml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        // An empty document parses to unit; treat it as an empty mapping.
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let target_dir = raw
            .target_dir
            .ok_or(ConfigError::Missing { key: "target_dir" })?;
        let converter = raw
            .converter
            .ok_or(ConfigError::Missing { key: "converter" })?;

        if !target_dir.is_dir() {
            return Err(ConfigError::invalid(format!(
                "target_dir {} does not exist or is not a directory",
                target_dir.display()
            )));
        }

        let frame_interval_secs = raw.frame_interval_secs.unwrap_or(600);
        if frame_interval_secs == 0 {
            return Err(ConfigError::invalid("frame_interval_secs must be positive"));
        }
        let frame_interval =
            span("frame_interval_secs", frame_interval_secs, Duration::try_seconds)?;
        let stale_after = span(
            "stale_after_secs",
            raw.stale_after_secs.unwrap_or(3600),
            Duration::try_seconds,
        )?;
        let retention = span(
            "retention_hours",
            raw.retention_hours.unwrap_or(48),
            Duration::try_hours,
        )?;
        let gap_factor = raw.gap_factor.unwrap_or(1.5);
        if !(gap_factor > 1.0) {
            return Err(ConfigError::invalid("gap_factor must be greater than 1.0"));
        }
        if raw.max_frames == Some(0) {
            return Err(ConfigError::invalid("max_frames must be positive when set"));
        }
        if raw.fetch.workers == 0 {
            return Err(ConfigError::invalid("fetch.workers must be positive"));
        }
        if raw.fetch.max_attempts == 0 {
            return Err(ConfigError::invalid("fetch.max_attempts must be positive"));
        }
        let font_size = raw.font_size.unwrap_or(16.0);
        if !(font_size > 0.0) {
            return Err(ConfigError::invalid("font_size must be positive"));
        }
        let width = raw.animation.width.unwrap_or(800);
        let height = raw.animation.height.unwrap_or(600);
        if width == 0 || height == 0 {
            return Err(ConfigError::invalid("animation size must be non-zero"));
        }

        Ok(Self {
            muf_file: raw
                .muf_file
                .unwrap_or_else(|| target_dir.join("muf.json")),
            video_file: raw
                .video_file
                .unwrap_or_else(|| target_dir.join("muf.mp4")),
            converter_log: raw
                .converter_log
                .unwrap_or_else(|| target_dir.join("muf.log")),
            animation: AnimationConfig {
                width,
                height,
                frame_delay_ms: raw.animation.frame_delay_ms.unwrap_or(75),
                caption: raw.animation.caption,
                file: raw
                    .animation
                    .file
                    .unwrap_or_else(|| target_dir.join("muf.gif")),
            },
            font: raw.font,
            font_size,
            source_url: raw
                .source_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            base_url: raw.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            manifest_max_age: StdDuration::from_secs(raw.manifest_max_age_secs.unwrap_or(3600)),
            sequencing: SequencingConfig {
                frame_interval,
                gap_factor,
                max_frames: raw.max_frames,
                stale_after,
                stale_is_fatal: raw.stale_is_fatal.unwrap_or(false),
            },
            retention: RetentionConfig {
                max_age: retention,
                prune_unlisted: raw.prune_unlisted.unwrap_or(false),
            },
            fetch: raw.fetch,
            converter_timeout: StdDuration::from_secs(raw.converter_timeout_secs.unwrap_or(300)),
            logging: raw.logging,
            target_dir,
            converter,
        })
    }

    /// Directory holding cached frames.
    pub fn frames_dir(&self) -> PathBuf {
        self.target_dir.join("frames")
    }

    /// The subset of configuration the assembler consumes.
    pub fn assembly(&self) -> AssemblyConfig {
        AssemblyConfig {
            target_dir: self.target_dir.clone(),
            output_path: self.animation.file.clone(),
            font_path: self.font.clone(),
            font_size: self.font_size,
            frame_interval: self.sequencing.frame_interval,
            max_frames: self.sequencing.max_frames,
            width: self.animation.width,
            height: self.animation.height,
            frame_delay_ms: self.animation.frame_delay_ms,
            caption: self.animation.caption.clone(),
        }
    }
}

/// A configured count of `unit`s as a chrono span, rejecting values that
/// overflow or exceed [`MAX_SPAN_DAYS`].
fn span(
    key: &str,
    value: u64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(unit)
        .filter(|d| *d <= Duration::days(MAX_SPAN_DAYS))
        .ok_or_else(|| ConfigError::invalid(format!("{key} is out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_for(dir: &Path, extra: &str) -> String {
        format!(
            "target_dir: {}\nconverter: /usr/local/bin/gif2mp4\n{extra}",
            dir.display()
        )
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            AppConfig::from_yaml_str(&yaml_for(dir.path(), ""), Path::new("test.yaml")).unwrap();

        assert_eq!(config.muf_file, dir.path().join("muf.json"));
        assert_eq!(config.video_file, dir.path().join("muf.mp4"));
        assert_eq!(config.animation.file, dir.path().join("muf.gif"));
        assert_eq!(config.sequencing.frame_interval, Duration::minutes(10));
        assert!((config.sequencing.gap_factor - 1.5).abs() < 1e-9);
        assert_eq!(config.sequencing.max_frames, None);
        assert!(!config.sequencing.stale_is_fatal);
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.animation.width, 800);
        assert_eq!(config.animation.frame_delay_ms, 75);
        assert_eq!(config.font, None);
        assert_eq!(config.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_original_keys_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let extra = "muf_file: /tmp/muf.json\nvideo_file: /tmp/out.mp4\nfont: /usr/share/fonts/DejaVuSans.ttf\nfont_size: 22\n";
        let config =
            AppConfig::from_yaml_str(&yaml_for(dir.path(), extra), Path::new("test.yaml")).unwrap();

        assert_eq!(config.muf_file, PathBuf::from("/tmp/muf.json"));
        assert_eq!(config.video_file, PathBuf::from("/tmp/out.mp4"));
        assert_eq!(
            config.font,
            Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"))
        );
        assert!((config.font_size - 22.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_nested_sections_merge_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let extra = "max_frames: 3\nstale_is_fatal: true\nfetch:\n  workers: 8\nanimation:\n  caption: https://bsdworld.org/\nlogging:\n  json: true\n";
        let config =
            AppConfig::from_yaml_str(&yaml_for(dir.path(), extra), Path::new("test.yaml")).unwrap();

        assert_eq!(config.sequencing.max_frames, Some(3));
        assert!(config.sequencing.stale_is_fatal);
        assert_eq!(config.fetch.workers, 8);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(
            config.animation.caption.as_deref(),
            Some("https://bsdworld.org/")
        );
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");

        let assembly = config.assembly();
        assert_eq!(assembly.max_frames, Some(3));
        assert_eq!(assembly.output_path, dir.path().join("muf.gif"));
    }

    #[test]
    fn test_missing_required_keys() {
        let err = AppConfig::from_yaml_str("converter: /bin/true\n", Path::new("t.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "target_dir" }));

        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("target_dir: {}\n", dir.path().display());
        let err = AppConfig::from_yaml_str(&yaml, Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "converter" }));

        let err = AppConfig::from_yaml_str("", Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for extra in [
            "frame_interval_secs: 0\n",
            "gap_factor: 1.0\n",
            "max_frames: 0\n",
            "fetch:\n  workers: 0\n",
            "fetch:\n  max_attempts: 0\n",
            "frame_interval_secs: 18446744073709551615\n",
            "frame_interval_secs: 100000000000000000\n",
            "stale_after_secs: 9223372036854775808\n",
            "stale_after_secs: 100000000000000000\n",
            "retention_hours: 18446744073709551615\n",
            "retention_hours: 100000000000000000\n",
            "retention_hours: 1000000000\n",
        ] {
            let err = AppConfig::from_yaml_str(&yaml_for(dir.path(), extra), Path::new("t.yaml"))
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{extra}");
        }
    }

    #[test]
    fn test_target_dir_must_exist() {
        let yaml = "target_dir: /nonexistent/animmuf/target\nconverter: /bin/true\n";
        let err = AppConfig::from_yaml_str(yaml, Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = AppConfig::from_yaml_str("target_dir: [unclosed", Path::new("t.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_find_config_file_picks_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("missing.yaml");
        let second = dir.path().join("present.yaml");
        let third = dir.path().join("also-present.yaml");
        std::fs::write(&second, "").unwrap();
        std::fs::write(&third, "").unwrap();

        let found =
            AppConfig::find_config_file(&[first.clone(), second.clone(), third]).unwrap();
        assert_eq!(found, second);

        let err = AppConfig::find_config_file(&[first]).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_search_paths_order() {
        let paths = AppConfig::search_paths();
        assert_eq!(paths.first().unwrap(), &PathBuf::from("./animmuf.yaml"));
        assert_eq!(paths.last().unwrap(), &PathBuf::from("/etc/animmuf.yaml"));
    }
}
