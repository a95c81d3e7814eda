//! Configuration loading
//!
//! Two tiers:
//! 1. **Bootstrap TOML** ([`TomlConfig`]): paths, camera device, logging.
//!    Read once at startup; the process must restart to pick up changes.
//! 2. **Runtime settings** ([`RuntimeSettings`]): recognition thresholds,
//!    cadence bounds, masks and display toggles. Held by a [`SettingsStore`]
//!    that re-reads its file when it changes on disk.
//!
//! Missing files are not fatal: a warning is logged and compiled defaults
//! are used.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Environment variable naming the bootstrap TOML file
pub const CONFIG_ENV_VAR: &str = "STINGER_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Gallery directory, one sub-directory per identity
    #[serde(default = "default_people_dir")]
    pub people_dir: PathBuf,

    /// Runtime settings file (defaults to `<data_dir>/settings.toml`)
    #[serde(default)]
    pub settings_file: Option<PathBuf>,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Camera device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub device: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_people_dir() -> PathBuf {
    PathBuf::from("data/people")
}

fn default_camera_width() -> u32 {
    1280
}

fn default_camera_height() -> u32 {
    720
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            people_dir: default_people_dir(),
            settings_file: None,
            camera: CameraConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse a bootstrap config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse a bootstrap config file, falling back to defaults when it is
    /// absent or unreadable
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("No configuration file found, using compiled defaults");
            return Self::default();
        };

        match Self::load(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "Failed to load configuration from {}: {}, using compiled defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Location of the runtime settings file
    pub fn settings_path(&self) -> PathBuf {
        self.settings_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("settings.toml"))
    }
}

/// Bootstrap config path resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable [`CONFIG_ENV_VAR`]
/// 3. `<platform config dir>/stinger/config.toml` if it exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("stinger").join("config.toml"))
        .filter(|p| p.exists())
}

/// Rectangle excluded from detection, in normalized (0-1) frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl MaskRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Parse masks stored as a JSON array string
///
/// Entries missing any of `x`, `y`, `width`, `height` are dropped; anything
/// that is not a JSON array yields an empty list.
pub fn parse_camera_masks(json: &str) -> Vec<MaskRect> {
    if json.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(serde_json::Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<MaskRect>(entry).ok())
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!("Ignoring malformed camera mask JSON: {}", e);
            Vec::new()
        }
    }
}

/// Accept masks as a TOML array of tables or as a JSON array string
fn deserialize_camera_masks<'de, D>(deserializer: D) -> std::result::Result<Vec<MaskRect>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Masks {
        List(Vec<MaskRect>),
        Json(String),
    }

    Ok(match Masks::deserialize(deserializer)? {
        Masks::List(masks) => masks,
        Masks::Json(json) => parse_camera_masks(&json),
    })
}

/// Hot-reloadable runtime settings
///
/// Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    // === Recognition ===
    pub detection_score_threshold: f32,
    pub embedding_distance_threshold: f32,
    pub upscale_factor: f32,
    pub skip_upscale_retry: bool,

    // === Audio ===
    pub audio_cooldown_seconds: f64,

    // === Camera / display ===
    pub camera_fps: u32,
    #[serde(deserialize_with = "deserialize_camera_masks")]
    pub camera_masks: Vec<MaskRect>,
    pub mirror_feed: bool,

    // === Kiosk cadence ===
    pub kiosk_enabled: bool,
    pub recognition_interval_ms: u64,
    pub low_power_mode: bool,
    pub min_recognition_interval_ms: u64,
    pub max_recognition_interval_ms: u64,
    pub target_process_time_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            detection_score_threshold: 0.5,
            embedding_distance_threshold: 0.6,
            upscale_factor: 1.5,
            skip_upscale_retry: false,
            audio_cooldown_seconds: 30.0,
            camera_fps: 15,
            camera_masks: Vec::new(),
            mirror_feed: false,
            kiosk_enabled: true,
            recognition_interval_ms: 200,
            low_power_mode: false,
            min_recognition_interval_ms: 100,
            max_recognition_interval_ms: 1000,
            target_process_time_ms: 150,
        }
    }
}

/// Partial update of [`RuntimeSettings`]; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettingsUpdate {
    pub detection_score_threshold: Option<f32>,
    pub embedding_distance_threshold: Option<f32>,
    pub upscale_factor: Option<f32>,
    pub skip_upscale_retry: Option<bool>,
    pub audio_cooldown_seconds: Option<f64>,
    pub camera_fps: Option<u32>,
    pub camera_masks: Option<Vec<MaskRect>>,
    pub mirror_feed: Option<bool>,
    pub kiosk_enabled: Option<bool>,
    pub recognition_interval_ms: Option<u64>,
    pub low_power_mode: Option<bool>,
    pub min_recognition_interval_ms: Option<u64>,
    pub max_recognition_interval_ms: Option<u64>,
    pub target_process_time_ms: Option<u64>,
}

impl RuntimeSettings {
    /// Parse settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: RuntimeSettings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the kiosk loop cannot operate with
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Error {
            Error::Config(msg.into())
        }

        if !(0.0..=1.0).contains(&self.detection_score_threshold) {
            return Err(invalid(format!(
                "detection_score_threshold must be within 0.0-1.0, got {}",
                self.detection_score_threshold
            )));
        }
        if !self.embedding_distance_threshold.is_finite() || self.embedding_distance_threshold <= 0.0 {
            return Err(invalid(format!(
                "embedding_distance_threshold must be positive, got {}",
                self.embedding_distance_threshold
            )));
        }
        if !self.upscale_factor.is_finite() || self.upscale_factor < 1.0 {
            return Err(invalid(format!(
                "upscale_factor must be at least 1.0, got {}",
                self.upscale_factor
            )));
        }
        if !self.audio_cooldown_seconds.is_finite() || self.audio_cooldown_seconds < 0.0 {
            return Err(invalid(format!(
                "audio_cooldown_seconds must be non-negative, got {}",
                self.audio_cooldown_seconds
            )));
        }
        if self.camera_fps == 0 {
            return Err(invalid("camera_fps must be at least 1"));
        }
        if self.recognition_interval_ms == 0
            || self.min_recognition_interval_ms == 0
            || self.target_process_time_ms == 0
        {
            return Err(invalid("recognition intervals and target time must be non-zero"));
        }
        if self.min_recognition_interval_ms > self.max_recognition_interval_ms {
            return Err(invalid(format!(
                "min_recognition_interval_ms ({}) exceeds max_recognition_interval_ms ({})",
                self.min_recognition_interval_ms, self.max_recognition_interval_ms
            )));
        }
        if let Some(mask) = self
            .camera_masks
            .iter()
            .find(|m| !m.is_finite() || m.width < 0.0 || m.height < 0.0)
        {
            return Err(invalid(format!("invalid camera mask {:?}", mask)));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result without
    /// modifying `self`
    pub fn apply_update(&self, update: RuntimeSettingsUpdate) -> Result<Self> {
        let mut next = self.clone();
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = update.$field { next.$field = v; })*
            };
        }
        set!(
            detection_score_threshold,
            embedding_distance_threshold,
            upscale_factor,
            skip_upscale_retry,
            audio_cooldown_seconds,
            camera_fps,
            camera_masks,
            mirror_feed,
            kiosk_enabled,
            recognition_interval_ms,
            low_power_mode,
            min_recognition_interval_ms,
            max_recognition_interval_ms,
            target_process_time_ms,
        );
        next.validate()?;
        Ok(next)
    }

    pub fn recognition_interval(&self) -> Duration {
        Duration::from_millis(self.recognition_interval_ms)
    }

    pub fn min_recognition_interval(&self) -> Duration {
        Duration::from_millis(self.min_recognition_interval_ms)
    }

    pub fn max_recognition_interval(&self) -> Duration {
        Duration::from_millis(self.max_recognition_interval_ms)
    }

    pub fn target_process_time(&self) -> Duration {
        Duration::from_millis(self.target_process_time_ms)
    }

    /// Target period of one capture tick
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.camera_fps.max(1)))
    }
}

/// Shared holder for the current [`RuntimeSettings`]
///
/// Readers take cheap snapshots; the file (if any) is re-read by
/// [`SettingsStore::refresh_if_changed`] when its modification time moves.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<RuntimeSettings>,
    last_modified: RwLock<Option<SystemTime>>,
}

impl SettingsStore {
    /// In-memory store with no backing file
    pub fn in_memory(settings: RuntimeSettings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
            last_modified: RwLock::new(None),
        }
    }

    /// Store backed by a TOML file
    ///
    /// A missing file is created with defaults. An invalid file is an error
    /// at startup (later reloads keep the previous snapshot instead).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            RuntimeSettings::load(&path)?
        } else {
            info!(
                "Runtime settings file {} not found, writing defaults",
                path.display()
            );
            let defaults = RuntimeSettings::default();
            defaults.save(&path)?;
            defaults
        };

        let modified = modified_time(&path);
        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
            last_modified: RwLock::new(modified),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> RuntimeSettings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a partial update and persist it when file-backed
    pub fn update(&self, update: RuntimeSettingsUpdate) -> Result<RuntimeSettings> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = current.apply_update(update)?;

        if let Some(path) = &self.path {
            next.save(path)?;
            *self.last_modified.write().unwrap_or_else(PoisonError::into_inner) = modified_time(path);
        }

        *current = next.clone();
        info!("Runtime settings updated");
        Ok(next)
    }

    /// Re-read the backing file if it changed since the last load
    ///
    /// Returns true when a new snapshot was installed.
    pub fn refresh_if_changed(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };

        let modified = modified_time(path);
        {
            let last = self.last_modified.read().unwrap_or_else(PoisonError::into_inner);
            if modified.is_none() || *last == modified {
                return false;
            }
        }
        *self.last_modified.write().unwrap_or_else(PoisonError::into_inner) = modified;

        match RuntimeSettings::load(path) {
            Ok(settings) => {
                let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                if *current == settings {
                    return false;
                }
                *current = settings;
                info!("Reloaded runtime settings from {}", path.display());
                true
            }
            Err(e) => {
                warn!(
                    "Ignoring invalid runtime settings in {}: {}",
                    path.display(),
                    e
                );
                false
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
