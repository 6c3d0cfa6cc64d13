//! Configuration Vault – reads/writes `~/.twinsync/config.toml`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use twinsync_hal::{Camera, CameraRegistry, FileCamera, HttpSnapshotCamera};
use twinsync_memory::history::MemoryConfig;
use twinsync_memory::patterns::PatternAnalyzer;
use twinsync_runtime::{SpotSettings, VisionDriverConfig};
use twinsync_types::{SpotConfig, SpotError};

/// Where a camera's stills come from.
///
/// ```toml
/// [[cameras]]
/// id = "desk_cam"
/// kind = "http"
/// url = "http://192.168.1.20/snapshot.jpg"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CameraConfig {
    File { id: String, path: PathBuf },
    Http { id: String, url: String },
}

impl CameraConfig {
    pub fn id(&self) -> &str {
        match self {
            CameraConfig::File { id, .. } | CameraConfig::Http { id, .. } => id,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.id().trim().is_empty() {
            return Err("camera entry has an empty id".to_string());
        }
        match self {
            CameraConfig::File { id, path } if path.as_os_str().is_empty() => {
                Err(format!("camera '{id}' has an empty path"))
            }
            CameraConfig::Http { id, url } if url.trim().is_empty() => {
                Err(format!("camera '{id}' has an empty url"))
            }
            _ => Ok(()),
        }
    }

    fn build(&self, timeout: Duration) -> Arc<dyn Camera> {
        match self {
            CameraConfig::File { id, path } => Arc::new(FileCamera::new(id.clone(), path.clone())),
            CameraConfig::Http { id, url } => {
                Arc::new(HttpSnapshotCamera::new(id.clone(), url.clone(), timeout))
            }
        }
    }
}

/// Persisted user configuration stored in `~/.twinsync/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible vision endpoint.
    #[serde(default = "default_vision_url")]
    pub vision_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Vision API key. Wiped from memory on drop; never printed.
    #[serde(
        default,
        skip_serializing_if = "secret_is_empty",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub api_key: Zeroizing<String>,

    /// Bound on capture plus classification, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Classifier request budget shared by all spots.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// SQLite ledger location.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Offset from UTC used for calendar days and weekdays.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Occurrences within the window before an item counts as recurring.
    #[serde(default = "default_recurring_threshold")]
    pub recurring_threshold: u32,

    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Checks a weekday needs before hardest/best-day claims are made.
    #[serde(default = "default_min_samples")]
    pub min_samples_per_weekday: u32,

    /// Hours without a completed check before a spot is flagged overdue.
    #[serde(default = "default_overdue_hours")]
    pub overdue_hours: u32,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub spots: Vec<SpotConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("vision_url", &self.vision_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("db_path", &self.db_path)
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .field("retention_days", &self.retention_days)
            .field("recurring_threshold", &self.recurring_threshold)
            .field("top_n", &self.top_n)
            .field("min_samples_per_weekday", &self.min_samples_per_weekday)
            .field("overdue_hours", &self.overdue_hours)
            .field("cameras", &self.cameras)
            .field("spots", &self.spots)
            .finish()
    }
}

fn secret_is_empty(secret: &Zeroizing<String>) -> bool {
    secret.is_empty()
}

fn serialize_secret<S: Serializer>(secret: &Zeroizing<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret)
}

fn deserialize_secret<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<String>, D::Error> {
    String::deserialize(d).map(Zeroizing::new)
}

fn default_vision_url() -> String {
    twinsync_runtime::vision_driver::DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    twinsync_runtime::vision_driver::DEFAULT_MODEL.to_string()
}
fn default_timeout_secs() -> u64 {
    90
}
fn default_requests_per_minute() -> u32 {
    15
}
fn default_db_path() -> PathBuf {
    twinsync_dir().join("twinsync.db")
}
fn default_retention_days() -> u32 {
    30
}
fn default_recurring_threshold() -> u32 {
    3
}
fn default_top_n() -> usize {
    5
}
fn default_min_samples() -> u32 {
    3
}
fn default_overdue_hours() -> u32 {
    48
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vision_url: default_vision_url(),
            model: default_model(),
            api_key: Zeroizing::new(String::new()),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            db_path: default_db_path(),
            utc_offset_minutes: 0,
            retention_days: default_retention_days(),
            recurring_threshold: default_recurring_threshold(),
            top_n: default_top_n(),
            min_samples_per_weekday: default_min_samples(),
            overdue_hours: default_overdue_hours(),
            cameras: Vec::new(),
            spots: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived runtime settings
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn overdue_after(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.overdue_hours))
    }

    /// Memory, analyzer and timeout settings shared by every spot.
    pub fn spot_settings(&self) -> Result<SpotSettings, String> {
        if self.retention_days == 0 {
            return Err("retention_days must be at least 1".to_string());
        }
        let offset = chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            format!("utc_offset_minutes = {} is out of range", self.utc_offset_minutes)
        })?;
        Ok(SpotSettings {
            check_timeout: self.check_timeout(),
            memory: MemoryConfig {
                retention: chrono::Duration::days(i64::from(self.retention_days)),
                offset,
            },
            analyzer: PatternAnalyzer {
                recurring_threshold: self.recurring_threshold.max(1),
                top_n: self.top_n,
                min_samples_per_weekday: self.min_samples_per_weekday.max(1),
            },
        })
    }

    pub fn vision_config(&self) -> VisionDriverConfig {
        VisionDriverConfig {
            base_url: self.vision_url.clone(),
            model: self.model.clone(),
            api_key: (!self.api_key.is_empty()).then(|| self.api_key.to_string()),
            timeout: self.check_timeout(),
            requests_per_minute: self.requests_per_minute,
        }
    }

    /// Build a registry from the valid `[[cameras]]` entries. Invalid or
    /// duplicate entries are returned as problems and skipped.
    pub fn camera_registry(&self) -> (CameraRegistry, Vec<String>) {
        let mut registry = CameraRegistry::new();
        let mut problems = Vec::new();
        for camera in &self.cameras {
            if let Err(e) = camera.validate() {
                problems.push(e);
            } else if registry.contains(camera.id()) {
                problems.push(format!("duplicate camera id '{}'", camera.id()));
            } else {
                registry.register(camera.build(self.check_timeout()));
            }
        }
        (registry, problems)
    }

    /// Split `[[spots]]` into schedulable entries and rejected ones.
    ///
    /// A spot is rejected for an invalid definition, voice or cadence, a
    /// camera missing from `cameras`, or an id already taken by an earlier
    /// entry. Rejections never affect the other spots.
    pub fn partition_spots(&self, cameras: &CameraRegistry) -> (Vec<SpotConfig>, Vec<(String, SpotError)>) {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();
        for spot in &self.spots {
            let outcome = spot.validate().and_then(|_| {
                if !cameras.contains(&spot.camera) {
                    return Err(SpotError::Configuration(format!(
                        "spot '{}' references unknown camera '{}'",
                        spot.name, spot.camera
                    )));
                }
                if !seen.insert(spot.id()) {
                    return Err(SpotError::Configuration(format!(
                        "duplicate spot id '{}'",
                        spot.id()
                    )));
                }
                Ok(())
            });
            match outcome {
                Ok(()) => valid.push(spot.clone()),
                Err(e) => rejected.push((spot.name.clone(), e)),
            }
        }
        (valid, rejected)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn twinsync_dir() -> PathBuf {
    PathBuf::from(home_dir()).join(".twinsync")
}

/// Return the path to `~/.twinsync/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".twinsync").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

pub(crate) fn parse(raw: &str) -> Result<Config, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `TWINSYNC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TWINSYNC_VISION_URL` | `vision_url` |
/// | `TWINSYNC_MODEL` | `model` |
/// | `TWINSYNC_API_KEY` | `api_key` |
/// | `TWINSYNC_DB_PATH` | `db_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TWINSYNC_VISION_URL") {
        cfg.vision_url = v;
    }
    if let Ok(v) = std::env::var("TWINSYNC_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("TWINSYNC_API_KEY") {
        cfg.api_key = Zeroizing::new(v);
    }
    if let Ok(v) = std::env::var("TWINSYNC_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }
}

/// Save the config to disk, creating `~/.twinsync/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_types::{Cadence, VoicePolicy};

    const SAMPLE: &str = r#"
model = "gpt-4o-mini"
utc_offset_minutes = 60

[[cameras]]
id = "desk_cam"
kind = "file"
path = "/tmp/desk.jpg"

[[cameras]]
id = "hall_cam"
kind = "http"
url = "http://10.0.0.5/snapshot.jpg"

[[spots]]
name = "Work Desk"
camera = "desk_cam"
spot_type = "work"
definition = "Expected: laptop, notebook\nNo mugs"
voice = "analytical"
cadence = { times_per_day = 2 }

[[spots]]
name = "Hallway"
camera = "hall_cam"
definition = "Shoes on the rack"
voice = { custom = "{spot}: {to_sort_count} left" }
cadence = { every_hours = 6 }
"#;

    #[test]
    fn config_debug_redacts_api_key() {
        let cfg = Config {
            api_key: Zeroizing::new("sk-super-secret".to_string()),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-super-secret"), "api key must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            api_key: Zeroizing::new("sk-abc".to_string()),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let raw = std::fs::read_to_string(&path).unwrap();
        let loaded = parse(&raw).expect("parse");
        assert_eq!(loaded.timeout_secs, 90);
        assert_eq!(loaded.requests_per_minute, 15);
        assert_eq!(loaded.retention_days, 30);
        assert_eq!(loaded.overdue_hours, 48);
        assert_eq!(loaded.api_key.as_str(), "sk-abc");
        assert_eq!(loaded.model, twinsync_runtime::vision_driver::DEFAULT_MODEL);
    }

    #[test]
    fn empty_api_key_is_not_written() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("api_key"));
    }

    #[test]
    fn config_path_points_to_twinsync_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".twinsync"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn parses_cameras_and_spots() {
        let cfg = parse(SAMPLE).expect("parse");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[1].id(), "hall_cam");
        assert!(matches!(cfg.cameras[0], CameraConfig::File { .. }));

        let desk = &cfg.spots[0];
        assert_eq!(desk.id(), "work_desk");
        assert_eq!(desk.voice, VoicePolicy::Analytical);
        assert_eq!(desk.cadence, Cadence::TimesPerDay(2));

        let hall = &cfg.spots[1];
        assert_eq!(hall.voice, VoicePolicy::Custom("{spot}: {to_sort_count} left".into()));
        assert_eq!(hall.cadence, Cadence::EveryHours(6));
    }

    #[test]
    fn valid_spots_pass_partition() {
        let cfg = parse(SAMPLE).unwrap();
        let (cameras, problems) = cfg.camera_registry();
        assert!(problems.is_empty());
        let (valid, rejected) = cfg.partition_spots(&cameras);
        assert_eq!(valid.len(), 2);
        assert!(rejected.is_empty());
    }

    #[test]
    fn invalid_spots_are_rejected_individually() {
        let mut cfg = parse(SAMPLE).unwrap();
        let base = cfg.spots[0].clone();
        cfg.spots.push(SpotConfig {
            name: "Empty".into(),
            definition: "   ".into(),
            ..base.clone()
        });
        cfg.spots.push(SpotConfig {
            name: "Nowhere".into(),
            camera: "garage_cam".into(),
            ..base.clone()
        });
        cfg.spots.push(SpotConfig {
            name: "work desk".into(),
            ..base.clone()
        });
        cfg.spots.push(SpotConfig {
            name: "Zero".into(),
            cadence: Cadence::TimesPerDay(0),
            ..base.clone()
        });
        cfg.spots.push(SpotConfig {
            name: "Templated".into(),
            voice: VoicePolicy::Custom("{mood}".into()),
            ..base
        });

        let (cameras, _) = cfg.camera_registry();
        let (valid, rejected) = cfg.partition_spots(&cameras);
        assert_eq!(valid.len(), 2);
        assert_eq!(rejected.len(), 5);
        assert!(matches!(rejected[0].1, SpotError::InvalidDefinition(_)));
        assert!(rejected[1..].iter().all(|(_, e)| matches!(e, SpotError::Configuration(_))));
    }

    #[test]
    fn duplicate_and_blank_cameras_are_skipped() {
        let mut cfg = parse(SAMPLE).unwrap();
        cfg.cameras.push(CameraConfig::Http {
            id: "desk_cam".into(),
            url: "http://elsewhere/snap.jpg".into(),
        });
        cfg.cameras.push(CameraConfig::File {
            id: "blank".into(),
            path: PathBuf::new(),
        });
        let (cameras, problems) = cfg.camera_registry();
        assert_eq!(problems.len(), 2);
        assert_eq!(cameras.ids().len(), 2);
    }

    #[test]
    fn spot_settings_reflect_config() {
        let cfg = parse(SAMPLE).unwrap();
        let settings = cfg.spot_settings().unwrap();
        assert_eq!(settings.check_timeout, Duration::from_secs(90));
        assert_eq!(settings.memory.retention, chrono::Duration::days(30));
        assert_eq!(settings.memory.offset.local_minus_utc(), 3600);
        assert_eq!(settings.analyzer.top_n, 5);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let cfg = Config {
            utc_offset_minutes: 24 * 60,
            ..Config::default()
        };
        assert!(cfg.spot_settings().is_err());
    }

    #[test]
    fn vision_config_omits_blank_key() {
        let cfg = Config::default();
        assert!(cfg.vision_config().api_key.is_none());
        let cfg = Config {
            api_key: Zeroizing::new("k".into()),
            requests_per_minute: 4,
            ..Config::default()
        };
        let vision = cfg.vision_config();
        assert_eq!(vision.api_key.as_deref(), Some("k"));
        assert_eq!(vision.requests_per_minute, 4);
    }

    #[test]
    fn apply_env_overrides_changes_model_and_db_path() {
        // SAFETY: no other test in this crate reads these variables.
        unsafe {
            std::env::set_var("TWINSYNC_MODEL", "llava");
            std::env::set_var("TWINSYNC_DB_PATH", "/var/lib/twinsync/ledger.db");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.model, "llava");
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/twinsync/ledger.db"));
        unsafe {
            std::env::remove_var("TWINSYNC_MODEL");
            std::env::remove_var("TWINSYNC_DB_PATH");
        }
    }

    #[test]
    fn apply_env_overrides_sets_api_key() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::set_var("TWINSYNC_API_KEY", "from-env") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api_key.as_str(), "from-env");
        unsafe { std::env::remove_var("TWINSYNC_API_KEY") };
    }
}
