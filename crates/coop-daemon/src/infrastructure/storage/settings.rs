//! TOML-based settings persistence for the daemon.
//!
//! Reads and writes [`Settings`] at the platform-appropriate config file:
//! - Linux:    `$XDG_CONFIG_HOME/lancoop/settings.toml` (or `~/.config/...`)
//! - Windows:  `%APPDATA%\LanCoop\settings.toml`
//! - macOS:    `~/Library/Application Support/LanCoop/settings.toml`
//!
//! A missing file yields defaults, and every field carries a serde default so
//! old files keep loading after new fields appear.  The machine identity is
//! generated on first load and written straight back, so the uuid announced
//! on the LAN is stable across restarts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on the remembered recently-cooperated machine list.
pub const MAX_COOPERATED_MACHINES: usize = 5;

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The settings could not be serialized to TOML.
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Stable machine identity announced on the LAN; generated on first run.
    #[serde(default)]
    pub machine_id: String,
    /// Whether clipboard content is shared with paired machines.
    #[serde(default = "default_true")]
    pub shared_clipboard: bool,
    /// Whether input devices flow to paired machines at screen edges.
    #[serde(default = "default_true")]
    pub shared_devices: bool,
    /// Where accepted file transfers land.
    #[serde(default = "default_storage_path")]
    pub files_storage_path: PathBuf,
    /// Machines this daemon has cooperated with, oldest first.
    #[serde(default)]
    pub cooperated_machine_ids: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            machine_id: String::new(),
            shared_clipboard: default_true(),
            shared_devices: default_true(),
            files_storage_path: default_storage_path(),
            cooperated_machine_ids: Vec::new(),
        }
    }
}

impl Settings {
    /// Records a cooperation with `uuid`: moves it to the back of the list,
    /// evicting the oldest entry once the bound is reached.
    pub fn record_cooperated(&mut self, uuid: &str) {
        self.cooperated_machine_ids.retain(|id| id != uuid);
        self.cooperated_machine_ids.push(uuid.to_string());
        while self.cooperated_machine_ids.len() > MAX_COOPERATED_MACHINES {
            self.cooperated_machine_ids.remove(0);
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// ── Settings repository ───────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the settings file.
///
/// # Errors
///
/// Returns [`SettingsError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn settings_dir() -> Result<PathBuf, SettingsError> {
    platform_config_dir().ok_or(SettingsError::NoPlatformConfigDir)
}

/// Resolves the full path to the settings file.
///
/// # Errors
///
/// Returns [`SettingsError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn settings_file_path() -> Result<PathBuf, SettingsError> {
    Ok(settings_dir()?.join("settings.toml"))
}

/// Loads settings from disk, bootstrapping identity on first run.
///
/// A missing file yields defaults.  If the loaded settings carry no
/// `machine_id` yet, one is generated and persisted immediately so the
/// identity survives the first restart.
///
/// # Errors
///
/// Returns [`SettingsError::Io`] for file-system errors other than
/// "not found", and [`SettingsError::Parse`] if the TOML is malformed.
pub fn load_settings() -> Result<Settings, SettingsError> {
    let path = settings_file_path()?;

    let mut settings = match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(e) => return Err(SettingsError::Io { path, source: e }),
    };

    if settings.machine_id.is_empty() {
        settings.machine_id = Uuid::new_v4().to_string();
        save_settings(&settings)?;
    }
    Ok(settings)
}

/// Persists `settings` to disk, creating the directory if needed.
///
/// # Errors
///
/// Returns [`SettingsError::Io`] for file-system failures or
/// [`SettingsError::Serialize`] if serialization fails.
pub fn save_settings(settings: &Settings) -> Result<(), SettingsError> {
    let path = settings_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(settings)?;
    std::fs::write(&path, content).map_err(|source| SettingsError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Persistence seam for the cooperation service.
///
/// The daemon saves through [`FileSettingsStore`]; tests substitute an
/// in-memory recorder so no test touches the real config directory.
pub trait SettingsStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the settings cannot be written.
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Stores settings at the platform config path via [`save_settings`].
#[derive(Default)]
pub struct FileSettingsStore;

impl SettingsStore for FileSettingsStore {
    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        save_settings(settings)
    }
}

/// Resolves the platform config base directory including our subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanCoop"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lancoop"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanCoop")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
