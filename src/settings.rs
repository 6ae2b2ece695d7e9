//! Persisted daemon options.
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{error::SettingsError, paths::Paths};

/// Typed view over `pueue.ini`.
///
/// The file uses INI-style sections; missing or unparseable files are
/// replaced with the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The `[default]` section.
    pub default: DefaultSection,
    /// The `[log]` section.
    pub log: LogSection,
}

/// Scheduling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultSection {
    /// Upper bound on concurrently running children.
    pub max_processes: usize,
    /// Pause the daemon when a command finishes with a non-zero returncode.
    pub stop_at_error: bool,
    /// Start scheduling right away even when a restored queue is non-empty.
    pub resume_after_start: bool,
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            max_processes: 1,
            stop_at_error: true,
            resume_after_start: false,
        }
    }
}

/// Log retention options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogSection {
    /// Maximum age of rotated session logs in seconds.
    pub log_time: u64,
}

impl Default for LogSection {
    fn default() -> Self {
        // Two weeks.
        Self { log_time: 1_209_600 }
    }
}

impl Settings {
    /// Loads the options file, writing defaults when it is missing or broken.
    pub fn load(paths: &Paths) -> Result<Self, SettingsError> {
        let file = paths.settings_file();
        match fs::read_to_string(&file) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(settings) => Ok(settings),
                Err(err) => {
                    warn!("Options file unparseable, rewriting defaults: {err}");
                    let settings = Settings::default();
                    settings.save(paths)?;
                    Ok(settings)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let settings = Settings::default();
                settings.save(paths)?;
                Ok(settings)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Persists the options atomically.
    pub fn save(&self, paths: &Paths) -> Result<(), SettingsError> {
        let file = paths.settings_file();
        let rendered = toml::to_string_pretty(self)?;
        let temp = file.with_extension("ini.tmp");
        fs::write(&temp, rendered)?;
        fs::rename(&temp, &file)?;
        Ok(())
    }

    /// Updates a single option from its client-supplied string value.
    pub fn set(&mut self, option: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
        };

        match option {
            "maxProcesses" => {
                let parsed: usize = value.parse().map_err(|_| invalid())?;
                if parsed == 0 {
                    return Err(invalid());
                }
                self.default.max_processes = parsed;
            }
            "stopAtError" => {
                self.default.stop_at_error = value.parse().map_err(|_| invalid())?;
            }
            "resumeAfterStart" => {
                self.default.resume_after_start = value.parse().map_err(|_| invalid())?;
            }
            "logTime" => {
                self.log.log_time = value.parse().map_err(|_| invalid())?;
            }
            _ => return Err(SettingsError::UnknownOption(option.to_string())),
        }

        Ok(())
    }
}
