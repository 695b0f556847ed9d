use crate::controller::controller_handle::CollectorSettings;
use crate::mapping::button::ButtonSettings;
use crate::mapping::deadzone::{FilterSettings, YAxis};
use crate::mapping::ledger::KeyTimeouts;
use crate::mapping::pipeline::PipelineSettings;
use crate::mapping::{ActionMapping, EngineSettings, ProfileRegistry, DEFAULT_PROFILE};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "joykeys";
const CONFIG_FILE: &str = "config.toml";

const CONFIG_HEADER: &str = "\
# joykeys configuration
#
# Custom profiles go into [[profiles]] tables, a profile named like a built-in
# one (wasd, arrows, ijhl) replaces it. Run `joykeys --list-profiles` to see them.

";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    /// Fester Port, sonst automatische Erkennung
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 100,
            reconnect_delay_ms: 2000,
            settle_delay_ms: 2000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    pub deadzone: i32,
    pub hysteresis: i32,
    pub y_axis: YAxis,
    pub sanity_bound: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let filter = FilterSettings::default();
        Self {
            deadzone: filter.deadzone,
            hysteresis: filter.hysteresis,
            y_axis: filter.y_axis,
            sanity_bound: crate::controller::event_classifier::DEFAULT_SANITY_BOUND,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub direction_timeout_ms: u64,
    pub button_timeout_ms: u64,
    pub long_press_threshold_ms: u64,
    pub debounce_ms: u64,
    pub tap_pulse_ms: u64,
    pub hold_release_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            direction_timeout_ms: 150,
            button_timeout_ms: 150,
            long_press_threshold_ms: 200,
            debounce_ms: 100,
            tap_pulse_ms: 50,
            hold_release_ms: 150,
        }
    }
}

impl TimingConfig {
    fn entries(&self) -> [(&'static str, u64); 7] {
        [
            ("tick_ms", self.tick_ms),
            ("direction_timeout_ms", self.direction_timeout_ms),
            ("button_timeout_ms", self.button_timeout_ms),
            ("long_press_threshold_ms", self.long_press_threshold_ms),
            ("debounce_ms", self.debounce_ms),
            ("tap_pulse_ms", self.tap_pulse_ms),
            ("hold_release_ms", self.hold_release_ms),
        ]
    }
}

/// Inhalt der Konfigurationsdatei
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Aktives Profil beim Start
    pub profile: String,
    pub serial: SerialConfig,
    pub filter: FilterConfig,
    pub timing: TimingConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ActionMapping>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            serial: SerialConfig::default(),
            filter: FilterConfig::default(),
            timing: TimingConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.filter_settings()
            .validate()
            .map_err(|e| eyre!("Invalid [filter] section: {}", e))?;

        if self.filter.sanity_bound <= self.filter.deadzone {
            return Err(eyre!(
                "sanity_bound ({}) must be larger than deadzone ({})",
                self.filter.sanity_bound,
                self.filter.deadzone
            ));
        }

        for (name, value) in self.timing.entries() {
            if value == 0 {
                return Err(eyre!("[timing] {} must not be zero", name));
            }
        }

        if self.serial.baud_rate == 0 {
            return Err(eyre!("[serial] baud_rate must not be zero"));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            profile
                .validate()
                .map_err(|e| eyre!("Invalid profile '{}': {}", profile.name, e))?;
            if !seen.insert(profile.name.as_str()) {
                warn!(
                    "Profile '{}' is defined more than once, the last definition wins",
                    profile.name
                );
            }
        }

        Ok(())
    }

    /// Built-in profiles overlaid with the ones from the file
    pub fn registry(&self) -> Result<ProfileRegistry> {
        let mut registry = ProfileRegistry::with_builtins();
        for profile in &self.profiles {
            registry
                .insert(profile.clone())
                .map_err(|e| eyre!("Cannot register profile '{}': {}", profile.name, e))?;
        }
        Ok(registry)
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            deadzone: self.filter.deadzone,
            hysteresis: self.filter.hysteresis,
            y_axis: self.filter.y_axis,
        }
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            port: self.serial.port.clone(),
            baud_rate: self.serial.baud_rate,
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.serial.reconnect_delay_ms),
            settle_delay: Duration::from_millis(self.serial.settle_delay_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let timing = &self.timing;
        EngineSettings {
            pipeline: PipelineSettings {
                filter: self.filter_settings(),
                buttons: ButtonSettings {
                    long_press_threshold: Duration::from_millis(timing.long_press_threshold_ms),
                    button_timeout: Duration::from_millis(timing.button_timeout_ms),
                    debounce: Duration::from_millis(timing.debounce_ms),
                },
                timeouts: KeyTimeouts {
                    direction: Duration::from_millis(timing.direction_timeout_ms),
                    hold: Duration::from_millis(timing.hold_release_ms),
                    pulse: Duration::from_millis(timing.tap_pulse_ms),
                },
                sanity_bound: self.filter.sanity_bound,
            },
            tick: Duration::from_millis(timing.tick_ms),
        }
    }
}

/// `<config dir>/joykeys/config.toml`, falling back to the current directory
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Loads the config file, writing the defaults first if it does not exist yet
pub async fn load_or_create(path: &Path) -> Result<BridgeConfig> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        return BridgeConfig::from_toml(&content);
    }

    let config = BridgeConfig::default();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }

    let content = toml::to_string_pretty(&config)
        .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
    tokio::fs::write(path, format!("{}{}", CONFIG_HEADER, content))
        .await
        .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;

    info!("Wrote default config to {}", path.display());
    Ok(config)
}
