/// Machine configuration from leadscrew.yaml
///
/// A `default` block holds the settings shared by every machine; an entry
/// under `hosts` keyed by hostname overrides individual keys. Required keys
/// fail loudly.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_yaml;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::ControllerSettings;
use crate::tables::{Leadscrew, MachineGeometry};

#[allow(non_snake_case)]
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub PANEL_PORT: Option<String>,
    pub PANEL_BAUD: Option<u32>,
    pub PANEL_READY_TIMEOUT_MS: Option<u64>,
    pub EEPROM_BASE_OFFSET: Option<u32>,
    pub EEPROM_ACK_TIMEOUT_MS: Option<u64>,
    pub ENCODER_RESOLUTION: Option<u32>,
    pub ENCODER_MAX_COUNT: Option<u32>,
    pub STEPPER_RESOLUTION: Option<u32>,
    pub STEPPER_MICROSTEPS: Option<u32>,
    pub LEADSCREW_TPI: Option<u32>,
    // Leadscrew pitch in hundredths of a millimetre
    pub LEADSCREW_HMM: Option<u32>,
    pub TICK_PERIOD_US: Option<u64>,
    pub POLL_PERIOD_MS: Option<u64>,
    // Absent means no stepper link; positions are simulated
    pub STEPPER_PORT: Option<String>,
    pub STEPPER_BAUD: Option<u32>,
    pub LIMIT_SWITCH_PIN: Option<u32>,
    pub GPIO_CHIP: Option<String>,
    pub CREDITS: Option<String>,
}

impl HostConfig {
    /// Keys set in `host` win over the ones in `self`.
    pub fn overlay(self, host: HostConfig) -> HostConfig {
        HostConfig {
            PANEL_PORT: host.PANEL_PORT.or(self.PANEL_PORT),
            PANEL_BAUD: host.PANEL_BAUD.or(self.PANEL_BAUD),
            PANEL_READY_TIMEOUT_MS: host.PANEL_READY_TIMEOUT_MS.or(self.PANEL_READY_TIMEOUT_MS),
            EEPROM_BASE_OFFSET: host.EEPROM_BASE_OFFSET.or(self.EEPROM_BASE_OFFSET),
            EEPROM_ACK_TIMEOUT_MS: host.EEPROM_ACK_TIMEOUT_MS.or(self.EEPROM_ACK_TIMEOUT_MS),
            ENCODER_RESOLUTION: host.ENCODER_RESOLUTION.or(self.ENCODER_RESOLUTION),
            ENCODER_MAX_COUNT: host.ENCODER_MAX_COUNT.or(self.ENCODER_MAX_COUNT),
            STEPPER_RESOLUTION: host.STEPPER_RESOLUTION.or(self.STEPPER_RESOLUTION),
            STEPPER_MICROSTEPS: host.STEPPER_MICROSTEPS.or(self.STEPPER_MICROSTEPS),
            // a host naming either leadscrew form replaces both
            LEADSCREW_TPI: if host.LEADSCREW_TPI.is_some() || host.LEADSCREW_HMM.is_some() {
                host.LEADSCREW_TPI
            } else {
                self.LEADSCREW_TPI
            },
            LEADSCREW_HMM: if host.LEADSCREW_TPI.is_some() || host.LEADSCREW_HMM.is_some() {
                host.LEADSCREW_HMM
            } else {
                self.LEADSCREW_HMM
            },
            TICK_PERIOD_US: host.TICK_PERIOD_US.or(self.TICK_PERIOD_US),
            POLL_PERIOD_MS: host.POLL_PERIOD_MS.or(self.POLL_PERIOD_MS),
            STEPPER_PORT: host.STEPPER_PORT.or(self.STEPPER_PORT),
            STEPPER_BAUD: host.STEPPER_BAUD.or(self.STEPPER_BAUD),
            LIMIT_SWITCH_PIN: host.LIMIT_SWITCH_PIN.or(self.LIMIT_SWITCH_PIN),
            GPIO_CHIP: host.GPIO_CHIP.or(self.GPIO_CHIP),
            CREDITS: host.CREDITS.or(self.CREDITS),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub default: Option<HostConfig>,
    pub hosts: Option<BTreeMap<String, HostConfig>>, // hostname -> overrides
}

/// leadscrew.yaml next to Cargo.toml
pub fn default_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("leadscrew.yaml")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Missing required leadscrew.yaml at {:?}: {}", path, e))?;
    let config: Config = serde_yaml::from_reader(file)
        .map_err(|e| anyhow!("Invalid config {:?}: {}", path, e))?;
    Ok(config)
}

/// The default block with this host's overrides applied.
pub fn host_config_for(config: &Config, hostname: &str) -> HostConfig {
    let base = config.default.clone().unwrap_or_default();
    match config.hosts.as_ref().and_then(|m| m.get(hostname)) {
        Some(host) => base.overlay(host.clone()),
        None => {
            log::info!(target: "config_loader", "no host entry for '{}', using defaults", hostname);
            base
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeadscrewSettings {
    pub panel_port: Option<String>,
    pub panel_baud: u32,
    pub panel_ready_timeout: Duration,
    pub eeprom_base_offset: u32,
    pub eeprom_ack_timeout: Duration,
    pub geometry: MachineGeometry,
    pub encoder_max_count: u32,
    pub tick_period: Duration,
    pub poll_period: Duration,
    pub stepper_port: Option<String>,
    pub stepper_baud: u32,
    pub limit_switch_pin: Option<u32>,
    pub gpio_chip: String,
    pub credits: String,
}

fn required(value: Option<u32>, key: &str, hostname: &str) -> Result<u32> {
    match value {
        Some(0) => Err(anyhow!("{} must be nonzero for '{}' in leadscrew.yaml", key, hostname)),
        Some(v) => Ok(v),
        None => Err(anyhow!("{} missing for '{}' in leadscrew.yaml", key, hostname)),
    }
}

impl LeadscrewSettings {
    pub fn from_host_config(cfg: &HostConfig, hostname: &str) -> Result<Self> {
        let leadscrew = match (cfg.LEADSCREW_TPI, cfg.LEADSCREW_HMM) {
            (Some(tpi), None) if tpi > 0 => Leadscrew::Tpi(tpi),
            (None, Some(hmm)) if hmm > 0 => Leadscrew::HundredthsMm(hmm),
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "Both LEADSCREW_TPI and LEADSCREW_HMM set for '{}' in leadscrew.yaml",
                    hostname
                ))
            }
            _ => {
                return Err(anyhow!(
                    "One nonzero LEADSCREW_TPI or LEADSCREW_HMM required for '{}' in leadscrew.yaml",
                    hostname
                ))
            }
        };

        let geometry = MachineGeometry {
            encoder_resolution: required(cfg.ENCODER_RESOLUTION, "ENCODER_RESOLUTION", hostname)?,
            stepper_resolution: required(cfg.STEPPER_RESOLUTION, "STEPPER_RESOLUTION", hostname)?,
            microsteps: required(cfg.STEPPER_MICROSTEPS, "STEPPER_MICROSTEPS", hostname)?,
            leadscrew,
        };
        let encoder_max_count = required(cfg.ENCODER_MAX_COUNT, "ENCODER_MAX_COUNT", hostname)?;

        let tick_us = cfg.TICK_PERIOD_US.unwrap_or(1000);
        if tick_us == 0 {
            return Err(anyhow!("TICK_PERIOD_US must be nonzero for '{}' in leadscrew.yaml", hostname));
        }

        let settings = Self {
            panel_port: cfg.PANEL_PORT.clone(),
            panel_baud: cfg.PANEL_BAUD.unwrap_or(38400),
            panel_ready_timeout: Duration::from_millis(cfg.PANEL_READY_TIMEOUT_MS.unwrap_or(2000)),
            eeprom_base_offset: cfg.EEPROM_BASE_OFFSET.unwrap_or(0),
            eeprom_ack_timeout: Duration::from_millis(cfg.EEPROM_ACK_TIMEOUT_MS.unwrap_or(250)),
            geometry,
            encoder_max_count,
            tick_period: Duration::from_micros(tick_us),
            poll_period: Duration::from_millis(cfg.POLL_PERIOD_MS.unwrap_or(20)),
            stepper_port: cfg.STEPPER_PORT.clone(),
            stepper_baud: cfg.STEPPER_BAUD.unwrap_or(115200),
            limit_switch_pin: cfg.LIMIT_SWITCH_PIN,
            gpio_chip: cfg.GPIO_CHIP.clone().unwrap_or_else(|| "/dev/gpiochip0".to_string()),
            credits: cfg
                .CREDITS
                .clone()
                .unwrap_or_else(|| format!("Electronic Leadscrew {}", env!("CARGO_PKG_VERSION"))),
        };
        log::info!(
            target: "config_loader",
            "{}: encoder {} counts/rev (wraps at {}), stepper {}x{}, leadscrew {:?}",
            hostname,
            geometry.encoder_resolution,
            encoder_max_count,
            geometry.stepper_resolution,
            geometry.microsteps,
            geometry.leadscrew
        );
        Ok(settings)
    }

    pub fn geometry(&self) -> MachineGeometry {
        self.geometry
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            encoder_resolution: self.geometry.encoder_resolution,
            ready_timeout: self.panel_ready_timeout,
            credits: self.credits.clone(),
        }
    }
}

/// Load and resolve settings for a hostname. Fails loudly if required keys
/// are missing.
pub fn load_leadscrew_settings(path: &Path, hostname: &str) -> Result<LeadscrewSettings> {
    let config = load_config(path)?;
    LeadscrewSettings::from_host_config(&host_config_for(&config, hostname), hostname)
}
