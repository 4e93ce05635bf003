//! Persistent configuration.
//!
//! Stored as JSON under the user config directory
//! (`~/.config/vizbridge/config.json`), or wherever `VIZBRIDGE_CONFIG`
//! points.  Every field has a default, so an absent file or a partial one
//! is fine.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{
    ENCODER_1_HEADER, ENCODER_2_HEADER, Header, SWITCH_1_HEADER, SWITCH_2_HEADER,
};

pub const CONFIG_ENV: &str = "VIZBRIDGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub i2c: I2cConfig,
    pub gpio: GpioConfig,
    pub spectrum: SpectrumConfig,
    pub dispatch: DispatchConfig,
    /// Main loop pause between spectrum frames.
    pub tick_ms: u64,
    pub mpd: MpdConfig,
    pub bluetooth: BluetoothConfig,
    pub oled: OledConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c: I2cConfig::default(),
            gpio: GpioConfig::default(),
            spectrum: SpectrumConfig::default(),
            dispatch: DispatchConfig::default(),
            tick_ms: 10,
            mpd: MpdConfig::default(),
            bluetooth: BluetoothConfig::default(),
            oled: OledConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct I2cConfig {
    pub enabled: bool,
    pub bus_path: String,
    /// 7-bit address of the display microcontroller.
    pub address: u8,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bus_path: "/dev/i2c-1".into(),
            address: 0x13,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub led_pin: Option<u32>,
    /// Software-PWM duty cycle for the LED, in percent.
    pub led_duty: u8,
    pub encoders: Vec<EncoderConfig>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".into(),
            led_pin: Some(16),
            led_duty: 80,
            encoders: vec![
                EncoderConfig::new(17, 22, 27, ENCODER_1_HEADER, SWITCH_1_HEADER),
                EncoderConfig::new(23, 24, 26, ENCODER_2_HEADER, SWITCH_2_HEADER),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    pub clk: u32,
    pub dt: u32,
    pub sw: u32,
    pub encoder_header: Header,
    pub switch_header: Header,
    #[serde(default = "default_rotary_debounce")]
    pub rotary_debounce_ms: u64,
    #[serde(default = "default_switch_debounce")]
    pub switch_debounce_ms: u64,
    /// Raw Gray-code transitions per mechanical detent.
    #[serde(default = "default_steps_per_detent")]
    pub steps_per_detent: u8,
    /// Number of logical positions before the value wraps.
    #[serde(default = "default_positions")]
    pub positions: u8,
}

fn default_rotary_debounce() -> u64 {
    1
}

fn default_switch_debounce() -> u64 {
    300
}

fn default_steps_per_detent() -> u8 {
    4
}

fn default_positions() -> u8 {
    5
}

impl EncoderConfig {
    pub fn new(clk: u32, dt: u32, sw: u32, encoder_header: Header, switch_header: Header) -> Self {
        Self {
            clk,
            dt,
            sw,
            encoder_header,
            switch_header,
            rotary_debounce_ms: default_rotary_debounce(),
            switch_debounce_ms: default_switch_debounce(),
            steps_per_detent: default_steps_per_detent(),
            positions: default_positions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectrumConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Bytes per frame, one per bar.
    pub bars: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            command: "cava".into(),
            args: vec!["-p".into(), "/etc/cava.conf".into()],
            bars: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum characters per text field.
    pub max_length: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_length: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MpdConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".into(),
            port: 6600,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BluetoothConfig {
    pub enabled: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OledConfig {
    pub enabled: bool,
    pub left_spi: String,
    pub right_spi: String,
    pub left_dc: u32,
    pub left_rst: u32,
    pub right_dc: u32,
    pub right_rst: u32,
}

impl Default for OledConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            left_spi: "/dev/spidev0.0".into(),
            right_spi: "/dev/spidev1.0".into(),
            left_dc: 25,
            left_rst: 24,
            right_dc: 23,
            right_rst: 18,
        }
    }
}

impl Config {
    /// `$VIZBRIDGE_CONFIG`, else `<config dir>/vizbridge/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("vizbridge").join("config.json"))
    }

    /// Load from the default location.  Never fails: problems are logged and
    /// defaults are used instead.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            log::warn!("No config directory available, using defaults");
            return Self::default();
        };
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::error!("{e}; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |reason: String| ConfigError::Write {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| write_err(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=255).contains(&self.spectrum.bars) {
            return Err(ConfigError::Invalid(format!(
                "spectrum.bars must be 1..=255, got {}",
                self.spectrum.bars
            )));
        }
        // 63 chars of 4-byte UTF-8 still fit in the length byte.
        if !(1..=63).contains(&self.dispatch.max_length) {
            return Err(ConfigError::Invalid(format!(
                "dispatch.max_length must be 1..=63, got {}",
                self.dispatch.max_length
            )));
        }
        let mut headers = HashSet::new();
        for enc in &self.gpio.encoders {
            if !headers.insert(enc.encoder_header) || !headers.insert(enc.switch_header) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate encoder/switch header in encoder on pins {}/{}",
                    enc.clk, enc.dt
                )));
            }
            if enc.steps_per_detent == 0 || enc.positions == 0 {
                return Err(ConfigError::Invalid(
                    "encoder steps_per_detent and positions must be non-zero".into(),
                ));
            }
        }
        if !(1..=100).contains(&self.gpio.led_duty) {
            return Err(ConfigError::Invalid(format!(
                "gpio.led_duty must be 1..=100, got {}",
                self.gpio.led_duty
            )));
        }
        if self.i2c.address > 0x7F {
            return Err(ConfigError::Invalid(format!(
                "i2c.address 0x{:02X} is not a 7-bit address",
                self.i2c.address
            )));
        }
        Ok(())
    }
}
