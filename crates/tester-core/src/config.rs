//! Simulator configuration
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a Tester that behaves like the one the PC software was
//! written against.
//!
//! # Example
//! ```toml
//! [transport]
//! socket_path = "/tmp/tester-sim.sock"
//!
//! [timing]
//! reply_delay_ms = 20
//!
//! [[ecus]]
//! id = 145
//! protocol = "kwp71"
//! iso_keyword = "550081"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ProtocolType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Artificial latencies
    #[serde(default)]
    pub timing: TimingConfig,

    /// Tester identity reported to the PC
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Compatibility switches for observed firmware quirks
    #[serde(default)]
    pub compat: CompatConfig,

    /// ECU registry (empty = built-in table)
    #[serde(default)]
    pub ecus: Vec<EcuDef>,
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Unix domain socket carrying the serial link
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// File the flash filesystem is loaded from and saved to
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_socket_path() -> String {
    "/tmp/tester-sim.sock".to_string()
}

fn default_state_file() -> String {
    "sd2-saved-state".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            state_file: default_state_file(),
        }
    }
}

// =============================================================================
// Timing Configuration
// =============================================================================

/// Latencies the PC software expects from real hardware
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause before every reply
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,

    /// Extra pause when an ECU application thread is started
    #[serde(default = "default_start_application_delay_ms")]
    pub start_application_delay_ms: u64,

    /// Extra pause on every command forwarded to the ECU
    #[serde(default = "default_ecu_command_delay_ms")]
    pub ecu_command_delay_ms: u64,
}

fn default_reply_delay_ms() -> u64 {
    20
}
fn default_start_application_delay_ms() -> u64 {
    500
}
fn default_ecu_command_delay_ms() -> u64 {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: default_reply_delay_ms(),
            start_application_delay_ms: default_start_application_delay_ms(),
            ecu_command_delay_ms: default_ecu_command_delay_ms(),
        }
    }
}

impl TimingConfig {
    /// No artificial latency at all (tests, fast replay).
    pub fn immediate() -> Self {
        Self {
            reply_delay_ms: 0,
            start_application_delay_ms: 0,
            ecu_command_delay_ms: 0,
        }
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn start_application_delay(&self) -> Duration {
        Duration::from_millis(self.start_application_delay_ms)
    }

    pub fn ecu_command_delay(&self) -> Duration {
        Duration::from_millis(self.ecu_command_delay_ms)
    }
}

// =============================================================================
// Identity Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Tester serial number
    #[serde(default = "default_serial_number")]
    pub serial_number: u16,

    /// Free space reported on the flash storage
    #[serde(default = "default_free_flash")]
    pub free_flash: u32,

    /// Workshop name (first 10 bytes are reported)
    #[serde(default = "default_workshop_name")]
    pub workshop_name: String,

    /// Workshop code (first 9 bytes are reported)
    #[serde(default = "default_workshop_code")]
    pub workshop_code: String,
}

fn default_serial_number() -> u16 {
    212
}
fn default_free_flash() -> u32 {
    0x0023_3333
}
fn default_workshop_name() -> String {
    "abcdefghij".to_string()
}
fn default_workshop_code() -> String {
    "klmnopqrs".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            serial_number: default_serial_number(),
            free_flash: default_free_flash(),
            workshop_name: default_workshop_name(),
            workshop_code: default_workshop_code(),
        }
    }
}

// =============================================================================
// Compatibility Switches
// =============================================================================

/// Firmware quirks that the PC software may depend on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatConfig {
    /// Leave the reply as an echo of the request when nothing handles a
    /// command (no ECU selected, reserved protocol, missing keyword record,
    /// unrecognized Bosch request). When off, such commands get a plain
    /// success reply instead.
    #[serde(default = "default_true")]
    pub echo_unhandled_requests: bool,

    /// Marelli "read value" reads RAM at the value code instead of the
    /// separate value table.
    #[serde(default = "default_true")]
    pub alias_value_reads_to_ram: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            echo_unhandled_requests: true,
            alias_value_reads_to_ram: true,
        }
    }
}

// =============================================================================
// ECU Definitions
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuDef {
    /// ECU ID as selected by the PC (supports 145 or "0x91")
    #[serde(deserialize_with = "deserialize_hex_u16")]
    pub id: u16,

    pub protocol: ProtocolType,

    /// Keyword bytes returned by the 5-baud init (supports "550081" or [85, 0, 129])
    #[serde(default, deserialize_with = "deserialize_hex_bytes_vec")]
    pub iso_keyword: Vec<u8>,

    /// Extra bytes sent right after the keyword
    #[serde(default, deserialize_with = "deserialize_hex_bytes_vec")]
    pub extra_init_info: Vec<u8>,
}

// =============================================================================
// Hex Parsing Helpers
// =============================================================================

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Deserialize a hex u16 (supports "0x0091" or 145)
fn deserialize_hex_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u16),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => {
            u16::from_str_radix(strip_hex_prefix(&s), 16).map_err(|e| D::Error::custom(e.to_string()))
        }
    }
}

/// Deserialize hex bytes (supports "550081", "" or [0x55, 0x00, 0x81])
fn deserialize_hex_bytes_vec<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexBytes {
        Hex(String),
        Array(Vec<u8>),
    }

    match HexBytes::deserialize(deserializer)? {
        HexBytes::Array(arr) => Ok(arr),
        HexBytes::Hex(s) => {
            hex::decode(strip_hex_prefix(&s)).map_err(|e| D::Error::custom(e.to_string()))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
