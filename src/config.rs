//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WaspiError};
use crate::messenger::mqtt::{qos_from_level, MqttSettings};
use crate::recorder::RecorderSettings;
use crate::sensor::receiver::ReceiverSettings;
use crate::sensor::report::ReportSchema;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub schema: ReportSchema,
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub close_after_acquire: bool,
}

/// Broker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    pub topic: String,

    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,

    #[serde(default = "default_mqtt_timeout_ms")]
    pub timeout_ms: u64,
}

/// Secondary recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,

    #[serde(default = "default_recording_hwid")]
    pub hwid: String,

    #[serde(default = "default_recording_device")]
    pub device: String,

    #[serde(default = "default_recording_command")]
    pub command: String,

    #[serde(default = "default_recording_duration_s")]
    pub duration_s: u32,

    #[serde(default = "default_samplerate")]
    pub samplerate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_recording_dir")]
    pub output_dir: PathBuf,

    /// 0 records every cycle
    #[serde(default)]
    pub interval_s: u64,
}

/// Local store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,
}

/// Cycle timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_max_serial_timeout_s")]
    pub max_serial_timeout_s: u64,

    #[serde(default = "default_break_s")]
    pub break_s: u64,

    #[serde(default = "default_max_cycle_overhead_s")]
    pub max_cycle_overhead_s: u64,
}

/// Sync lock configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_enabled")]
    pub enabled: bool,

    #[serde(default = "default_lock_path")]
    pub path: PathBuf,

    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,

    #[serde(default = "default_max_wait_s")]
    pub max_wait_s: u64,
}

/// Heartbeat configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_topic")]
    pub topic: String,

    #[serde(default = "default_heartbeat_interval_s")]
    pub interval_s: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily rolling log files are written here when set
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 50 }
fn default_frame_timeout_ms() -> u64 { 500 }
fn default_tick_interval_ms() -> u64 { 10 }

fn default_mqtt_port() -> u16 { 1883 }
fn default_client_id() -> String { "waspi".to_string() }
fn default_qos() -> u8 { 1 }
fn default_keep_alive_s() -> u64 { 30 }
fn default_mqtt_timeout_ms() -> u64 { 5000 }

fn default_recording_enabled() -> bool { true }
fn default_recording_hwid() -> String { "accel_0".to_string() }
fn default_recording_device() -> String { "plughw:1,0".to_string() }
fn default_recording_command() -> String { "arecord".to_string() }
fn default_recording_duration_s() -> u32 { 60 }
fn default_samplerate() -> u32 { 16000 }
fn default_channels() -> u16 { 2 }
fn default_recording_dir() -> PathBuf { PathBuf::from("recordings") }

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_max_records_per_file() -> usize { 10000 }

fn default_max_serial_timeout_s() -> u64 { 20 }
fn default_break_s() -> u64 { 5 }
fn default_max_cycle_overhead_s() -> u64 { 5 }

fn default_lock_enabled() -> bool { true }
fn default_lock_path() -> PathBuf { PathBuf::from(crate::lock::DEFAULT_LOCK_PATH) }
fn default_poll_interval_s() -> u64 { 5 }
fn default_max_wait_s() -> u64 { 300 }

fn default_heartbeat_topic() -> String { "waspi/heartbeat".to_string() }
fn default_heartbeat_interval_s() -> u64 { 360 }

fn default_log_level() -> String { "info".to_string() }

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: default_recording_enabled(),
            hwid: default_recording_hwid(),
            device: default_recording_device(),
            command: default_recording_command(),
            duration_s: default_recording_duration_s(),
            samplerate: default_samplerate(),
            channels: default_channels(),
            output_dir: default_recording_dir(),
            interval_s: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_records_per_file: default_max_records_per_file(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_serial_timeout_s: default_max_serial_timeout_s(),
            break_s: default_break_s(),
            max_cycle_overhead_s: default_max_cycle_overhead_s(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: default_lock_enabled(),
            path: default_lock_path(),
            poll_interval_s: default_poll_interval_s(),
            max_wait_s: default_max_wait_s(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_heartbeat_topic(),
            interval_s: default_heartbeat_interval_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use waspi::config::Config;
    ///
    /// let config = Config::load("config/waspi.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial
        if self.serial.port.is_empty() {
            return Err(config_error("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(config_error(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10000 {
            return Err(config_error("read_timeout_ms must be between 1 and 10000"));
        }

        if self.serial.frame_timeout_ms == 0 || self.serial.frame_timeout_ms > 60000 {
            return Err(config_error("frame_timeout_ms must be between 1 and 60000"));
        }

        if self.serial.tick_interval_ms > 1000 {
            return Err(config_error("tick_interval_ms must be at most 1000"));
        }

        // Report schema
        self.schema.validate()?;

        // Broker
        if self.mqtt.host.is_empty() {
            return Err(config_error("mqtt host cannot be empty"));
        }

        if self.mqtt.topic.is_empty() {
            return Err(config_error("mqtt topic cannot be empty"));
        }

        if qos_from_level(self.mqtt.qos).is_none() {
            return Err(config_error("mqtt qos must be 0, 1 or 2"));
        }

        if self.mqtt.timeout_ms == 0 || self.mqtt.timeout_ms > 60000 {
            return Err(config_error("mqtt timeout_ms must be between 1 and 60000"));
        }

        // Recording
        if self.recording.enabled {
            if self.recording.duration_s == 0 {
                return Err(config_error("recording duration_s must be greater than 0"));
            }

            if self.recording.samplerate == 0 {
                return Err(config_error("recording samplerate must be greater than 0"));
            }

            if self.recording.channels == 0 {
                return Err(config_error("recording channels must be greater than 0"));
            }

            if self.recording.command.is_empty() || self.recording.device.is_empty() {
                return Err(config_error("recording command and device cannot be empty"));
            }
        }

        // Storage
        if self.storage.max_records_per_file == 0 {
            return Err(config_error("max_records_per_file must be greater than 0"));
        }

        // Timing
        if self.timing.max_serial_timeout_s == 0 {
            return Err(config_error("max_serial_timeout_s must be greater than 0"));
        }

        // Lock
        if self.lock.enabled {
            if self.lock.poll_interval_s == 0 {
                return Err(config_error("lock poll_interval_s must be greater than 0"));
            }

            if self.lock.max_wait_s < self.lock.poll_interval_s {
                return Err(config_error("lock max_wait_s must be at least poll_interval_s"));
            }
        }

        // Heartbeat
        if self.heartbeat.enabled && self.heartbeat.interval_s == 0 {
            return Err(config_error("heartbeat interval_s must be greater than 0"));
        }

        Ok(())
    }

    /// Receiver port settings
    pub fn receiver_settings(&self) -> ReceiverSettings {
        ReceiverSettings {
            port: self.serial.port.clone(),
            baud_rate: self.serial.baud_rate,
            tick_interval: Duration::from_millis(self.serial.tick_interval_ms),
            close_after_acquire: self.serial.close_after_acquire,
        }
    }

    /// Broker settings for the telemetry topic
    ///
    /// # Errors
    ///
    /// Returns error if the QoS level is invalid
    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        let qos = qos_from_level(self.mqtt.qos)
            .ok_or_else(|| config_error("mqtt qos must be 0, 1 or 2"))?;

        Ok(MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            topic: self.mqtt.topic.clone(),
            qos,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_s),
            timeout: Duration::from_millis(self.mqtt.timeout_ms),
        })
    }

    /// Recorder settings
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            command: self.recording.command.clone(),
            device: self.recording.device.clone(),
            duration_s: self.recording.duration_s,
            samplerate: self.recording.samplerate,
            channels: self.recording.channels,
            output_dir: self.recording.output_dir.clone(),
        }
    }
}

fn config_error(msg: impl Into<String>) -> WaspiError {
    WaspiError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::report::{FieldSpec, PROTOCOL_V2};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    /// Helper function to create a valid test configuration
    fn create_valid_config() -> Config {
        Config {
            serial: SerialConfig {
                port: default_serial_port(),
                baud_rate: default_baud_rate(),
                read_timeout_ms: default_read_timeout_ms(),
                frame_timeout_ms: default_frame_timeout_ms(),
                tick_interval_ms: default_tick_interval_ms(),
                close_after_acquire: false,
            },
            schema: ReportSchema {
                protocol_version: PROTOCOL_V2,
                fields: vec![FieldSpec::f32("temp_0"), FieldSpec::f32("hum_0")],
            },
            mqtt: MqttConfig {
                host: "localhost".to_string(),
                port: default_mqtt_port(),
                username: None,
                password: None,
                client_id: default_client_id(),
                topic: "waspi/telemetry".to_string(),
                qos: default_qos(),
                keep_alive_s: default_keep_alive_s(),
                timeout_ms: default_mqtt_timeout_ms(),
            },
            recording: RecordingConfig::default(),
            storage: StorageConfig::default(),
            timing: TimingConfig::default(),
            lock: LockConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert_ok!(config.validate());
        assert_eq!(config.timing.max_serial_timeout_s, 20);
        assert_eq!(config.timing.break_s, 5);
        assert_eq!(config.recording.duration_s, 60);
        assert_eq!(config.heartbeat.interval_s, 360);
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000;
        assert_err!(config.validate());
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = create_valid_config();
        config.serial.port = String::new();
        assert_err!(config.validate());
    }

    #[test]
    fn test_invalid_qos() {
        let mut config = create_valid_config();
        config.mqtt.qos = 3;
        assert_err!(config.validate());
        assert_err!(config.mqtt_settings());
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut config = create_valid_config();
        config.schema.fields.push(FieldSpec::f32("temp_0"));
        assert!(matches!(config.validate(), Err(WaspiError::Config(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = create_valid_config();
        config.serial.read_timeout_ms = 0;
        assert_err!(config.validate());

        let mut config = create_valid_config();
        config.mqtt.timeout_ms = 0;
        assert_err!(config.validate());

        let mut config = create_valid_config();
        config.timing.max_serial_timeout_s = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_disabled_recording_skips_checks() {
        let mut config = create_valid_config();
        config.recording.enabled = false;
        config.recording.duration_s = 0;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_lock_wait_shorter_than_poll() {
        let mut config = create_valid_config();
        config.lock.poll_interval_s = 10;
        config.lock.max_wait_s = 5;
        assert_err!(config.validate());
    }

    #[test]
    fn test_derived_settings() {
        let config = create_valid_config();

        let receiver = config.receiver_settings();
        assert_eq!(receiver.port, "/dev/ttyACM0");
        assert_eq!(receiver.tick_interval, Duration::from_millis(10));

        let mqtt = config.mqtt_settings().unwrap();
        assert_eq!(mqtt.qos, rumqttc::QoS::AtLeastOnce);
        assert_eq!(mqtt.timeout, Duration::from_secs(5));

        let recorder = config.recorder_settings();
        assert_eq!(recorder.command, "arecord");
        assert_eq!(recorder.samplerate, 16000);
    }

    #[test]
    fn test_load_minimal_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[serial]
port = "auto"

[schema]
protocol_version = 2
[[schema.fields]]
hwid = "temp_0"
[[schema.fields]]
hwid = "hum_0"

[mqtt]
host = "broker.local"
topic = "hive/1"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.serial.port, "auto");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.schema.fields.len(), 2);
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.lock.enabled);
        assert!(!config.heartbeat.enabled);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[serial\nport = ").unwrap();
        assert!(matches!(Config::load(file.path()), Err(WaspiError::Toml(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/waspi.toml"),
            Err(WaspiError::Io(_))
        ));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/waspi.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.schema.fields.len(), 8);
        assert_eq!(config.schema.fields[0].hwid, "weight_scale");
    }
}
