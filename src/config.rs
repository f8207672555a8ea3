/// Coordinator configuration
///
/// Loaded from frigate-ptz.toml (working directory) or an explicit path, with
/// env-var overrides. Env format: FRIGATE_PTZ__SECTION__KEY (double underscore
/// separators).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::topics::DEFAULT_ROOT;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_topic_prefix() -> String {
    DEFAULT_ROOT.to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            topic_prefix: default_topic_prefix(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("frigate-ptz-{}", chrono::Utc::now().timestamp()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Window for every request/response round trip on the bus
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Health-check poke cadence
    #[serde(default = "default_poke_interval_secs")]
    pub poke_interval_secs: u64,
    /// How long startup waits for the first broker ack
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_response_timeout_ms() -> u64 {
    5000
}
fn default_poke_interval_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            poke_interval_secs: default_poke_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poke_interval(&self) -> Duration {
        Duration::from_secs(self.poke_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    /// Steady-state motion detection
    #[serde(default = "default_enabled")]
    pub motion: bool,
    /// Steady-state object detection; requires `motion`
    #[serde(default = "default_enabled")]
    pub detect: bool,
    #[serde(default)]
    pub rehome: RehomeConfig,
    #[serde(default)]
    pub patrol: PatrolConfig,
}

fn default_enabled() -> bool {
    true
}

impl CameraConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            motion: default_enabled(),
            detect: default_enabled(),
            rehome: RehomeConfig::default(),
            patrol: PatrolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RehomeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rehome_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_home_preset")]
    pub preset: String,
    #[serde(default = "default_slew_secs")]
    pub slew_secs: u64,
}

fn default_rehome_interval_secs() -> u64 {
    600
}
fn default_home_preset() -> String {
    "home".to_string()
}
fn default_slew_secs() -> u64 {
    5
}

impl Default for RehomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_rehome_interval_secs(),
            preset: default_home_preset(),
            slew_secs: default_slew_secs(),
        }
    }
}

impl RehomeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn slew(&self) -> Duration {
        Duration::from_secs(self.slew_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatrolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_patrol_interval_secs")]
    pub interval_secs: u64,
    /// Ordered preset names
    #[serde(default)]
    pub route: Vec<String>,
    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: u64,
    #[serde(default = "default_slew_secs")]
    pub slew_secs: u64,
    /// Dwell intervals to wait out tracked objects before moving on anyway
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,
}

fn default_patrol_interval_secs() -> u64 {
    1800
}
fn default_dwell_secs() -> u64 {
    30
}
fn default_max_deferrals() -> u32 {
    5
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_patrol_interval_secs(),
            route: Vec::new(),
            dwell_secs: default_dwell_secs(),
            slew_secs: default_slew_secs(),
            max_deferrals: default_max_deferrals(),
        }
    }
}

impl PatrolConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }

    pub fn slew(&self) -> Duration {
        Duration::from_secs(self.slew_secs)
    }
}

impl AppConfig {
    /// Reject configurations the coordinator cannot run safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(invalid("no cameras configured"));
        }
        if self.mqtt.topic_prefix.trim_matches('/').is_empty() {
            return Err(invalid("mqtt.topic_prefix must not be empty"));
        }
        if self.timing.response_timeout_ms == 0 || self.timing.poke_interval_secs == 0 {
            return Err(invalid("timing values must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for cam in &self.cameras {
            if cam.name.trim().is_empty() {
                return Err(invalid("camera name must not be empty"));
            }
            if cam.name.contains('/') || cam.name.contains('+') || cam.name.contains('#') {
                return Err(invalid(format!("camera name {:?} is not a valid topic level", cam.name)));
            }
            if !seen.insert(cam.name.as_str()) {
                return Err(invalid(format!("camera {:?} configured twice", cam.name)));
            }
            if cam.detect && !cam.motion {
                return Err(invalid(format!("camera {}: detect requires motion", cam.name)));
            }
            if cam.rehome.enabled {
                if cam.rehome.preset.trim().is_empty() {
                    return Err(invalid(format!("camera {}: rehome enabled without a preset", cam.name)));
                }
                if cam.rehome.interval_secs == 0 {
                    return Err(invalid(format!("camera {}: rehome interval must be > 0", cam.name)));
                }
            }
            if cam.patrol.enabled {
                if cam.patrol.route.is_empty() {
                    return Err(invalid(format!("camera {}: patrol enabled with an empty route", cam.name)));
                }
                if cam.patrol.interval_secs == 0 {
                    return Err(invalid(format!("camera {}: patrol interval must be > 0", cam.name)));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Load configuration from frigate-ptz.toml (or `path`) + environment variable
/// overrides, then validate it.
///
/// Search order:
///   1. `path` if given (required), else ./frigate-ptz.toml (optional)
///   2. Environment variables: FRIGATE_PTZ__MQTT__HOST, etc.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("frigate-ptz").required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("FRIGATE_PTZ")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app = settings.try_deserialize::<AppConfig>()?;
    app.validate()?;
    Ok(app)
}
