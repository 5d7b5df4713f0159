//! Parameter set loading.
//!
//! The on-disk format is TOML with one table per parameter group. Every group
//! is required: [`ParameterSet::from_toml_str`] rejects an incomplete file
//! instead of patching it, so the scorer only ever sees a complete
//! [`ParameterSet`]. Regenerating defaults is [`load_or_init`]'s job: a
//! missing file, or one lacking a whole group, is replaced by
//! [`DEFAULT_CONFIG_TOML`] (the old file is kept as `*.bak`).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Template written when no configuration file exists yet.
pub const DEFAULT_CONFIG_TOML: &str = r#"# groundlink configuration

[outgoing]
udp_ip = "10.5.0.10"
udp_port = 9999

[json]
HOST = "127.0.0.1"
PORT = 8103

[weights]
snr_weight = 0.5
rssi_weight = 0.5

[ranges]
SNR_MIN = 10
SNR_MAX = 36
RSSI_MIN = -85
RSSI_MAX = -40

[keyframe]
allow_idr = true
idr_max_messages = 20

["dynamic refinement"]
allow_penalty = false
allow_fec_increase = false

[noise]
min_noise = 0.01
max_noise = 0.1
deduction_exponent = 0.5
min_noise_for_fec_change = 0.01
noise_for_max_fec_change = 0.1

["error estimation"]
kalman_estimate = 0.005
kalman_error_estimate = 0.1
process_variance = 1e-5
measurement_variance = 0.01
"#;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing parameter group [{0}]")]
    MissingGroup(&'static str),
    #[error("invalid parameter: {0}")]
    Invalid(String),
}

// ── Resolved parameter set ──────────────────────────────────────────

/// A `host:port` pair as written in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Weights {
    pub snr_weight: f64,
    pub rssi_weight: f64,
}

/// Normalization bounds for the best antenna's SNR (dB) and RSSI (dBm).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ranges {
    #[serde(rename = "SNR_MIN")]
    pub snr_min: i32,
    #[serde(rename = "SNR_MAX")]
    pub snr_max: i32,
    #[serde(rename = "RSSI_MIN")]
    pub rssi_min: i32,
    #[serde(rename = "RSSI_MAX")]
    pub rssi_max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyframePolicy {
    /// Request a keyframe whenever a sample reports lost packets.
    pub allow_idr: bool,
    /// Number of consecutive messages that carry one keyframe code.
    pub idr_max_messages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Refinement {
    pub allow_penalty: bool,
    pub allow_fec_increase: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoiseThresholds {
    pub min_noise: f64,
    pub max_noise: f64,
    pub deduction_exponent: f64,
    pub min_noise_for_fec_change: f64,
    pub noise_for_max_fec_change: f64,
}

/// Priors and tuning for the scalar noise filter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KalmanPriors {
    #[serde(rename = "kalman_estimate")]
    pub estimate: f64,
    #[serde(rename = "kalman_error_estimate")]
    pub error_estimate: f64,
    pub process_variance: f64,
    pub measurement_variance: f64,
}

/// Complete, validated configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    /// Where scored datagrams are sent.
    pub udp_target: Endpoint,
    /// The radio-statistics daemon serving JSON lines.
    pub stats_source: Endpoint,
    pub weights: Weights,
    pub ranges: Ranges,
    pub keyframe: KeyframePolicy,
    pub refinement: Refinement,
    pub noise: NoiseThresholds,
    pub kalman: KalmanPriors,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            udp_target: Endpoint {
                host: "10.5.0.10".into(),
                port: 9999,
            },
            stats_source: Endpoint {
                host: "127.0.0.1".into(),
                port: 8103,
            },
            weights: Weights {
                snr_weight: 0.5,
                rssi_weight: 0.5,
            },
            ranges: Ranges {
                snr_min: 10,
                snr_max: 36,
                rssi_min: -85,
                rssi_max: -40,
            },
            keyframe: KeyframePolicy {
                allow_idr: true,
                idr_max_messages: 20,
            },
            refinement: Refinement {
                allow_penalty: false,
                allow_fec_increase: false,
            },
            noise: NoiseThresholds {
                min_noise: 0.01,
                max_noise: 0.1,
                deduction_exponent: 0.5,
                min_noise_for_fec_change: 0.01,
                noise_for_max_fec_change: 0.1,
            },
            kalman: KalmanPriors {
                estimate: 0.005,
                error_estimate: 0.1,
                process_variance: 1e-5,
                measurement_variance: 0.01,
            },
        }
    }
}

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct OutgoingInput {
    udp_ip: String,
    udp_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonSourceInput {
    #[serde(rename = "HOST")]
    host: String,
    #[serde(rename = "PORT")]
    port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParameterSetInput {
    outgoing: Option<OutgoingInput>,
    json: Option<JsonSourceInput>,
    weights: Option<Weights>,
    ranges: Option<Ranges>,
    keyframe: Option<KeyframePolicy>,
    #[serde(rename = "dynamic refinement")]
    refinement: Option<Refinement>,
    noise: Option<NoiseThresholds>,
    #[serde(rename = "error estimation")]
    kalman: Option<KalmanPriors>,
}

impl ParameterSetInput {
    pub fn resolve(self) -> Result<ParameterSet, ConfigError> {
        let outgoing = self
            .outgoing
            .ok_or(ConfigError::MissingGroup("outgoing"))?;
        let json = self.json.ok_or(ConfigError::MissingGroup("json"))?;

        let params = ParameterSet {
            udp_target: Endpoint {
                host: outgoing.udp_ip.trim().to_string(),
                port: outgoing.udp_port,
            },
            stats_source: Endpoint {
                host: json.host.trim().to_string(),
                port: json.port,
            },
            weights: self.weights.ok_or(ConfigError::MissingGroup("weights"))?,
            ranges: self.ranges.ok_or(ConfigError::MissingGroup("ranges"))?,
            keyframe: self
                .keyframe
                .ok_or(ConfigError::MissingGroup("keyframe"))?,
            refinement: self
                .refinement
                .ok_or(ConfigError::MissingGroup("dynamic refinement"))?,
            noise: self.noise.ok_or(ConfigError::MissingGroup("noise"))?,
            kalman: self
                .kalman
                .ok_or(ConfigError::MissingGroup("error estimation"))?,
        };
        params.validate()?;
        Ok(params)
    }
}

impl ParameterSet {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let parsed: ParameterSetInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Reject values that would make the scorer divide by zero or invert.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.udp_target.host.is_empty() {
            return Err(ConfigError::Invalid("outgoing.udp_ip is empty".into()));
        }
        if self.stats_source.host.is_empty() {
            return Err(ConfigError::Invalid("json.HOST is empty".into()));
        }
        if self.ranges.snr_max <= self.ranges.snr_min {
            return Err(ConfigError::Invalid(format!(
                "SNR_MAX ({}) must exceed SNR_MIN ({})",
                self.ranges.snr_max, self.ranges.snr_min
            )));
        }
        if self.ranges.rssi_max <= self.ranges.rssi_min {
            return Err(ConfigError::Invalid(format!(
                "RSSI_MAX ({}) must exceed RSSI_MIN ({})",
                self.ranges.rssi_max, self.ranges.rssi_min
            )));
        }
        if self.noise.max_noise <= self.noise.min_noise {
            return Err(ConfigError::Invalid(format!(
                "max_noise ({}) must exceed min_noise ({})",
                self.noise.max_noise, self.noise.min_noise
            )));
        }
        if !(self.kalman.process_variance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "process_variance must be positive, got {}",
                self.kalman.process_variance
            )));
        }
        if !(self.kalman.measurement_variance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "measurement_variance must be positive, got {}",
                self.kalman.measurement_variance
            )));
        }
        Ok(())
    }
}

/// Load the parameter set from `path`, regenerating the default template when
/// the file does not exist or lacks a whole group.
///
/// A file missing a group is moved to [`backup_path`] before the defaults are
/// written. Any other problem (bad TOML, a missing key, an invalid value) is
/// returned as is and the file is left alone.
pub fn load_or_init(path: &Path) -> Result<ParameterSet, ConfigError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "config not found, writing defaults");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    }
    let text = std::fs::read_to_string(path)?;
    match ParameterSet::from_toml_str(&text) {
        Err(ConfigError::MissingGroup(group)) => {
            let backup = backup_path(path);
            tracing::warn!(
                path = %path.display(),
                backup = %backup.display(),
                group,
                "config group missing, regenerating defaults"
            );
            std::fs::rename(path, &backup)?;
            std::fs::write(path, DEFAULT_CONFIG_TOML)?;
            ParameterSet::from_toml_str(DEFAULT_CONFIG_TOML)
        }
        other => other,
    }
}

/// Where [`load_or_init`] keeps a config file it replaced: `<path>.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}
