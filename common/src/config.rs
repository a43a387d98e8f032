use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outbound cadence and encode settings shared by every connected client.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_fps")]
    pub fps: f64,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `127.0.0.1:<port>` for local-only, `0.0.0.0:<port>` for all interfaces.
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoiseConfig {
    #[serde(default = "default_noise_side")]
    pub width: u32,
    #[serde(default = "default_noise_side")]
    pub height: u32,
    #[serde(default = "default_noise_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_url")]
    pub url: String,
    /// Stop after this many frames. Zero runs until interrupted.
    #[serde(default)]
    pub max_frames: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_stream_fps(),
            quality: default_quality(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            width: default_noise_side(),
            height: default_noise_side(),
            fps: default_noise_fps(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            max_frames: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StreamConfig {
    /// Minimum time between two parts sent to one client.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

impl NoiseConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fps("stream.fps", self.stream.fps)?;
        check_fps("noise.fps", self.noise.fps)?;
        if !(1..=100).contains(&self.stream.quality) {
            return Err(ConfigError::Invalid(format!(
                "stream.quality must be within 1..=100, got {}",
                self.stream.quality
            )));
        }
        if self.noise.width == 0 || self.noise.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "noise dimensions must be non-zero, got {}x{}",
                self.noise.width, self.noise.height
            )));
        }
        Ok(())
    }
}

fn check_fps(field: &str, fps: f64) -> Result<(), ConfigError> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a positive number, got {fps}"
        )));
    }
    // frame_interval() converts 1/fps, which must fit a Duration
    if Duration::try_from_secs_f64(1.0 / fps).is_err() {
        return Err(ConfigError::Invalid(format!(
            "{field} is too small for a frame interval, got {fps}"
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_stream_fps() -> f64 {
    20.0
}
fn default_quality() -> u8 {
    75
}
fn default_bind() -> String {
    "127.0.0.1:8888".into()
}
fn default_noise_side() -> u32 {
    500
}
fn default_noise_fps() -> f64 {
    30.0
}
fn default_probe_url() -> String {
    "http://127.0.0.1:8888/".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.stream.frame_interval(), Duration::from_millis(50));
        assert_eq!(config.stream.quality, 75);
        assert_eq!(config.server.bind, "127.0.0.1:8888");
        assert_eq!((config.noise.width, config.noise.height), (500, 500));
        assert_eq!(config.probe.max_frames, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [stream]
            fps = 10.0

            [server]
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.frame_interval(), Duration::from_millis(100));
        assert_eq!(config.stream.quality, 75);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn rejects_non_positive_fps() {
        let err = Config::parse("[stream]\nfps = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = Config::parse("[noise]\nfps = -3.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_tiny_fps() {
        let err = Config::parse("[stream]\nfps = 1e-300\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = Config::parse("[noise]\nfps = 1e-300\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let slow = Config::parse("[stream]\nfps = 0.5\n").unwrap();
        assert_eq!(slow.stream.frame_interval(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let err = Config::parse("[stream]\nquality = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_noise_dimensions() {
        let err = Config::parse("[noise]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::parse("[stream\nfps = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("mjpeg-config-does-not-exist.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.stream.fps, 20.0);
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::ReadFile(..)
        ));
    }
}
