//! Engine configuration.
//!
//! Supplied by the surrounding application, usually as YAML:
//!
//! ```yaml
//! gallery:
//!   dim: 512
//! resolver:
//!   reject_threshold: 0.4
//!   margin_threshold: 0.03
//! smoothing:
//!   k: 3
//!   m: 5
//!   ambiguity_limit: 3
//!   partial_presence: reject
//! ```

use std::path::Path;
use std::time::Duration;

use rollcall_gallery::GalleryConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Thresholds for [`crate::Resolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Best distance above this is `Unrecognized`. Default: 0.4.
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: f32,

    /// Best and second-best closer than this is `Ambiguous`. Default: 0.03.
    #[serde(default = "default_margin_threshold")]
    pub margin_threshold: f32,
}

fn default_reject_threshold() -> f32 {
    0.4
}

fn default_margin_threshold() -> f32 {
    0.03
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            reject_threshold: default_reject_threshold(),
            margin_threshold: default_margin_threshold(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.reject_threshold) {
            return Err(ConfigError::Invalid(format!(
                "reject_threshold must be in [0, 2], got {}",
                self.reject_threshold
            )));
        }
        if !(self.margin_threshold >= 0.0 && self.margin_threshold <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "margin_threshold must be in [0, 2], got {}",
                self.margin_threshold
            )));
        }
        Ok(())
    }
}

/// What happens to identities still pending when a session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPresence {
    /// No record; absence is the default outcome.
    #[default]
    Ignore,
    /// Emit an explicit `Rejected` record for identities seen at least once.
    Reject,
}

/// Temporal smoothing for [`crate::Tracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Accepted sightings required within the window. Default: 3.
    #[serde(default = "default_k")]
    pub k: usize,

    /// Window length in observations. Default: 5.
    #[serde(default = "default_m")]
    pub m: usize,

    /// Average accepted confidence required to confirm. Default: 0.6.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Ambiguous sightings tolerated before flagging for review. Default: 3.
    #[serde(default = "default_ambiguity_limit")]
    pub ambiguity_limit: usize,

    #[serde(default)]
    pub partial_presence: PartialPresence,
}

fn default_k() -> usize {
    3
}

fn default_m() -> usize {
    5
}

fn default_min_confidence() -> f32 {
    0.6
}

fn default_ambiguity_limit() -> usize {
    3
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            m: default_m(),
            min_confidence: default_min_confidence(),
            ambiguity_limit: default_ambiguity_limit(),
            partial_presence: PartialPresence::default(),
        }
    }
}

impl SmoothingConfig {
    /// Largest accepted window length.
    pub const MAX_WINDOW: usize = 1024;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 || self.m == 0 || self.k > self.m {
            return Err(ConfigError::Invalid(format!(
                "smoothing requires 0 < k <= m, got k={} m={}",
                self.k, self.m
            )));
        }
        if self.m > Self::MAX_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "smoothing window m={} exceeds {}",
                self.m,
                Self::MAX_WINDOW
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Delivery retry policy for [`crate::Dispatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attempts per record including the first. Default: 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled each time. Default: 100ms.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay. Default: 5000ms.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Top-level configuration consumed by [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub gallery: GalleryConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub smoothing: SmoothingConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl EngineConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            gallery: GalleryConfig::new(dim),
            resolver: ResolverConfig::default(),
            smoothing: SmoothingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gallery
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.resolver.validate()?;
        self.smoothing.validate()?;
        self.dispatch.validate()
    }

    /// Parses YAML (or JSON, which YAML accepts) and validates it.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a configuration file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            let cfg: Self =
                serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            cfg.validate()?;
            Ok(cfg)
        } else {
            Self::from_yaml(&text)
        }
    }
}

#[cfg(test)]
mod tests {
    use rollcall_gallery::ReferencePolicy;

    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let cfg = EngineConfig::from_yaml("gallery:\n  dim: 128\n").unwrap();
        assert_eq!(cfg.gallery.dim, 128);
        assert_eq!(cfg.gallery.reference_policy, ReferencePolicy::BestOfSet);
        assert_eq!(cfg.resolver, ResolverConfig::default());
        assert_eq!(cfg.smoothing.k, 3);
        assert_eq!(cfg.smoothing.m, 5);
        assert_eq!(cfg.smoothing.partial_presence, PartialPresence::Ignore);
    }

    #[test]
    fn test_yaml_overrides() {
        let cfg = EngineConfig::from_yaml(
            r#"
gallery:
  dim: 4
  reference_policy: centroid
resolver:
  reject_threshold: 0.5
  margin_threshold: 0.05
smoothing:
  k: 2
  m: 4
  partial_presence: reject
dispatch:
  max_attempts: 2
"#,
        )
        .unwrap();
        assert_eq!(cfg.gallery.reference_policy, ReferencePolicy::Centroid);
        assert_eq!(cfg.resolver.reject_threshold, 0.5);
        assert_eq!(cfg.smoothing.k, 2);
        assert_eq!(cfg.smoothing.partial_presence, PartialPresence::Reject);
        assert_eq!(cfg.dispatch.max_attempts, 2);
        assert_eq!(cfg.dispatch.initial_backoff_ms, 100);
    }

    #[test]
    fn test_invalid_smoothing_rejected() {
        let err = EngineConfig::from_yaml("gallery:\n  dim: 4\nsmoothing:\n  k: 6\n  m: 5\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_oversized_window_rejected() {
        let err = EngineConfig::from_yaml(
            "gallery:\n  dim: 4\nsmoothing:\n  k: 3\n  m: 1000000000000\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut cfg = EngineConfig::new(4);
        cfg.smoothing.m = SmoothingConfig::MAX_WINDOW;
        assert!(cfg.validate().is_ok());
        cfg.smoothing.m += 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut cfg = EngineConfig::new(4);
        cfg.resolver.reject_threshold = 2.5;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::new(4);
        cfg.resolver.margin_threshold = -0.1;
        assert!(cfg.validate().is_err());

        assert!(EngineConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_missing_dim_is_parse_error() {
        assert!(matches!(
            EngineConfig::from_yaml("resolver: {}\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let d = DispatchConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..DispatchConfig::default()
        };
        assert_eq!(d.backoff(1), Duration::from_millis(100));
        assert_eq!(d.backoff(2), Duration::from_millis(200));
        assert_eq!(d.backoff(3), Duration::from_millis(350));
        assert_eq!(d.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_load_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"gallery": {"dim": 8}}"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.gallery.dim, 8);
    }
}
