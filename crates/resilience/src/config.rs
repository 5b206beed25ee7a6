use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ResilienceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Preset the other fields start from when loaded with [`ResilienceConfig::from_json`]
    pub mode: OperationMode,

    // Retry
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter_factor: f64,

    // Fallbacks
    pub enable_regex_fallback: bool,
    pub enable_hybrid_mode: bool,

    // Cache
    pub enable_caching: bool,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub min_confidence_for_cache: f64,

    // Chunking
    pub enable_chunking: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_concurrent_chunk_calls: usize,

    pub context_reduction_ratio: f64,
    /// Upper bound on the whole retry sequence; unbounded when absent
    pub overall_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Fewer retries, lenient caching, a bounded deadline
    Fast,
    /// More retries and no cache
    Accurate,
    #[default]
    Balanced,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter_factor: 0.1,
            enable_regex_fallback: true,
            enable_hybrid_mode: true,
            enable_caching: true,
            cache_ttl_seconds: 3600,
            cache_max_entries: 1000,
            min_confidence_for_cache: 0.7,
            enable_chunking: true,
            chunk_size: 4000,
            chunk_overlap: 200,
            max_concurrent_chunk_calls: 3,
            context_reduction_ratio: 0.75,
            overall_deadline_ms: None,
        }
    }
}

impl ResilienceConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            cache_max_entries: 50_000,
            min_confidence_for_cache: 0.5,
            max_concurrent_chunk_calls: 10,
            overall_deadline_ms: Some(30_000),
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            max_retries: 5,
            initial_delay_ms: 2000,
            max_delay_ms: 20_000,
            enable_caching: false,
            cache_max_entries: 0,
            max_concurrent_chunk_calls: 2,
            ..Self::default()
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Parse a partial JSON config. Fields that are absent come from the
    /// preset named by `mode`, or from the balanced defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parse_error = |e: serde_json::Error| ResilienceError::invalid_config(e.to_string());

        let overrides: Value = serde_json::from_str(raw).map_err(parse_error)?;
        let Value::Object(overrides) = overrides else {
            return Err(ResilienceError::invalid_config("config must be a JSON object"));
        };
        let mode = match overrides.get("mode") {
            Some(mode) => OperationMode::deserialize(mode).map_err(parse_error)?,
            None => OperationMode::default(),
        };

        let mut merged = serde_json::to_value(Self::for_mode(mode)).map_err(parse_error)?;
        if let Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }
        serde_json::from_value(merged).map_err(parse_error)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ResilienceError::invalid_config("max_retries must be at least 1"));
        }
        if self.exponential_base < 1.0 {
            return Err(ResilienceError::invalid_config("exponential_base must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ResilienceError::invalid_config("jitter_factor must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_for_cache) {
            return Err(ResilienceError::invalid_config(
                "min_confidence_for_cache must be within [0, 1]",
            ));
        }
        if !(self.context_reduction_ratio > 0.0 && self.context_reduction_ratio < 1.0) {
            return Err(ResilienceError::invalid_config(
                "context_reduction_ratio must be within (0, 1)",
            ));
        }
        if self.enable_chunking && self.chunk_overlap >= self.chunk_size {
            return Err(ResilienceError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.enable_caching && self.cache_max_entries == 0 {
            return Err(ResilienceError::invalid_config(
                "cache_max_entries must be positive when caching is enabled",
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn overall_deadline(&self) -> Option<Duration> {
        self.overall_deadline_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
        assert!(ResilienceConfig::fast_mode().validate().is_ok());
        assert!(ResilienceConfig::accurate_mode().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_chunking() {
        let config = ResilienceConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ResilienceError::InvalidConfig { .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ResilienceConfig =
            serde_json::from_str(r#"{"max_retries": 5, "mode": "fast"}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.mode, OperationMode::Fast);
        assert_eq!(config.chunk_size, 4000);
    }

    #[test]
    fn test_mode_selects_preset_under_overrides() {
        let config = ResilienceConfig::from_json(r#"{"mode": "fast", "max_retries": 4}"#).unwrap();
        assert_eq!(config.mode, OperationMode::Fast);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.max_delay_ms, 5000);
        assert_eq!(config.overall_deadline_ms, Some(30_000));

        let config = ResilienceConfig::from_json(r#"{"mode": "accurate"}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(!config.enable_caching);
        assert!(config.validate().is_ok());

        let config = ResilienceConfig::from_json(r#"{"chunk_size": 2000}"#).unwrap();
        assert_eq!(config.mode, OperationMode::Balanced);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.chunk_size, 2000);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        for raw in ["[1, 2]", r#"{"mode": "reckless"}"#, "{not json"] {
            assert!(matches!(
                ResilienceConfig::from_json(raw),
                Err(ResilienceError::InvalidConfig { .. })
            ));
        }
    }
}
