use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleKind {
    FaceArousalValence,
    FaceEmotion,
    FaceAttention,
    FaceDetector,
    AlarmNoFace,
    DataAggregator,
}

/// One engine module and its tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub module: ModuleKind,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl ModuleSpec {
    pub fn new(module: ModuleKind) -> Self {
        Self {
            module,
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }
}

pub fn default_modules() -> Vec<ModuleSpec> {
    vec![
        ModuleSpec::new(ModuleKind::FaceArousalValence).with("smoothness", 0.70),
        ModuleSpec::new(ModuleKind::FaceEmotion).with("smoothness", 0.40),
        ModuleSpec::new(ModuleKind::FaceAttention).with("smoothness", 0.83),
        ModuleSpec::new(ModuleKind::FaceDetector)
            .with("maxInputFrameSize", 320.0)
            .with("smoothness", 0.83),
        ModuleSpec::new(ModuleKind::AlarmNoFace)
            .with("timeWindowMs", 10000.0)
            .with("initialToleranceMs", 7000.0)
            .with("threshold", 0.75),
        ModuleSpec::new(ModuleKind::DataAggregator)
            .with("initialWaitMs", 2000.0)
            .with("periodMs", 1000.0),
    ]
}

/// Rejects specs the engine would silently misbehave on.
pub fn validate_modules(modules: &[ModuleSpec]) -> Result<()> {
    if modules.is_empty() {
        bail!("no inference modules configured");
    }

    for spec in modules {
        for (key, value) in &spec.params {
            if !value.is_finite() {
                bail!("{:?}.{key} is not a finite number", spec.module);
            }
            let unit_range = matches!(key.as_str(), "smoothness" | "threshold");
            if unit_range && !(0.0..=1.0).contains(value) {
                bail!("{:?}.{key}={value} is outside 0..=1", spec.module);
            }
            if key.ends_with("Ms") && *value < 0.0 {
                bail!("{:?}.{key} must not be negative", spec.module);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let modules = default_modules();
        validate_modules(&modules).unwrap();
        assert_eq!(modules.len(), 6);
        assert_eq!(modules[3].param("maxInputFrameSize"), Some(320.0));
    }

    #[test]
    fn rejects_out_of_range_smoothing() {
        let modules = vec![ModuleSpec::new(ModuleKind::FaceEmotion).with("smoothness", 1.4)];
        assert!(validate_modules(&modules).is_err());
        assert!(validate_modules(&[]).is_err());
    }

    #[test]
    fn module_names_match_engine_identifiers() {
        let json = serde_json::to_value(ModuleSpec::new(ModuleKind::FaceArousalValence)).unwrap();
        assert_eq!(json["module"], "FACE_AROUSAL_VALENCE");
    }
}
