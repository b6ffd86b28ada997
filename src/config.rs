//! optional TOML config file, merged under the command line flags

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{KmError, Result};
use crate::pipeline::{AnalysisConfig, AnalysisType};
use crate::preprocess::TimeUnit;

pub const DEFAULT_CONFIG_FILE: &str = "km-survival.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoxFileConfig {
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub l2_penalty: Option<f64>,
}

/// every key is optional; unset keys keep the built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub analysis: Option<AnalysisType>,
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    #[serde(default)]
    pub cutoff_month: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub cox: CoxFileConfig,
}

impl FileConfig {
    /// explicit path must exist; otherwise `./km-survival.toml` if present, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_path(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_path(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| KmError::config(path, e))?;
        let config = Self::parse(&content).map_err(|e| KmError::config(path, e))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// overlay the file's values onto `base`
    pub fn apply(&self, mut base: AnalysisConfig) -> AnalysisConfig {
        if let Some(analysis) = self.analysis {
            base.analysis_type = analysis;
        }
        if let Some(unit) = self.unit {
            base.day_unit = unit;
        }
        if let Some(cutoff) = self.cutoff_month {
            base.cutoff_month = cutoff;
        }
        if let Some(level) = self.confidence_level {
            base.confidence_level = level;
        }
        if let Some(n) = self.cox.max_iterations {
            base.cox.max_iterations = n;
        }
        if let Some(tol) = self.cox.tolerance {
            base.cox.tolerance = tol;
        }
        if let Some(l2) = self.cox.l2_penalty {
            base.cox.l2_penalty = l2;
        }
        base
    }
}
