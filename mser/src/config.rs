//! Parameters for MSER detection.

use std::path::Path;

use anyhow::Context;
use num_traits::NumCast;
use serde::{Deserialize, Serialize};

use common::{FileExtensionError, SerdeFormat, SerdeFormatError};

use crate::value::{DeltaValue, Direction, ThresholdOrdering};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("delta must be positive and finite, got {0}")]
    InvalidDelta(f64),
    #[error("min_size must be at least 1")]
    ZeroMinSize,
    #[error("max_size {max_size} is below min_size {min_size}")]
    InvalidSizeRange { min_size: usize, max_size: usize },
    #[error("max_var must be non-negative, got {0}")]
    InvalidMaxVar(f64),
    #[error("min_diversity must lie in [0, 1), got {0}")]
    InvalidMinDiversity(f64),
    #[error("delta {0} is not a non-zero value of the threshold type")]
    DeltaNotRepresentable(f64),
    #[error("Config parsing failed")]
    Format(#[from] SerdeFormatError),
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MserConfig {
    /// Width of the threshold window over which growth is measured.
    pub delta: f64,
    /// Smallest accepted region, in pixels.
    pub min_size: usize,
    /// Largest accepted region, in pixels.
    pub max_size: usize,
    /// Largest accepted relative growth over `delta`.
    pub max_var: f64,
    /// Nested regions whose relative size difference is below this are
    /// considered duplicates. 0 disables pruning.
    pub min_diversity: f64,
    /// Grow regions from dark pixels (true) or from bright pixels (false).
    pub dark_to_bright: bool,
}

impl Default for MserConfig {
    fn default() -> Self {
        Self {
            delta: 15.0,
            min_size: 10,
            max_size: 100_000,
            max_var: 0.8,
            min_diversity: 0.0,
            dark_to_bright: true,
        }
    }
}

impl MserConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(ConfigError::InvalidDelta(self.delta));
        }
        if self.min_size == 0 {
            return Err(ConfigError::ZeroMinSize);
        }
        if self.max_size < self.min_size {
            return Err(ConfigError::InvalidSizeRange {
                min_size: self.min_size,
                max_size: self.max_size,
            });
        }
        if self.max_var.is_nan() || self.max_var < 0.0 {
            return Err(ConfigError::InvalidMaxVar(self.max_var));
        }
        if !(0.0..1.0).contains(&self.min_diversity) {
            return Err(ConfigError::InvalidMinDiversity(self.min_diversity));
        }
        Ok(())
    }

    pub fn direction(&self) -> Direction {
        if self.dark_to_bright {
            Direction::DarkToBright
        } else {
            Direction::BrightToDark
        }
    }

    /// The threshold ordering for images with values of type `T`.
    pub fn ordering<T>(&self) -> ConfigResult<ThresholdOrdering<T>>
    where
        T: DeltaValue + NumCast,
    {
        self.validate()?;
        let delta = <T as NumCast>::from(self.delta)
            .filter(|delta| !delta.is_zero_delta())
            .ok_or(ConfigError::DeltaNotRepresentable(self.delta))?;
        Ok(ThresholdOrdering::new(delta, self.direction()))
    }

    pub fn parse(text: &str, format: SerdeFormat) -> ConfigResult<Self> {
        let config: Self = common::deserialize(text, format)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_text(&self, format: SerdeFormat) -> ConfigResult<String> {
        Ok(common::serialize(self, format)?)
    }

    /// Reads a YAML or JSON config, picking the format from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let format = SerdeFormat::from_file_name(&path.to_string_lossy())?;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&text, format)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        log::debug!("loaded {:?} from {}", config, path.display());
        Ok(config)
    }
}
