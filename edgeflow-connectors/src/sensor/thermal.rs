use std::fs;
use std::path::{Path, PathBuf};

use super::SensorError;

/// Thermal-zone pseudo-file, e.g. `/sys/class/thermal/thermal_zone0/temp`
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
    scaling_factor: f64,
}

impl ThermalZone {
    /// Reader for `path`; raw values are divided by `scaling_factor`
    pub fn new(path: impl AsRef<Path>, scaling_factor: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            scaling_factor,
        }
    }

    /// Current temperature in °C
    pub fn read(&self) -> Result<f64, SensorError> {
        let raw = fs::read_to_string(&self.path)?;
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::InvalidReading(raw.trim().to_string()))?;
        Ok(value as f64 / self.scaling_factor)
    }
}
