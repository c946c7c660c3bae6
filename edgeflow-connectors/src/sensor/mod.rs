//! Sensor Reader Origin
//!
//! Reads one sample per `produce` from local hardware:
//!
//! | `conf.sensorDevice` | Source | Fields |
//! |---------------------|--------|--------|
//! | `BMxx80` | BMP280/BME280 on `/dev/i2c-N` | `temperature_C`, `pressure_hPa`, `humidity_RH` (BME280) |
//! | `BCM2835` | thermal-zone pseudo-file | `temperature_C` |
//!
//! The I²C bus is only available on Linux; other targets get an init issue
//! for `BMxx80` unless a bus is supplied with
//! [`SensorReaderOrigin::with_bus`].

pub mod bmxx80;
pub mod i2c;
pub mod thermal;

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use edgeflow_core::{
    BatchMaker, Field, FieldMap, Issue, Lifecycle, Origin, StageBase, StageContext, StageError, StageResult,
};

use bmxx80::{Bmxx80, Measurement};
use i2c::I2cBus;
use thermal::ThermalZone;

/// Sensor reader origin
pub const SENSOR_READER_ORIGIN: &str = "edgeflow_stage_origin_sensorreader_SensorReaderDSource";
/// Offset returned by every `produce`
pub const SENSOR_OFFSET: &str = "sensor-reader-offset";

const DEFAULT_I2C_PATH: &str = "/dev/i2c-1";
const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Sensor failures
#[derive(Debug, Error)]
pub enum SensorError {
    /// Chip id is neither BMP280 nor BME280
    #[error("unsupported chip id 0x{0:02x}")]
    UnknownChip(u8),

    /// Measurement did not finish in time
    #[error("sensor did not finish measuring")]
    Timeout,

    /// Source held something that is not a number
    #[error("invalid sensor reading '{0}'")]
    InvalidReading(String),

    /// Device not available on this platform
    #[error("{0}")]
    Unsupported(String),

    /// Bus or file access failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Hardware source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SensorDevice {
    /// Bosch BMP280/BME280 over I²C
    #[default]
    #[serde(rename = "BMxx80")]
    Bmxx80,
    /// Raspberry Pi SoC thermal zone
    #[serde(rename = "BCM2835")]
    Bcm2835,
}

/// Sensor reader options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorReaderConfig {
    /// Hardware source
    pub sensor_device: SensorDevice,
    /// Bus device or pseudo-file; the device default when empty
    pub path: String,
    /// 7-bit I²C address
    pub i2c_address: u16,
    /// Divisor applied to thermal-zone readings
    pub scaling_factor: f64,
}

impl Default for SensorReaderConfig {
    fn default() -> Self {
        Self {
            sensor_device: SensorDevice::default(),
            path: String::new(),
            i2c_address: 0x77,
            scaling_factor: 1000.0,
        }
    }
}

impl SensorReaderConfig {
    /// Configured path, or the default for the device
    pub fn effective_path(&self) -> &str {
        match (self.path.is_empty(), self.sensor_device) {
            (false, _) => &self.path,
            (true, SensorDevice::Bmxx80) => DEFAULT_I2C_PATH,
            (true, SensorDevice::Bcm2835) => DEFAULT_THERMAL_PATH,
        }
    }
}

enum Reader {
    Bmxx80(Bmxx80<Box<dyn I2cBus>>),
    Thermal(ThermalZone),
}

impl Reader {
    fn sample(&mut self) -> Result<FieldMap, SensorError> {
        let mut fields = FieldMap::new();
        match self {
            Reader::Bmxx80(sensor) => {
                let Measurement {
                    temperature_c,
                    pressure_hpa,
                    humidity_rh,
                } = sensor.sample()?;
                fields.insert("temperature_C".to_string(), Field::Float(temperature_c));
                fields.insert("pressure_hPa".to_string(), Field::Float(pressure_hpa));
                if let Some(humidity) = humidity_rh {
                    fields.insert("humidity_RH".to_string(), Field::Float(humidity));
                }
            }
            Reader::Thermal(zone) => {
                fields.insert("temperature_C".to_string(), Field::Float(zone.read()?));
            }
        }
        Ok(fields)
    }
}

#[cfg(target_os = "linux")]
fn open_bus(path: &str, address: u16) -> Result<Box<dyn I2cBus>, SensorError> {
    Ok(Box::new(i2c::LinuxI2cBus::open(path, address)?))
}

#[cfg(not(target_os = "linux"))]
fn open_bus(_path: &str, _address: u16) -> Result<Box<dyn I2cBus>, SensorError> {
    Err(SensorError::Unsupported("I2C sensors are only supported on Linux".to_string()))
}

/// Emits one record per `produce` with the latest sensor sample
pub struct SensorReaderOrigin {
    base: StageBase,
    reader: Option<Reader>,
    bus: Option<Box<dyn I2cBus>>,
    samples: u64,
}

impl SensorReaderOrigin {
    /// New, uninitialised origin
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            reader: None,
            bus: None,
            samples: 0,
        }
    }

    /// Origin that talks to `bus` instead of opening `conf.path`
    pub fn with_bus(bus: Box<dyn I2cBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    fn open(&mut self, config: &SensorReaderConfig) -> Result<Reader, SensorError> {
        match config.sensor_device {
            SensorDevice::Bmxx80 => {
                let bus = match self.bus.take() {
                    Some(bus) => bus,
                    None => open_bus(config.effective_path(), config.i2c_address)?,
                };
                let sensor = Bmxx80::new(bus)?;
                debug!("detected {:?}", sensor.chip());
                Ok(Reader::Bmxx80(sensor))
            }
            SensorDevice::Bcm2835 => Ok(Reader::Thermal(ThermalZone::new(
                config.effective_path(),
                config.scaling_factor,
            ))),
        }
    }
}

impl Default for SensorReaderOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for SensorReaderOrigin {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: SensorReaderConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        if config.sensor_device == SensorDevice::Bcm2835 && config.scaling_factor == 0.0 {
            return vec![context.create_config_issue("conf.scalingFactor", "scaling factor must not be zero")];
        }
        match self.open(&config) {
            Ok(reader) => self.reader = Some(reader),
            Err(err) => return vec![context.create_config_issue("conf.path", &err.to_string())],
        }
        info!("sensor reader on {} ({:?})", config.effective_path(), config.sensor_device);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.reader = None;
        self.base.detach();
    }
}

impl Origin for SensorReaderOrigin {
    fn produce(
        &mut self,
        _last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        let context = self.base.context()?.clone();
        if max_batch_size == 0 {
            return Ok(Some(SENSOR_OFFSET.to_string()));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(StageError::IllegalState {
                operation: "produce",
                state: "created",
            });
        };
        match reader.sample() {
            Ok(fields) => {
                let id = format!("sensor::{}", self.samples);
                self.samples += 1;
                batch_maker.add_record(context.create_record(&id, Field::Map(fields)));
            }
            Err(err) => {
                warn!("sensor read failed: {}", err);
                context.report_error(StageError::Transport(err.to_string()));
            }
        }
        Ok(Some(SENSOR_OFFSET.to_string()))
    }
}
