//! Bosch BMP280 / BME280 driver
//!
//! One forced measurement per [`Bmxx80::sample`], compensated with the
//! datasheet's double-precision formulas.
//!
//! | Register | Use |
//! |----------|-----|
//! | `0xD0` | chip id (`0x58` BMP280, `0x60` BME280) |
//! | `0x88..0xA1` | temperature/pressure trimming, `dig_H1` |
//! | `0xE1..0xE7` | humidity trimming (BME280) |
//! | `0xF2` | `ctrl_hum` |
//! | `0xF3` | status, bit 3 = measuring |
//! | `0xF4` | `ctrl_meas` |
//! | `0xF7..` | raw pressure, temperature, humidity |

use std::thread;
use std::time::Duration;

use super::i2c::I2cBus;
use super::SensorError;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_TP: u8 = 0x88;
const REG_CALIB_H: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_DATA: u8 = 0xF7;

/// osrs_t ×1, osrs_p ×1, forced mode
const CTRL_MEAS_FORCED: u8 = 0b001_001_01;
/// osrs_h ×1
const CTRL_HUM_X1: u8 = 0b001;
const STATUS_MEASURING: u8 = 0b1000;
const MAX_STATUS_POLLS: u32 = 50;

/// Supported chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    /// Temperature and pressure
    Bmp280,
    /// Temperature, pressure and humidity
    Bme280,
}

impl Chip {
    /// Identify a chip from its id register
    pub fn from_id(id: u8) -> Result<Self, SensorError> {
        match id {
            0x58 => Ok(Chip::Bmp280),
            0x60 => Ok(Chip::Bme280),
            other => Err(SensorError::UnknownChip(other)),
        }
    }
}

/// Factory trimming parameters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Calibration {
    /// Decode `0x88..=0xA1` and, for the BME280, `0xE1..=0xE7`
    pub fn parse(tp: &[u8; 26], h: Option<&[u8; 7]>) -> Self {
        let u = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);
        let mut calibration = Calibration {
            t1: u(0),
            t2: s(2),
            t3: s(4),
            p1: u(6),
            p2: s(8),
            p3: s(10),
            p4: s(12),
            p5: s(14),
            p6: s(16),
            p7: s(18),
            p8: s(20),
            p9: s(22),
            h1: tp[25],
            ..Calibration::default()
        };
        if let Some(h) = h {
            calibration.h2 = i16::from_le_bytes([h[0], h[1]]);
            calibration.h3 = h[2];
            // 12-bit signed values sharing the nibbles of 0xE5
            calibration.h4 = (i16::from(h[3] as i8) << 4) | i16::from(h[4] & 0x0F);
            calibration.h5 = (i16::from(h[5] as i8) << 4) | i16::from(h[4] >> 4);
            calibration.h6 = h[6] as i8;
        }
        calibration
    }

    /// Temperature in °C plus the `t_fine` carried into the other formulas
    pub fn temperature(&self, adc_t: i32) -> (f64, f64) {
        let adc = f64::from(adc_t);
        let t1 = f64::from(self.t1);
        let var1 = (adc / 16384.0 - t1 / 1024.0) * f64::from(self.t2);
        let var2 = (adc / 131072.0 - t1 / 8192.0).powi(2) * f64::from(self.t3);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa
    pub fn pressure(&self, adc_p: i32, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f64::from(self.p6) / 32768.0;
        var2 += var1 * f64::from(self.p5) * 2.0;
        var2 = var2 / 4.0 + f64::from(self.p4) * 65536.0;
        var1 = (f64::from(self.p3) * var1 * var1 / 524288.0 + f64::from(self.p2) * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f64::from(self.p1);
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - f64::from(adc_p);
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f64::from(self.p9) * p * p / 2147483648.0;
        let var2 = p * f64::from(self.p8) / 32768.0;
        p + (var1 + var2 + f64::from(self.p7)) / 16.0
    }

    /// Relative humidity in %, clamped to `0..=100`
    pub fn humidity(&self, adc_h: i32, t_fine: f64) -> f64 {
        let h = t_fine - 76800.0;
        let h = (f64::from(adc_h) - (f64::from(self.h4) * 64.0 + f64::from(self.h5) / 16384.0 * h))
            * (f64::from(self.h2) / 65536.0
                * (1.0
                    + f64::from(self.h6) / 67108864.0 * h * (1.0 + f64::from(self.h3) / 67108864.0 * h)));
        let h = h * (1.0 - f64::from(self.h1) * h / 524288.0);
        h.clamp(0.0, 100.0)
    }
}

/// One compensated sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// °C
    pub temperature_c: f64,
    /// hPa
    pub pressure_hpa: f64,
    /// %RH, BME280 only
    pub humidity_rh: Option<f64>,
}

/// Driver over any [`I2cBus`]
#[derive(Debug)]
pub struct Bmxx80<B: I2cBus> {
    bus: B,
    chip: Chip,
    calibration: Calibration,
}

impl<B: I2cBus> Bmxx80<B> {
    /// Identify the chip and read its calibration
    pub fn new(mut bus: B) -> Result<Self, SensorError> {
        let chip = Chip::from_id(bus.read_register(REG_CHIP_ID)?)?;
        let mut tp = [0u8; 26];
        bus.read_registers(REG_CALIB_TP, &mut tp)?;
        let calibration = match chip {
            Chip::Bmp280 => Calibration::parse(&tp, None),
            Chip::Bme280 => {
                let mut h = [0u8; 7];
                bus.read_registers(REG_CALIB_H, &mut h)?;
                Calibration::parse(&tp, Some(&h))
            }
        };
        Ok(Self {
            bus,
            chip,
            calibration,
        })
    }

    /// Detected chip
    pub fn chip(&self) -> Chip {
        self.chip
    }

    /// Trigger a forced measurement and compensate it
    pub fn sample(&mut self) -> Result<Measurement, SensorError> {
        if self.chip == Chip::Bme280 {
            // ctrl_hum only takes effect after a ctrl_meas write
            self.bus.write_register(REG_CTRL_HUM, CTRL_HUM_X1)?;
        }
        self.bus.write_register(REG_CTRL_MEAS, CTRL_MEAS_FORCED)?;

        let mut polls = 0;
        while self.bus.read_register(REG_STATUS)? & STATUS_MEASURING != 0 {
            polls += 1;
            if polls >= MAX_STATUS_POLLS {
                return Err(SensorError::Timeout);
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut data = [0u8; 8];
        let len = if self.chip == Chip::Bme280 { 8 } else { 6 };
        self.bus.read_registers(REG_DATA, &mut data[..len])?;
        let adc_p = (i32::from(data[0]) << 12) | (i32::from(data[1]) << 4) | (i32::from(data[2]) >> 4);
        let adc_t = (i32::from(data[3]) << 12) | (i32::from(data[4]) << 4) | (i32::from(data[5]) >> 4);

        let (temperature_c, t_fine) = self.calibration.temperature(adc_t);
        let pressure_pa = self.calibration.pressure(adc_p, t_fine);
        let humidity_rh = (self.chip == Chip::Bme280).then(|| {
            let adc_h = (i32::from(data[6]) << 8) | i32::from(data[7]);
            self.calibration.humidity(adc_h, t_fine)
        });
        Ok(Measurement {
            temperature_c,
            pressure_hpa: pressure_pa / 100.0,
            humidity_rh,
        })
    }
}
